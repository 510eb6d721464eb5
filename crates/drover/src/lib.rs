/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! # Drover
//!
//! A durable, at-least-once task execution engine: tasks live as
//! documents in a shared store, workers reserve invocation messages
//! through an atomic locking protocol, and composite tasks (groups,
//! pipelines, chains, barriers, periodic schedules) are state machines
//! driven by message delivery.
//!
//! ## Architecture
//!
//! - [`store`]: atomic document collections, the only shared mutable
//!   state. Every coordination step is a single-document find-and-modify;
//!   there are no multi-document transactions and no process-local locks
//!   shared between workers.
//! - [`dal`]: the data access layer. [`dal::MessageDal`] owns the
//!   reservation protocol: claim a ready message, walk its resource
//!   sequence (named semaphores, then the per-task mutex), and only
//!   execute once everything is held. Contention parks the message;
//!   releases wake it; partial acquisitions resume where they stopped.
//! - [`task`]: the behavior layer (function tasks plus the composite
//!   state machines) over the [`task::TaskHandle`] operation surface.
//! - [`worker`]: the dispatch loop, with bounded concurrency and
//!   bus-assisted polling.
//! - [`bus`]: best-effort wake notifications; correctness never depends
//!   on delivery.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use drover::{Engine, FnOutcome, Store, TaskFn, TaskRegistry, Worker, WorkerConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = TaskRegistry::new();
//!     registry.register_function(TaskFn::new("double", |args, _kwargs| {
//!         let x = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
//!         Ok(FnOutcome::Value(json!(x * 2)))
//!     }))?;
//!
//!     let engine = Engine::new(Store::in_memory(), registry);
//!     let mut task = engine.spawn("double", vec![json!(21)], Default::default()).await?;
//!
//!     let worker = Worker::new(engine.clone(), WorkerConfig::new("w1"));
//!     worker.run_until_idle().await?;
//!
//!     assert_eq!(task.get(None).await?, json!(42));
//!     Ok(())
//! }
//! ```
//!
//! Composites compose the same way: `task::group::new` fans out,
//! `task::pipeline::new` feeds each stage's result forward,
//! `task::periodic::schedule` re-runs a subtask on a fixed interval, and
//! a function body can return [`FnOutcome::chain`] to recurse without
//! growing a call stack.

pub mod bus;
pub mod dal;
pub mod engine;
pub mod error;
pub mod models;
pub mod registry;
pub mod resource;
pub mod store;
pub mod task;
pub mod worker;

pub use bus::{Event, EventBus, EventKind, LocalBus};
pub use engine::Engine;
pub use error::{FailureInfo, RegistryError, StoreError, TaskError, WorkerError};
pub use models::{Message, MessageStatus, Semaphore, TaskOptions, TaskResult, TaskState, TaskStatus};
pub use registry::{Behavior, SlotOutcome, TaskRegistry};
pub use store::ids::{DocId, MessageId, TaskId};
pub use store::Store;
pub use task::function::{ChainCall, FnOutcome, TaskFn};
pub use task::TaskHandle;
pub use worker::{Worker, WorkerConfig};
