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

//! Error types for the drover task engine.
//!
//! The taxonomy follows the engine's layering: [`StoreError`] for the
//! document store, [`RegistryError`] for behavior resolution,
//! [`TaskError`] for task-level failures surfaced to callers, and
//! [`WorkerError`] for the dispatch loop. Cooperative suspension and
//! resource contention are deliberately *not* errors: suspension is a
//! [`SlotOutcome`](crate::registry::SlotOutcome) variant and a busy
//! resource is the `Queued` message state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::ids::MessageId;

/// Errors from the atomic document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Two documents were generated with the same identifier. Ids are
    /// random 63-bit values, so this is treated as a fatal creation error
    /// rather than retried.
    #[error("duplicate id {id} in collection '{collection}'")]
    DuplicateId {
        collection: &'static str,
        id: String,
    },

    /// A document expected to exist was not found.
    #[error("document {id} not found in collection '{collection}'")]
    NotFound {
        collection: &'static str,
        id: String,
    },

    /// A multi-document protocol observed a document in a state it cannot
    /// proceed from (e.g. releasing a resource that was never held).
    #[error("invalid store state: {message}")]
    InvalidState { message: String },
}

impl StoreError {
    pub(crate) fn not_holding(resource: &str, id: MessageId) -> Self {
        StoreError::InvalidState {
            message: format!("message {} is not holding resource '{}'", id, resource),
        }
    }
}

/// Errors from task-type registration and resolution.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The store holds a type tag with no registered behavior. Fatal for
    /// the message that referenced it; there is no automatic recovery.
    #[error("unknown task type '{0}'")]
    UnknownTaskType(String),

    /// A behavior was registered twice under the same name.
    #[error("task type '{0}' is already registered")]
    DuplicateTaskType(String),

    /// A message named a slot the resolved behavior does not implement.
    #[error("task type '{task_type}' has no slot '{slot}'")]
    UnknownSlot { task_type: String, slot: String },
}

/// Captured context for a failed task: the original error's kind and
/// message, plus optional trace text. This is the persisted form of a
/// failure; [`TaskResult::get`](crate::models::result::TaskResult::get)
/// re-raises it as [`TaskError::Failed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Classifier for the original error (exception type name, "panic", ...).
    pub kind: String,
    /// Human-readable description of the failure.
    pub message: String,
    /// Optional captured trace text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl FailureInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Builds failure context from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };
        Self::new("panic", message)
    }
}

impl std::fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Task-level errors surfaced to callers.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task completed with a failure result; carries the original
    /// error context captured at the point of failure.
    #[error("task failed ({0})")]
    Failed(FailureInfo),

    /// A blocking waiter's deadline elapsed before the task reached a
    /// terminal status.
    #[error("timed out waiting for task completion")]
    Timeout,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TaskError {
    /// Collapses any task-level error into failure context suitable for
    /// persisting as a failure result.
    pub(crate) fn into_failure_info(self) -> FailureInfo {
        match self {
            TaskError::Failed(info) => info,
            TaskError::Timeout => FailureInfo::new("timeout", self.to_string()),
            TaskError::Store(e) => FailureInfo::new("store", e.to_string()),
            TaskError::Registry(e) => FailureInfo::new("registry", e.to_string()),
            TaskError::Serialization(e) => FailureInfo::new("serialization", e.to_string()),
        }
    }
}

/// Errors from the worker dispatch loop. Loop-level errors are logged and
/// the loop backs off and retries; they never take the process down.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("concurrency slot unavailable: {0}")]
    Acquire(#[from] tokio::sync::AcquireError),

    #[error("worker task panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}
