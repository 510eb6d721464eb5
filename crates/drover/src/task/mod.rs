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

//! Task behaviors and the task handle.
//!
//! [`TaskHandle`] pairs a loaded task state with the engine and carries
//! the base operation surface every behavior builds on: `start`,
//! `schedule`, `link`, `complete`, `handle`, `wait`, `get`, `forget`.
//! The behavior modules implement the leaf and composite task types on
//! top of it.

pub mod barrier;
pub mod chain;
pub mod composite;
pub mod function;
pub mod group;
pub mod periodic;
pub mod pipeline;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::dal::NewMessage;
use crate::engine::Engine;
use crate::error::TaskError;
use crate::models::message::Message;
use crate::models::result::TaskResult;
use crate::models::task_state::{TaskOptions, TaskState, TaskStatus};
use crate::registry::{Behavior, SlotOutcome};
use crate::store::ids::TaskId;

/// Poll interval for [`TaskHandle::wait`].
const WAIT_POLL: Duration = Duration::from_millis(10);

/// The built-in composite behaviors registered by
/// [`TaskRegistry::new`](crate::registry::TaskRegistry::new). Shared as
/// singletons; behaviors are stateless.
static BUILTINS: Lazy<Vec<Arc<dyn Behavior>>> = Lazy::new(|| {
    vec![
        Arc::new(group::GroupBehavior),
        Arc::new(pipeline::PipelineBehavior),
        Arc::new(chain::ChainBehavior),
        Arc::new(barrier::BarrierBehavior),
        Arc::new(periodic::PeriodicBehavior),
    ]
});

pub(crate) fn builtin_behaviors() -> Vec<Arc<dyn Behavior>> {
    BUILTINS.iter().map(Arc::clone).collect()
}

/// A loaded task plus the engine it lives in.
///
/// The handle holds a snapshot of the task state; operations that mutate
/// the store refresh the snapshot. Clones are cheap and independent.
#[derive(Clone)]
pub struct TaskHandle {
    engine: Engine,
    state: TaskState,
}

impl TaskHandle {
    pub(crate) fn new(engine: Engine, state: TaskState) -> Self {
        Self { engine, state }
    }

    pub fn id(&self) -> TaskId {
        self.state.id
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn result(&self) -> Option<&TaskResult> {
        self.state.result.as_ref()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Reloads the state snapshot from the store.
    pub async fn refresh(&mut self) -> Result<(), TaskError> {
        self.state = self.engine.dal().tasks().get(self.state.id).await?;
        Ok(())
    }

    /// Flips a non-terminal task to active. Terminal tasks are left
    /// untouched; their messages get discarded at handling time.
    async fn activate(&mut self) -> Result<(), TaskError> {
        let (state, ()) = self
            .engine
            .dal()
            .tasks()
            .mutate(self.state.id, |t| {
                if !t.status.is_terminal() {
                    t.status = TaskStatus::Active;
                }
            })
            .await?;
        self.state = state;
        Ok(())
    }

    /// Marks the task active and sends a `run` message carrying the given
    /// send-time arguments.
    pub async fn start(
        &mut self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Message, TaskError> {
        self.activate().await?;
        let msg = self
            .engine
            .dal()
            .messages()
            .create(NewMessage::run(&self.state, args, kwargs))
            .await?;
        let msg = self
            .engine
            .dal()
            .messages()
            .send(msg.id, Vec::new(), Map::new())
            .await?;
        self.refresh().await?;
        Ok(msg)
    }

    /// Like [`start`](Self::start), but the `run` message is deferred and
    /// will not be reserved before `after`.
    pub async fn schedule(
        &mut self,
        after: DateTime<Utc>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Message, TaskError> {
        self.activate().await?;
        let msg = self
            .engine
            .dal()
            .messages()
            .create(NewMessage::run(&self.state, args, kwargs).after(after))
            .await?;
        let msg = self
            .engine
            .dal()
            .messages()
            .send(msg.id, Vec::new(), Map::new())
            .await?;
        self.refresh().await?;
        Ok(msg)
    }

    /// Wires a completion callback: creates an unsent message targeting
    /// `target`'s `slot` with the given construction-time arguments, and
    /// records it as this task's `on_complete`. When this task completes,
    /// the message is sent with the result prepended as leading argument.
    pub async fn link(
        &mut self,
        target: &TaskState,
        slot: &str,
        args: Vec<Value>,
        priority: Option<i32>,
    ) -> Result<Message, TaskError> {
        let mut new = NewMessage::slot(target, slot, args, Map::new());
        if let Some(priority) = priority {
            new = new.priority(priority);
        }
        let msg = self.engine.dal().messages().create(new).await?;
        self.engine
            .dal()
            .tasks()
            .set_on_complete(self.state.id, msg.id)
            .await?;
        self.refresh().await?;
        Ok(msg)
    }

    /// Completes the task: stores the result and terminal status (exactly
    /// once), delivers the `on_complete` callback with the result as
    /// leading argument, and deletes the state outright for unlinked
    /// `ignore_result` tasks that succeeded.
    pub async fn complete(&mut self, result: TaskResult) -> Result<(), TaskError> {
        let applied = self
            .engine
            .dal()
            .tasks()
            .set_result(self.state.id, &result)
            .await?;
        let Some(state) = applied else {
            warn!(task = %self.state.id, "completion ignored; task already terminal");
            self.refresh().await?;
            return Ok(());
        };
        if let Some(on_complete) = state.on_complete {
            self.engine
                .dal()
                .messages()
                .send(on_complete, vec![result.to_value()], Map::new())
                .await?;
        } else if state.options.ignore_result && result.is_success() {
            self.engine.dal().tasks().delete(state.id).await?;
        }
        self.state = state;
        Ok(())
    }

    /// Handles one delivered message: resolves this task's behavior,
    /// dispatches the message's slot, applies the outcome, and retires
    /// the message. Messages to already-terminal tasks are logged and
    /// discarded (still retiring). Dispatch errors become failure results
    /// rather than crashing the caller.
    pub async fn handle(&mut self, msg: &Message) -> Result<(), TaskError> {
        self.handle_inner(msg, false).await
    }

    /// Debug-mode variant: dispatch errors propagate to the caller
    /// instead of completing the task with a failure.
    pub(crate) async fn handle_raising(
        &mut self,
        msg: &Message,
        raise_errors: bool,
    ) -> Result<(), TaskError> {
        self.handle_inner(msg, raise_errors).await
    }

    async fn handle_inner(&mut self, msg: &Message, raise_errors: bool) -> Result<(), TaskError> {
        match self.engine.dal().tasks().try_get(self.state.id).await {
            Some(state) => self.state = state,
            None => {
                warn!(task = %self.state.id, message = %msg.id, "discarding message for deleted task");
                self.engine.dal().messages().retire(msg.id).await?;
                return Ok(());
            }
        }
        if self.state.status.is_terminal() {
            warn!(
                task = %self.state.id,
                message = %msg.id,
                slot = %msg.slot,
                "ignoring message to completed task"
            );
            self.engine.dal().messages().retire(msg.id).await?;
            return Ok(());
        }
        let behavior = match self.engine.registry().resolve(&self.state.task_type) {
            Ok(behavior) => behavior,
            Err(e) => {
                // Unrecoverable for this message: consume it and surface
                // the resolution failure to the dispatch loop.
                self.engine.dal().messages().retire(msg.id).await?;
                return Err(e.into());
            }
        };
        let applied = match behavior.dispatch(self, msg).await {
            Ok(SlotOutcome::Continue) => Ok(()),
            Ok(SlotOutcome::Suspend(status)) => self
                .engine
                .dal()
                .tasks()
                .set_status(self.state.id, status)
                .await
                .map_err(TaskError::from),
            Ok(SlotOutcome::Complete(result)) => self.complete(result).await,
            Err(e) => {
                if raise_errors {
                    return Err(e);
                }
                error!(task = %self.state.id, slot = %msg.slot, error = %e, "slot dispatch failed");
                let info = e.into_failure_info();
                self.complete(TaskResult::failure(self.state.id, info)).await
            }
        };
        // The message is consumed even when applying the outcome failed;
        // leaving it busy forever helps nobody.
        self.engine.dal().messages().retire(msg.id).await?;
        applied
    }

    /// Blocks until the task reaches a terminal status, polling the
    /// store. Errors with [`TaskError::Timeout`] when a deadline is given
    /// and elapses first.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<(), TaskError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            self.refresh().await?;
            if self.state.status.is_terminal() {
                return Ok(());
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return Err(TaskError::Timeout);
                }
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    /// Waits for completion, forgets the task state, and unwraps the
    /// result, returning the success value or re-raising the stored
    /// failure.
    pub async fn get(&mut self, timeout: Option<Duration>) -> Result<Value, TaskError> {
        self.wait(timeout).await?;
        let result = self.state.result.clone().ok_or_else(|| {
            TaskError::Failed(crate::error::FailureInfo::new(
                "missing-result",
                "terminal task has no stored result",
            ))
        })?;
        self.forget().await?;
        result.get()
    }

    /// Deletes the task state.
    pub async fn forget(&self) -> Result<(), TaskError> {
        self.engine.dal().tasks().delete(self.state.id).await?;
        Ok(())
    }

    /// Updates the task's options in place.
    pub async fn set_options(
        &mut self,
        configure: impl FnOnce(&mut TaskOptions),
    ) -> Result<(), TaskError> {
        let (state, ()) = self
            .engine
            .dal()
            .tasks()
            .mutate(self.state.id, |t| configure(&mut t.options))
            .await?;
        self.state = state;
        Ok(())
    }
}
