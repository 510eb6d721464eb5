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

//! Function tasks: leaf work expressed as a registered closure.
//!
//! [`TaskFn`] is the explicit registration wrapper (a name, a body, and
//! an options bag) registered once at initialization. Task instances
//! carry curried arguments in their `data`; send-time arguments are
//! prepended at dispatch (unless the task is immutable, which runs on its
//! curried arguments alone).
//!
//! A body returns an explicit [`FnOutcome`]: a completion value,
//! a cooperative suspend, or a [`ChainCall`] instruction that spawns a
//! continuation task and suspends the caller: the engine's stackless
//! recursion primitive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{FailureInfo, RegistryError, TaskError};
use crate::models::message::Message;
use crate::models::result::TaskResult;
use crate::models::task_state::{TaskOptions, TaskStatus};
use crate::registry::{Behavior, SlotOutcome};
use crate::task::{chain, TaskHandle};

/// Explicit outcome of a function body.
pub enum FnOutcome {
    /// Complete successfully with this value.
    Value(Value),
    /// Pause without completing; the task stays open awaiting a future
    /// message.
    Suspend,
    /// Spawn a continuation task and suspend the caller; the caller
    /// completes with the continuation's eventual result.
    Chain(ChainCall),
}

impl FnOutcome {
    /// Convenience constructor for a chained continuation.
    pub fn chain(task_type: impl Into<String>, args: Vec<Value>) -> Self {
        FnOutcome::Chain(ChainCall {
            task_type: task_type.into(),
            args,
            kwargs: Map::new(),
        })
    }
}

/// A continuation instruction: start a fresh task of `task_type` with
/// these arguments and deliver its result as the caller's own.
pub struct ChainCall {
    pub task_type: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

/// Signature of a function-task body.
pub type FnBody =
    Arc<dyn Fn(&[Value], &Map<String, Value>) -> Result<FnOutcome, FailureInfo> + Send + Sync>;

/// A registered function task: name, body, and default options.
#[derive(Clone)]
pub struct TaskFn {
    name: String,
    body: FnBody,
    options: TaskOptions,
}

impl TaskFn {
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&[Value], &Map<String, Value>) -> Result<FnOutcome, FailureInfo>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            body: Arc::new(body),
            options: TaskOptions::default(),
        }
    }

    /// Replaces the default options wholesale.
    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.options.queue = queue.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.options.priority = priority;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.options.immutable = true;
        self
    }

    pub fn ignore_result(mut self) -> Self {
        self.options.ignore_result = true;
        self
    }

    /// Semaphores each message must acquire, in acquisition order.
    pub fn semaphores(mut self, names: Vec<String>) -> Self {
        self.options.semaphores = names;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Instance payload of a function task: curried call arguments.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct FunctionData {
    #[serde(default)]
    pub cargs: Vec<Value>,
    #[serde(default)]
    pub ckwargs: Map<String, Value>,
}

/// Behavior adapter for a [`TaskFn`].
pub(crate) struct FunctionBehavior {
    task_fn: TaskFn,
}

impl FunctionBehavior {
    pub(crate) fn new(task_fn: TaskFn) -> Self {
        Self { task_fn }
    }
}

#[async_trait]
impl Behavior for FunctionBehavior {
    fn type_name(&self) -> &str {
        &self.task_fn.name
    }

    fn default_options(&self) -> TaskOptions {
        self.task_fn.options.clone()
    }

    fn initial_data(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value, TaskError> {
        Ok(serde_json::to_value(FunctionData {
            cargs: args,
            ckwargs: kwargs,
        })?)
    }

    async fn dispatch(&self, task: &mut TaskHandle, msg: &Message) -> Result<SlotOutcome, TaskError> {
        if msg.slot != "run" {
            return Err(RegistryError::UnknownSlot {
                task_type: self.task_fn.name.clone(),
                slot: msg.slot.clone(),
            }
            .into());
        }

        let data: FunctionData = serde_json::from_value(task.state().data.clone())?;
        let (args, kwargs) = if task.state().options.immutable {
            (data.cargs, data.ckwargs)
        } else {
            let mut args = msg.args.clone();
            args.extend(data.cargs);
            let mut kwargs = data.ckwargs;
            for (k, v) in msg.kwargs.clone() {
                kwargs.insert(k, v);
            }
            (args, kwargs)
        };

        let body = Arc::clone(&self.task_fn.body);
        let outcome = catch_unwind(AssertUnwindSafe(|| body(&args, &kwargs)));
        match outcome {
            Ok(Ok(FnOutcome::Value(value))) => {
                Ok(SlotOutcome::Complete(TaskResult::success(task.id(), value)))
            }
            Ok(Ok(FnOutcome::Suspend)) => Ok(SlotOutcome::Suspend(TaskStatus::Suspended)),
            Ok(Ok(FnOutcome::Chain(call))) => chain::call(task, call).await,
            Ok(Err(info)) => Ok(SlotOutcome::Complete(TaskResult::failure(task.id(), info))),
            Err(payload) => Ok(SlotOutcome::Complete(TaskResult::failure(
                task.id(),
                FailureInfo::from_panic(payload),
            ))),
        }
    }
}
