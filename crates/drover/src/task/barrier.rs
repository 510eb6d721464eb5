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

//! Barrier: a group that discards sub-results.
//!
//! A barrier must never complete while a sibling is still pending, so on
//! every completion it re-checks the literal status of every child rather
//! than trusting the countdown alone. A failure observed while siblings
//! remain pending parks the barrier in the transient `fail-child` status;
//! once every child is terminal the barrier completes: with a null
//! success if all succeeded, otherwise with the first child failure.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::{FailureInfo, TaskError};
use crate::models::message::Message;
use crate::models::result::TaskResult;
use crate::models::task_state::{TaskOptions, TaskStatus};
use crate::registry::{Behavior, SlotOutcome};
use crate::task::{composite, TaskHandle};

/// Registered type name.
pub const TASK_TYPE: &str = "barrier";

/// Creates a barrier over `subtasks` with default options.
pub async fn new(engine: &Engine, subtasks: Vec<TaskHandle>) -> Result<TaskHandle, TaskError> {
    new_with_options(engine, subtasks, TaskOptions::default()).await
}

/// Creates a barrier over `subtasks` with explicit options.
pub async fn new_with_options(
    engine: &Engine,
    subtasks: Vec<TaskHandle>,
    options: TaskOptions,
) -> Result<TaskHandle, TaskError> {
    let mut barrier = engine
        .create_with(TASK_TYPE, Vec::new(), Map::new(), |o| *o = options)
        .await?;
    for mut subtask in subtasks {
        composite::append(&mut barrier, &mut subtask).await?;
    }
    Ok(barrier)
}

pub(crate) struct BarrierBehavior;

#[async_trait]
impl Behavior for BarrierBehavior {
    fn type_name(&self) -> &str {
        TASK_TYPE
    }

    fn initial_data(&self, _args: Vec<Value>, _kwargs: Map<String, Value>) -> Result<Value, TaskError> {
        Ok(composite::initial_data())
    }

    async fn dispatch(&self, task: &mut TaskHandle, msg: &Message) -> Result<SlotOutcome, TaskError> {
        match msg.slot.as_str() {
            "run" => {
                composite::start_pending_children(task, &msg.args, &msg.kwargs).await?;
                Ok(SlotOutcome::Continue)
            }
            composite::RETIRE_SUBTASK => {
                let (result, _position) = composite::parse_retire_args(msg)?;
                let remaining = composite::finish_one(task).await?;
                if remaining > 0 {
                    if !result.is_success() {
                        // Observable while siblings are still pending;
                        // cleared by the terminal completion below.
                        return Ok(SlotOutcome::Suspend(TaskStatus::FailChild));
                    }
                    return Ok(SlotOutcome::Continue);
                }

                let children = task.engine().dal().tasks().children(task.id()).await;
                if children.iter().any(|c| !c.status.is_terminal()) {
                    warn!(barrier = %task.id(), "countdown reached zero with non-terminal children");
                    return Ok(SlotOutcome::Continue);
                }
                let first_failure = children.iter().find_map(|c| match &c.result {
                    Some(r) if !r.is_success() => Some(
                        r.get()
                            .err()
                            .map(TaskError::into_failure_info)
                            .unwrap_or_else(|| FailureInfo::new("failure", "subtask failed")),
                    ),
                    _ => None,
                });
                debug!(barrier = %task.id(), failed = first_failure.is_some(), "barrier retiring");
                composite::remove_subtasks(task, Some(msg.id)).await?;
                match first_failure {
                    None => Ok(SlotOutcome::Complete(TaskResult::success(
                        task.id(),
                        Value::Null,
                    ))),
                    Some(error) => {
                        Ok(SlotOutcome::Complete(TaskResult::failure(task.id(), error)))
                    }
                }
            }
            other => Err(crate::error::RegistryError::UnknownSlot {
                task_type: TASK_TYPE.to_string(),
                slot: other.to_string(),
            }
            .into()),
        }
    }
}
