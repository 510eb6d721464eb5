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

//! Group: concurrent fan-out over subtasks.
//!
//! `run` starts every pending subtask with the same invocation arguments;
//! true parallelism comes from multiple workers reserving those
//! independent messages. Each completion lands in `retire_subtask`, which
//! records the sub-result at the child's append position. When the last
//! completion arrives the group aggregates: success iff every child
//! succeeded, always carrying the ordered sub-results so callers can
//! inspect which child failed.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::engine::Engine;
use crate::error::{FailureInfo, TaskError};
use crate::models::message::Message;
use crate::models::result::TaskResult;
use crate::models::task_state::TaskOptions;
use crate::registry::{Behavior, SlotOutcome};
use crate::task::{composite, TaskHandle};

/// Registered type name.
pub const TASK_TYPE: &str = "group";

/// Creates a group over `subtasks` with default options.
pub async fn new(engine: &Engine, subtasks: Vec<TaskHandle>) -> Result<TaskHandle, TaskError> {
    new_with_options(engine, subtasks, TaskOptions::default()).await
}

/// Creates a group over `subtasks` with explicit options.
pub async fn new_with_options(
    engine: &Engine,
    subtasks: Vec<TaskHandle>,
    options: TaskOptions,
) -> Result<TaskHandle, TaskError> {
    let mut group = engine
        .create_with(TASK_TYPE, Vec::new(), Map::new(), |o| *o = options)
        .await?;
    for mut subtask in subtasks {
        composite::append(&mut group, &mut subtask).await?;
    }
    Ok(group)
}

/// Records a child's result at its position in the group's `data`.
async fn record_result(
    group: &TaskHandle,
    position: usize,
    result: &TaskResult,
) -> Result<(), TaskError> {
    group
        .engine()
        .dal()
        .tasks()
        .mutate(group.id(), |t| {
            if !t.data["results"].is_array() {
                t.data["results"] = json!([]);
            }
            let results = t.data["results"].as_array_mut().expect("just ensured array");
            while results.len() <= position {
                results.push(Value::Null);
            }
            results[position] = result.to_value();
        })
        .await?;
    Ok(())
}

/// Collects the ordered sub-results recorded so far. A position with no
/// recorded result decodes to a failure placeholder rather than being
/// silently dropped.
fn collect_results(group: &TaskHandle) -> Vec<TaskResult> {
    let empty = Vec::new();
    let recorded = group.state().data["results"].as_array().unwrap_or(&empty);
    recorded
        .iter()
        .enumerate()
        .map(|(position, value)| {
            TaskResult::from_value(value).unwrap_or_else(|_| {
                TaskResult::failure(
                    group.id(),
                    FailureInfo::new(
                        "missing-subresult",
                        format!("no result recorded for subtask at position {}", position),
                    ),
                )
            })
        })
        .collect()
}

pub(crate) struct GroupBehavior;

#[async_trait]
impl Behavior for GroupBehavior {
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
                let (result, position) = composite::parse_retire_args(msg)?;
                record_result(task, position, &result).await?;
                if task.state().options.ignore_result && result.is_success() {
                    // Fire-and-forget fan-out: reclaim the child's state
                    // as soon as its result is recorded.
                    task.engine().dal().tasks().delete(result.task_id()).await?;
                }
                let remaining = composite::finish_one(task).await?;
                if remaining > 0 {
                    return Ok(SlotOutcome::Continue);
                }
                task.refresh().await?;
                let sub = collect_results(task);
                debug!(group = %task.id(), subtasks = sub.len(), "group retiring");
                composite::remove_subtasks(task, Some(msg.id)).await?;
                Ok(SlotOutcome::Complete(TaskResult::group(task.id(), sub)))
            }
            other => Err(crate::error::RegistryError::UnknownSlot {
                task_type: TASK_TYPE.to_string(),
                slot: other.to_string(),
            }
            .into()),
        }
    }
}
