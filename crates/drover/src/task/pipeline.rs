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

//! Pipeline: sequential feed-forward composition.
//!
//! `run` starts only the first stage. Each completion either short-circuits
//! the pipeline (failure), starts the next stage with the prior value as
//! leading argument (immutable stages receive nothing and run on their
//! curried arguments), or, after the last stage, retires with that
//! result re-tagged as the pipeline's own.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::engine::Engine;
use crate::error::TaskError;
use crate::models::message::Message;
use crate::models::result::TaskResult;
use crate::models::task_state::TaskOptions;
use crate::registry::{Behavior, SlotOutcome};
use crate::task::{composite, TaskHandle};

/// Registered type name.
pub const TASK_TYPE: &str = "pipeline";

/// Creates a pipeline over `stages` with default options.
pub async fn new(engine: &Engine, stages: Vec<TaskHandle>) -> Result<TaskHandle, TaskError> {
    new_with_options(engine, stages, TaskOptions::default()).await
}

/// Creates a pipeline over `stages` with explicit options.
pub async fn new_with_options(
    engine: &Engine,
    stages: Vec<TaskHandle>,
    options: TaskOptions,
) -> Result<TaskHandle, TaskError> {
    let mut pipeline = engine
        .create_with(TASK_TYPE, Vec::new(), Map::new(), |o| *o = options)
        .await?;
    for mut stage in stages {
        composite::append(&mut pipeline, &mut stage).await?;
    }
    Ok(pipeline)
}

/// Finalizes the pipeline with `result`, adopting it as the pipeline's
/// own.
async fn retire(
    task: &TaskHandle,
    msg: &Message,
    mut result: TaskResult,
) -> Result<SlotOutcome, TaskError> {
    result.set_task_id(task.id());
    composite::remove_subtasks(task, Some(msg.id)).await?;
    debug!(pipeline = %task.id(), status = result.status_str(), "pipeline retiring");
    Ok(SlotOutcome::Complete(result))
}

pub(crate) struct PipelineBehavior;

#[async_trait]
impl Behavior for PipelineBehavior {
    fn type_name(&self) -> &str {
        TASK_TYPE
    }

    fn initial_data(&self, _args: Vec<Value>, _kwargs: Map<String, Value>) -> Result<Value, TaskError> {
        Ok(composite::initial_data())
    }

    async fn dispatch(&self, task: &mut TaskHandle, msg: &Message) -> Result<SlotOutcome, TaskError> {
        match msg.slot.as_str() {
            "run" => {
                let first = task.engine().dal().tasks().child_at(task.id(), 0).await;
                match first {
                    Some(stage) => {
                        let mut handle = TaskHandle::new(task.engine().clone(), stage);
                        handle.start(msg.args.clone(), msg.kwargs.clone()).await?;
                        Ok(SlotOutcome::Continue)
                    }
                    // An empty pipeline has nothing to do.
                    None => Ok(SlotOutcome::Complete(TaskResult::success(
                        task.id(),
                        Value::Null,
                    ))),
                }
            }
            composite::RETIRE_SUBTASK => {
                let (result, position) = composite::parse_retire_args(msg)?;
                composite::finish_one(task).await?;
                if !result.is_success() {
                    // A failed stage fails the whole pipeline; later
                    // stages are never started.
                    return retire(task, msg, result).await;
                }
                let next = task
                    .engine()
                    .dal()
                    .tasks()
                    .child_at(task.id(), position + 1)
                    .await;
                match next {
                    None => retire(task, msg, result).await,
                    Some(stage) => {
                        let mut handle = TaskHandle::new(task.engine().clone(), stage);
                        if handle.state().options.immutable {
                            handle.start(Vec::new(), Map::new()).await?;
                        } else {
                            let value = result.get()?;
                            handle.start(vec![value], Map::new()).await?;
                        }
                        Ok(SlotOutcome::Continue)
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
