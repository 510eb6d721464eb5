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

//! Chain: dynamic continuation for stackless recursion.
//!
//! A function body that returns a chain instruction spawns a fresh task
//! and suspends; a throwaway chain wrapper links the continuation's
//! completion back to the *caller*, so each recursive step is a new
//! message dispatch rather than a nested call. When the continuation
//! completes, the wrapper forwards the result to the caller's
//! `complete`, cleans up, and deletes itself, leaving only the original
//! task holding the final result.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{FailureInfo, StoreError, TaskError};
use crate::models::message::Message;
use crate::models::task_state::TaskStatus;
use crate::registry::{Behavior, SlotOutcome};
use crate::task::function::ChainCall;
use crate::task::{composite, TaskHandle};

/// Registered type name.
pub const TASK_TYPE: &str = "chain";

/// Spawns the continuation named by `call` and suspends the calling
/// task. The continuation's eventual result becomes the caller's own.
pub(crate) async fn call(
    calling: &mut TaskHandle,
    call: ChainCall,
) -> Result<SlotOutcome, TaskError> {
    let engine = calling.engine().clone();
    let mut continuation = engine
        .create(&call.task_type, Vec::new(), Map::new())
        .await?;

    // The wrapper rides the caller's queue so the same workers see its
    // callback messages.
    let calling_queue = calling.state().options.queue.clone();
    let mut wrapper = engine
        .create_with(TASK_TYPE, Vec::new(), Map::new(), |o| o.queue = calling_queue)
        .await?;
    composite::append(&mut wrapper, &mut continuation).await?;

    let calling_id = calling.id();
    engine
        .dal()
        .tasks()
        .mutate(wrapper.id(), |t| {
            t.parent_id = Some(calling_id);
            t.status = TaskStatus::Active;
        })
        .await?;

    continuation.start(call.args, call.kwargs).await?;
    debug!(caller = %calling_id, wrapper = %wrapper.id(), continuation = %continuation.id(), "chained continuation started");
    Ok(SlotOutcome::Suspend(TaskStatus::Suspended))
}

pub(crate) struct ChainBehavior;

#[async_trait]
impl Behavior for ChainBehavior {
    fn type_name(&self) -> &str {
        TASK_TYPE
    }

    fn initial_data(&self, _args: Vec<Value>, _kwargs: Map<String, Value>) -> Result<Value, TaskError> {
        Ok(composite::initial_data())
    }

    async fn dispatch(&self, task: &mut TaskHandle, msg: &Message) -> Result<SlotOutcome, TaskError> {
        match msg.slot.as_str() {
            composite::RETIRE_SUBTASK => {
                let (result, _position) = composite::parse_retire_args(msg)?;
                let caller_id = task.state().parent_id.ok_or_else(|| {
                    TaskError::Failed(FailureInfo::new(
                        "malformed-chain",
                        format!("chain wrapper {} has no caller", task.id()),
                    ))
                })?;
                match task.engine().task(caller_id).await {
                    Ok(mut caller) => caller.complete(result).await?,
                    Err(TaskError::Store(StoreError::NotFound { .. })) => {
                        warn!(wrapper = %task.id(), caller = %caller_id, "chain caller already forgotten");
                    }
                    Err(e) => return Err(e),
                }
                composite::remove_subtasks(task, Some(msg.id)).await?;
                task.engine().dal().tasks().delete(task.id()).await?;
                Ok(SlotOutcome::Continue)
            }
            other => Err(crate::error::RegistryError::UnknownSlot {
                task_type: TASK_TYPE.to_string(),
                slot: other.to_string(),
            }
            .into()),
        }
    }
}
