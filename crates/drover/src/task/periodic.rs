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

//! Periodic: fixed-interval re-scheduling of a single subtask.
//!
//! The periodic task wraps a subtask template and a stored argument list.
//! Each completion of the subtask re-enters `reschedule_subtask`, which
//! advances `next` by whole interval multiples until it is in the future
//! (missed ticks are skipped, never replayed back-to-back), then resets
//! the subtask and defers a fresh `run` message to the new tick.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::dal::NewMessage;
use crate::engine::Engine;
use crate::error::TaskError;
use crate::models::message::Message;
use crate::models::task_state::TaskStatus;
use crate::registry::{Behavior, SlotOutcome};
use crate::store::ids::TaskId;
use crate::task::TaskHandle;

/// Registered type name.
pub const TASK_TYPE: &str = "periodic";

/// Slot the subtask's completion re-enters.
pub const RESCHEDULE_SUBTASK: &str = "reschedule_subtask";

/// Persistent payload of a periodic task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PeriodicData {
    /// Next tick.
    pub next: DateTime<Utc>,
    /// Interval between ticks, in seconds.
    pub interval_secs: i64,
    /// The wrapped subtask template.
    pub subtask_id: TaskId,
    /// Arguments delivered on every run.
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

/// Schedules `subtask` to run every `interval_secs` seconds, first at
/// `first`, with the given invocation arguments.
pub async fn schedule(
    engine: &Engine,
    subtask: &mut TaskHandle,
    first: DateTime<Utc>,
    interval_secs: i64,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
) -> Result<TaskHandle, TaskError> {
    let mut periodic = engine.create(TASK_TYPE, Vec::new(), Map::new()).await?;
    let data = PeriodicData {
        next: first,
        interval_secs,
        subtask_id: subtask.id(),
        args,
        kwargs,
    };
    let data_value = serde_json::to_value(&data)?;
    engine
        .dal()
        .tasks()
        .mutate(periodic.id(), |t| {
            t.data = data_value;
            t.status = TaskStatus::Active;
        })
        .await?;
    periodic.refresh().await?;
    schedule_run(&periodic, subtask, &data, first).await?;
    debug!(periodic = %periodic.id(), subtask = %subtask.id(), interval_secs, "periodic scheduled");
    Ok(periodic)
}

/// Cancels a periodic task: deletes the subtask, every pending message
/// for either of them, and the periodic task itself.
pub async fn cancel(periodic: &TaskHandle) -> Result<(), TaskError> {
    let data: PeriodicData = serde_json::from_value(periodic.state().data.clone())?;
    let dal = periodic.engine().dal();
    dal.messages()
        .delete_for_tasks(&[periodic.id(), data.subtask_id], None)
        .await?;
    dal.tasks().delete_children(periodic.id()).await;
    dal.tasks().delete(data.subtask_id).await?;
    dal.tasks().delete(periodic.id()).await?;
    debug!(periodic = %periodic.id(), "periodic cancelled");
    Ok(())
}

/// Advances a tick past `now` by whole interval multiples. Delayed ticks
/// are skipped, not replayed.
pub(crate) fn next_tick(previous: DateTime<Utc>, interval_secs: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    let interval = Duration::seconds(interval_secs.max(1));
    let mut next = previous + interval;
    while next <= now {
        next += interval;
    }
    next
}

/// Re-links the subtask's completion to the periodic task, resets the
/// subtask for another run, and defers a fresh `run` message to `at`.
async fn schedule_run(
    periodic: &TaskHandle,
    subtask: &mut TaskHandle,
    data: &PeriodicData,
    at: DateTime<Utc>,
) -> Result<(), TaskError> {
    let dal = periodic.engine().dal().clone();
    subtask
        .link(periodic.state(), RESCHEDULE_SUBTASK, Vec::new(), None)
        .await?;
    let periodic_id = periodic.id();
    dal.tasks()
        .mutate(subtask.id(), |t| {
            t.parent_id = Some(periodic_id);
            t.status = TaskStatus::Pending;
            t.result = None;
            t.options.ignore_result = false;
        })
        .await?;
    subtask.refresh().await?;
    let msg = dal
        .messages()
        .create(NewMessage::run(subtask.state(), data.args.clone(), data.kwargs.clone()).after(at))
        .await?;
    dal.messages().send(msg.id, Vec::new(), Map::new()).await?;
    Ok(())
}

pub(crate) struct PeriodicBehavior;

#[async_trait]
impl Behavior for PeriodicBehavior {
    fn type_name(&self) -> &str {
        TASK_TYPE
    }

    fn initial_data(&self, _args: Vec<Value>, _kwargs: Map<String, Value>) -> Result<Value, TaskError> {
        Ok(serde_json::json!({}))
    }

    async fn dispatch(&self, task: &mut TaskHandle, msg: &Message) -> Result<SlotOutcome, TaskError> {
        match msg.slot.as_str() {
            RESCHEDULE_SUBTASK => {
                let mut data: PeriodicData = serde_json::from_value(task.state().data.clone())?;
                let Some(sub_state) = task.engine().dal().tasks().try_get(data.subtask_id).await
                else {
                    warn!(periodic = %task.id(), "subtask gone; periodic stops rescheduling");
                    return Ok(SlotOutcome::Continue);
                };

                data.next = next_tick(data.next, data.interval_secs, Utc::now());
                let next = data.next;
                let data_value = serde_json::to_value(&data)?;
                task.engine()
                    .dal()
                    .tasks()
                    .mutate(task.id(), |t| t.data = data_value)
                    .await?;
                task.refresh().await?;

                let mut subtask = TaskHandle::new(task.engine().clone(), sub_state);
                schedule_run(task, &mut subtask, &data, next).await?;
                debug!(periodic = %task.id(), next = %next, "subtask rescheduled");
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
