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

//! Shared composite-task bookkeeping.
//!
//! Composites count their children (`n_subtask`) and the completions they
//! still expect (`n_waiting`) in their `data`, and learn of each child's
//! completion through a linked `retire_subtask` message carrying the
//! child's result and append position. The retire message runs at the
//! child's priority plus one so completion callbacks outrank new work.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{FailureInfo, TaskError};
use crate::models::message::Message;
use crate::models::result::TaskResult;
use crate::models::task_state::TaskStatus;
use crate::store::ids::MessageId;
use crate::task::TaskHandle;

/// Slot every composite receives child completions on.
pub const RETIRE_SUBTASK: &str = "retire_subtask";

/// Initial bookkeeping payload for a composite.
pub(crate) fn initial_data() -> Value {
    json!({ "n_subtask": 0, "n_waiting": 0 })
}

/// Appends a subtask to a composite: bumps the counters, records the
/// child's position, re-parents it, forces its `ignore_result` off (the
/// parent needs the completion), and wires its completion callback to the
/// parent's `retire_subtask` slot.
pub async fn append(parent: &mut TaskHandle, child: &mut TaskHandle) -> Result<usize, TaskError> {
    let dal = parent.engine().dal().clone();
    let (parent_state, position) = dal
        .tasks()
        .mutate(parent.id(), |t| {
            let position = bump(&mut t.data, "n_subtask", 1) - 1;
            bump(&mut t.data, "n_waiting", 1);
            position as usize
        })
        .await?;

    let callback_priority = child.state().options.priority + 1;
    child
        .link(
            &parent_state,
            RETIRE_SUBTASK,
            vec![json!(position)],
            Some(callback_priority),
        )
        .await?;

    let parent_id = parent.id();
    dal.tasks()
        .mutate(child.id(), |t| {
            t.parent_id = Some(parent_id);
            t.data["composite_position"] = json!(position);
            t.options.ignore_result = false;
        })
        .await?;
    child.refresh().await?;
    parent.refresh().await?;
    debug!(parent = %parent.id(), child = %child.id(), position, "subtask appended");
    Ok(position)
}

/// Starts every still-pending child with the given send-time arguments.
pub(crate) async fn start_pending_children(
    task: &TaskHandle,
    args: &[Value],
    kwargs: &Map<String, Value>,
) -> Result<(), TaskError> {
    let children = task.engine().dal().tasks().children(task.id()).await;
    for child in children {
        if child.status == TaskStatus::Pending {
            let mut handle = TaskHandle::new(task.engine().clone(), child);
            handle.start(args.to_vec(), kwargs.clone()).await?;
        }
    }
    Ok(())
}

/// Decrements `n_waiting`, returning the remaining count.
pub(crate) async fn finish_one(task: &TaskHandle) -> Result<i64, TaskError> {
    let (_, remaining) = task
        .engine()
        .dal()
        .tasks()
        .mutate(task.id(), |t| bump(&mut t.data, "n_waiting", -1))
        .await?;
    Ok(remaining)
}

/// Deletes all child task states and every pending message targeting this
/// composite or its children, leaving no orphaned records behind. The
/// in-flight message currently being handled is excluded; it still holds
/// the composite's lock and is retired by the normal dispatch path.
pub async fn remove_subtasks(task: &TaskHandle, exclude: Option<MessageId>) -> Result<(), TaskError> {
    let dal = task.engine().dal();
    let children = dal.tasks().children(task.id()).await;
    let mut doomed: Vec<_> = children.iter().map(|c| c.id).collect();
    doomed.push(task.id());
    dal.messages().delete_for_tasks(&doomed, exclude).await?;
    dal.tasks().delete_children(task.id()).await;
    Ok(())
}

/// Decodes the `(result, position)` argument pair of a `retire_subtask`
/// message.
pub(crate) fn parse_retire_args(msg: &Message) -> Result<(TaskResult, usize), TaskError> {
    let result = msg
        .args
        .first()
        .ok_or_else(|| malformed(msg, "missing result argument"))
        .and_then(TaskResult::from_value)?;
    let position = msg
        .args
        .get(1)
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed(msg, "missing position argument"))?;
    Ok((result, position as usize))
}

fn malformed(msg: &Message, what: &str) -> TaskError {
    TaskError::Failed(FailureInfo::new(
        "malformed-callback",
        format!("retire_subtask message {}: {}", msg.id, what),
    ))
}

/// Adds `delta` to an integer counter stored in a JSON object, returning
/// the new value.
pub(crate) fn bump(data: &mut Value, key: &str, delta: i64) -> i64 {
    let current = data.get(key).and_then(Value::as_i64).unwrap_or(0);
    let next = current + delta;
    data[key] = json!(next);
    next
}
