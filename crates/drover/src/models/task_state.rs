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

//! Task State Model
//!
//! The persistent record of one task instance: its registered behavior
//! type, lifecycle status, options, opaque data payload, parent linkage,
//! completion callback, and the mutex queue enforcing the one-busy-message
//! invariant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::result::TaskResult;
use crate::store::ids::{MessageId, TaskId};

/// Default queue name for tasks that do not specify one.
pub const DEFAULT_QUEUE: &str = "default";

/// Default message priority.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Lifecycle status of a task.
///
/// `Suspended` and `FailChild` are transient sub-states used by
/// cooperative yielding and composite bookkeeping; `Success` and
/// `Failure` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    Active,
    Suspended,
    FailChild,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Suspended => "suspended",
            TaskStatus::FailChild => "fail-child",
            TaskStatus::Success => "success",
            TaskStatus::Failure => "failure",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling and behavior options attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Queue this task's messages are dispatched on.
    pub queue: String,
    /// Base priority for this task's messages (higher runs first).
    pub priority: i32,
    /// An immutable task ignores send-time arguments and runs with its
    /// curried arguments only.
    pub immutable: bool,
    /// Delete the task state on successful completion instead of keeping
    /// the result for retrieval.
    pub ignore_result: bool,
    /// Named semaphores each message must acquire before executing, in
    /// acquisition order. The task mutex is implicit and always last.
    pub semaphores: Vec<String>,
    /// Human-readable label for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            priority: DEFAULT_PRIORITY,
            immutable: false,
            ignore_result: false,
            semaphores: Vec::new(),
            path: None,
        }
    }
}

impl TaskOptions {
    pub fn on_queue(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Self::default()
        }
    }
}

/// The persistent state of one task instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    /// Unique identifier, assigned at creation.
    pub id: TaskId,
    /// Registered behavior name used for polymorphic dispatch.
    pub task_type: String,
    /// Weak back-reference to an owning composite task.
    pub parent_id: Option<TaskId>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Completion result, set exactly once.
    pub result: Option<TaskResult>,
    /// Behavior-specific payload (curried arguments, composite counters,
    /// periodic schedule data).
    pub data: Value,
    /// Scheduling and behavior options.
    pub options: TaskOptions,
    /// Message delivered when this task completes.
    pub on_complete: Option<MessageId>,
    /// FIFO of messages contending for this task's exclusive lock. The
    /// front element is the only message allowed to execute.
    pub mq: Vec<MessageId>,
}

impl TaskState {
    /// Builds a new task state document with a fresh random id. The
    /// document is not stored until inserted through the DAL.
    pub fn new(task_type: impl Into<String>, data: Value, status: TaskStatus, options: TaskOptions) -> Self {
        Self {
            id: TaskId::generate(),
            task_type: task_type.into(),
            parent_id: None,
            status,
            result: None,
            data,
            options,
            on_complete: None,
            mq: Vec::new(),
        }
    }

    /// Position of this task within its parent composite, if any.
    pub fn composite_position(&self) -> Option<usize> {
        self.data
            .get("composite_position")
            .and_then(Value::as_u64)
            .map(|p| p as usize)
    }
}
