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

//! Task Result Model
//!
//! The tagged completion outcome of a task: a success value, a failure
//! descriptor, or a group aggregate carrying the ordered sub-results.
//! Results always name their originating task and travel as JSON when
//! delivered through completion callbacks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FailureInfo, TaskError};
use crate::store::ids::TaskId;

/// The completion outcome of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    Success {
        task_id: TaskId,
        value: Value,
    },
    Failure {
        task_id: TaskId,
        error: FailureInfo,
    },
    /// Aggregate of a group's children, in append order.
    Group {
        task_id: TaskId,
        sub: Vec<TaskResult>,
    },
}

impl TaskResult {
    pub fn success(task_id: TaskId, value: Value) -> Self {
        TaskResult::Success { task_id, value }
    }

    pub fn failure(task_id: TaskId, error: FailureInfo) -> Self {
        TaskResult::Failure { task_id, error }
    }

    pub fn group(task_id: TaskId, sub: Vec<TaskResult>) -> Self {
        TaskResult::Group { task_id, sub }
    }

    /// The originating task.
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskResult::Success { task_id, .. }
            | TaskResult::Failure { task_id, .. }
            | TaskResult::Group { task_id, .. } => *task_id,
        }
    }

    /// Re-tags the result with a different originating task (used when a
    /// pipeline adopts its final stage's result).
    pub fn set_task_id(&mut self, id: TaskId) {
        match self {
            TaskResult::Success { task_id, .. }
            | TaskResult::Failure { task_id, .. }
            | TaskResult::Group { task_id, .. } => *task_id = id,
        }
    }

    /// A group aggregate succeeds only if every child succeeded.
    pub fn is_success(&self) -> bool {
        match self {
            TaskResult::Success { .. } => true,
            TaskResult::Failure { .. } => false,
            TaskResult::Group { sub, .. } => sub.iter().all(TaskResult::is_success),
        }
    }

    pub fn status_str(&self) -> &'static str {
        if self.is_success() {
            "success"
        } else {
            "failure"
        }
    }

    /// Ordered sub-results for group aggregates.
    pub fn sub_results(&self) -> Option<&[TaskResult]> {
        match self {
            TaskResult::Group { sub, .. } => Some(sub),
            _ => None,
        }
    }

    /// Unwraps the result: the success value, the ordered list of child
    /// values for a group, or the stored failure re-raised as
    /// [`TaskError::Failed`].
    pub fn get(&self) -> Result<Value, TaskError> {
        match self {
            TaskResult::Success { value, .. } => Ok(value.clone()),
            TaskResult::Failure { error, .. } => Err(TaskError::Failed(error.clone())),
            TaskResult::Group { sub, .. } => {
                let mut values = Vec::with_capacity(sub.len());
                for result in sub {
                    values.push(result.get()?);
                }
                Ok(Value::Array(values))
            }
        }
    }

    /// Encodes the result for delivery as a message argument. If encoding
    /// fails, falls back to a minimal textual failure representation
    /// rather than losing the outcome.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "status": "failure",
                "task_id": self.task_id(),
                "error": {
                    "kind": "encoding",
                    "message": format!("result could not be encoded: {}", e),
                },
            })
        })
    }

    /// Decodes a result delivered as a message argument.
    pub fn from_value(value: &Value) -> Result<Self, TaskError> {
        Ok(serde_json::from_value(value.clone())?)
    }
}
