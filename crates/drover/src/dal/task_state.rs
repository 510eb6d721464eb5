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

//! Task state DAL: lifecycle updates, the result write-once guard, the
//! task-mutex admission list, and parent/child queries for composites.

use tracing::{debug, info};

use super::Dal;
use crate::error::StoreError;
use crate::models::result::TaskResult;
use crate::models::task_state::{TaskState, TaskStatus};
use crate::resource::{admit, withdraw};
use crate::store::ids::{MessageId, TaskId};

/// Operations on the task state collection.
pub struct TaskStateDal<'a> {
    dal: &'a Dal,
}

impl<'a> TaskStateDal<'a> {
    pub(crate) fn new(dal: &'a Dal) -> Self {
        Self { dal }
    }

    /// Inserts a freshly constructed task state. An id collision is a
    /// fatal creation error.
    pub async fn create(&self, state: TaskState) -> Result<TaskState, StoreError> {
        self.dal.store().tasks().insert(state.id, state.clone())?;
        debug!(task = %state.id, task_type = %state.task_type, "task state created");
        Ok(state)
    }

    /// Returns the task state or a `NotFound` error.
    pub async fn get(&self, id: TaskId) -> Result<TaskState, StoreError> {
        self.dal.store().tasks().require(&id)
    }

    /// Returns the task state if it still exists.
    pub async fn try_get(&self, id: TaskId) -> Option<TaskState> {
        self.dal.store().tasks().get(&id)
    }

    /// Atomically mutates the task state, returning the closure's output
    /// alongside the new document.
    pub async fn mutate<R>(
        &self,
        id: TaskId,
        f: impl FnOnce(&mut TaskState) -> R,
    ) -> Result<(TaskState, R), StoreError> {
        self.dal.store().tasks().update_required(&id, f)
    }

    /// Sets the task's status.
    pub async fn set_status(&self, id: TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let (state, prev) = self
            .dal
            .store()
            .tasks()
            .update_required(&id, |t| std::mem::replace(&mut t.status, status))?;
        if prev != status {
            info!(task = %id, task_type = %state.task_type, from = %prev, to = %status, "task state change");
        }
        Ok(())
    }

    /// Stores the completion result and terminal status, exactly once:
    /// the write only applies while the task is non-terminal. Returns the
    /// updated state, or `None` if the task had already completed.
    pub async fn set_result(
        &self,
        id: TaskId,
        result: &TaskResult,
    ) -> Result<Option<TaskState>, StoreError> {
        let status = if result.is_success() {
            TaskStatus::Success
        } else {
            TaskStatus::Failure
        };
        let (state, applied) = self.dal.store().tasks().update_required(&id, |t| {
            if t.status.is_terminal() {
                false
            } else {
                t.status = status;
                t.result = Some(result.clone());
                true
            }
        })?;
        if applied {
            info!(task = %id, task_type = %state.task_type, status = %status, "task completed");
            Ok(Some(state))
        } else {
            debug!(task = %id, "result write skipped; task already terminal");
            Ok(None)
        }
    }

    /// Records the completion-callback message for a task.
    pub async fn set_on_complete(&self, id: TaskId, msg_id: MessageId) -> Result<(), StoreError> {
        self.mutate(id, |t| t.on_complete = Some(msg_id)).await?;
        Ok(())
    }

    /// Deletes the task state. Missing documents are fine (already
    /// forgotten).
    pub async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        if self.dal.store().tasks().delete(&id).is_some() {
            debug!(task = %id, "task state deleted");
        }
        Ok(())
    }

    /// Returns the direct children of a composite, ordered by their
    /// append position.
    pub async fn children(&self, parent_id: TaskId) -> Vec<TaskState> {
        self.dal.store().tasks().find_sorted(
            |t| t.parent_id == Some(parent_id),
            |t| t.composite_position().unwrap_or(usize::MAX),
        )
    }

    /// Returns the child at a specific append position, if any.
    pub async fn child_at(&self, parent_id: TaskId, position: usize) -> Option<TaskState> {
        self.dal
            .store()
            .tasks()
            .find(|t| t.parent_id == Some(parent_id) && t.composite_position() == Some(position))
            .into_iter()
            .next()
    }

    /// Deletes every direct child of a composite; returns how many were
    /// removed.
    pub async fn delete_children(&self, parent_id: TaskId) -> usize {
        let removed = self
            .dal
            .store()
            .tasks()
            .delete_many(|t| t.parent_id == Some(parent_id));
        if removed > 0 {
            debug!(task = %parent_id, removed, "removed subtask states");
        }
        removed
    }

    /// Atomically enqueues a message on the task's exclusive lock and
    /// reports whether it is now the holder (front of the queue).
    pub async fn lock_acquire(&self, task_id: TaskId, id: MessageId) -> Result<bool, StoreError> {
        let (state, admitted) = self
            .dal
            .store()
            .tasks()
            .update_required(&task_id, |t| admit(&mut t.mq, 1, id))?;
        debug!(task = %task_id, message = %id, admitted, contenders = state.mq.len(), "task lock acquire");
        Ok(admitted)
    }

    /// Atomically removes a message from the task's lock queue and
    /// returns the id newly at the front, if any. Errors if `id` was
    /// never enqueued.
    pub async fn lock_release(
        &self,
        task_id: TaskId,
        id: MessageId,
    ) -> Result<Vec<MessageId>, StoreError> {
        let (_, withdrawn) = self
            .dal
            .store()
            .tasks()
            .update_required(&task_id, |t| withdraw(&mut t.mq, 1, id))?;
        let woken = withdrawn.ok_or_else(|| StoreError::not_holding("task-lock", id))?;
        debug!(task = %task_id, message = %id, woken = woken.len(), "task lock release");
        Ok(woken)
    }
}
