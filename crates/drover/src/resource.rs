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

//! Admission-control resources consulted during message reservation.
//!
//! A resource is a FIFO admission list with a capacity window: `acquire`
//! enqueues a message id (idempotently) and reports whether the id now
//! sits inside the window; `release` removes it and returns the ids that
//! shifted into the window as a result, which the caller must wake.
//!
//! Two concrete resources share this mechanism: named semaphores
//! (capacity N, stored in the semaphore collection) and the implicit
//! per-task mutex (capacity 1, stored as the task state's `mq` list).
//! A message's resource sequence is deterministic: its named semaphores
//! in declaration order, then the task mutex last. Acquisition walks the
//! sequence forward; release walks it in reverse.

use crate::dal::Dal;
use crate::error::StoreError;
use crate::models::message::Message;
use crate::store::ids::{MessageId, TaskId};

/// One admission-control resource in a message's acquisition sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// A named capacity-N semaphore.
    Semaphore(String),
    /// The capacity-1 exclusive lock on a task.
    TaskLock(TaskId),
}

impl Resource {
    /// The ordered resource sequence for a message: named semaphores
    /// first, the task mutex last.
    pub fn for_message(msg: &Message) -> Vec<Resource> {
        let mut resources: Vec<Resource> = msg
            .semaphores
            .iter()
            .cloned()
            .map(Resource::Semaphore)
            .collect();
        resources.push(Resource::TaskLock(msg.task_id));
        resources
    }

    /// Diagnostic name.
    pub fn name(&self) -> String {
        match self {
            Resource::Semaphore(name) => format!("semaphore:{}", name),
            Resource::TaskLock(task_id) => format!("task:{}", task_id),
        }
    }

    /// Atomically enqueues `id` on this resource and reports whether it
    /// now holds the resource (sits inside the capacity window). Already
    /// enqueued ids are not re-pushed, so re-entry after a partial
    /// acquisition is safe.
    pub async fn acquire(&self, dal: &Dal, id: MessageId) -> Result<bool, StoreError> {
        match self {
            Resource::Semaphore(name) => dal.semaphores().acquire(name, id).await,
            Resource::TaskLock(task_id) => dal.tasks().lock_acquire(*task_id, id).await,
        }
    }

    /// Atomically removes `id` from this resource and returns the ids
    /// newly inside the capacity window. Errors if `id` was never
    /// enqueued.
    pub async fn release(&self, dal: &Dal, id: MessageId) -> Result<Vec<MessageId>, StoreError> {
        match self {
            Resource::Semaphore(name) => dal.semaphores().release(name, id).await,
            Resource::TaskLock(task_id) => dal.tasks().lock_release(*task_id, id).await,
        }
    }

    /// Like [`release`](Self::release), but treats an id that was never
    /// enqueued (or a missing resource document) as a no-op. Used when
    /// cleaning up deleted or cancelled messages.
    pub async fn try_release(&self, dal: &Dal, id: MessageId) -> Result<Vec<MessageId>, StoreError> {
        match self.release(dal, id).await {
            Ok(woken) => Ok(woken),
            Err(StoreError::InvalidState { .. }) | Err(StoreError::NotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// Enqueues `id` (idempotently) and reports window membership.
pub(crate) fn admit(mq: &mut Vec<MessageId>, capacity: usize, id: MessageId) -> bool {
    if !mq.contains(&id) {
        mq.push(id);
    }
    mq.iter().take(capacity).any(|m| *m == id)
}

/// Removes `id` and returns the ids that moved from outside the window to
/// inside it. `None` if `id` was not enqueued.
pub(crate) fn withdraw(
    mq: &mut Vec<MessageId>,
    capacity: usize,
    id: MessageId,
) -> Option<Vec<MessageId>> {
    let pos = mq.iter().position(|m| *m == id)?;
    mq.remove(pos);
    let newly_eligible = mq
        .iter()
        .enumerate()
        .filter(|(new_pos, _)| {
            // The old position of a remaining id is shifted by one past the
            // removal point.
            let old_pos = if *new_pos >= pos { *new_pos + 1 } else { *new_pos };
            *new_pos < capacity && old_pos >= capacity
        })
        .map(|(_, m)| *m)
        .collect();
    Some(newly_eligible)
}
