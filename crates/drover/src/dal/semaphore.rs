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

//! Semaphore DAL: admission-list operations on named semaphores.

use tracing::debug;

use super::Dal;
use crate::error::StoreError;
use crate::models::semaphore::Semaphore;
use crate::resource::{admit, withdraw};
use crate::store::ids::MessageId;

/// Operations on the semaphore collection.
pub struct SemaphoreDal<'a> {
    dal: &'a Dal,
}

impl<'a> SemaphoreDal<'a> {
    pub(crate) fn new(dal: &'a Dal) -> Self {
        Self { dal }
    }

    /// Creates the semaphore with the given capacity if it does not exist.
    /// An existing semaphore keeps its current capacity and contention
    /// list (set-on-insert semantics).
    pub async fn ensure(&self, name: &str, value: i32) -> Result<Semaphore, StoreError> {
        let collection = self.dal.store().semaphores();
        if let Some(existing) = collection.get(&name.to_string()) {
            return Ok(existing);
        }
        let sem = Semaphore::new(name, value);
        match collection.insert(name.to_string(), sem.clone()) {
            Ok(()) => Ok(sem),
            // Lost a creation race; the other writer's document wins.
            Err(StoreError::DuplicateId { .. }) => collection.require(&name.to_string()),
            Err(e) => Err(e),
        }
    }

    /// Returns a snapshot of the semaphore.
    pub async fn get(&self, name: &str) -> Result<Semaphore, StoreError> {
        self.dal.store().semaphores().require(&name.to_string())
    }

    /// Atomically enqueues `id` and reports whether it is now inside the
    /// admission window.
    pub async fn acquire(&self, name: &str, id: MessageId) -> Result<bool, StoreError> {
        let (sem, admitted) = self
            .dal
            .store()
            .semaphores()
            .update_required(&name.to_string(), |sem| {
                let capacity = sem.value.max(0) as usize;
                admit(&mut sem.mq, capacity, id)
            })?;
        debug!(semaphore = %name, message = %id, admitted, contenders = sem.mq.len(), "semaphore acquire");
        Ok(admitted)
    }

    /// Atomically removes `id` and returns the ids newly inside the
    /// window. Errors if `id` was never enqueued on this semaphore.
    pub async fn release(&self, name: &str, id: MessageId) -> Result<Vec<MessageId>, StoreError> {
        let (_, withdrawn) = self
            .dal
            .store()
            .semaphores()
            .update_required(&name.to_string(), |sem| {
                let capacity = sem.value.max(0) as usize;
                withdraw(&mut sem.mq, capacity, id)
            })?;
        let woken = withdrawn.ok_or_else(|| StoreError::not_holding(name, id))?;
        debug!(semaphore = %name, message = %id, woken = woken.len(), "semaphore release");
        Ok(woken)
    }
}
