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

//! Semaphore Model
//!
//! A named counting resource: a single FIFO contention list whose first
//! `value` entries form the active admission window. Membership in the
//! window is what it means to hold the semaphore.

use serde::{Deserialize, Serialize};

use crate::store::ids::MessageId;

/// A named capacity-`value` admission list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Semaphore {
    /// Semaphore name.
    pub id: String,
    /// Capacity: how many contenders hold the semaphore at once.
    pub value: i32,
    /// FIFO contention list; the first `value` entries are the active
    /// window.
    pub mq: Vec<MessageId>,
}

impl Semaphore {
    pub fn new(id: impl Into<String>, value: i32) -> Self {
        Self {
            id: id.into(),
            value,
            mq: Vec::new(),
        }
    }

    /// The ids currently inside the admission window.
    pub fn active(&self) -> &[MessageId] {
        let cap = self.window();
        &self.mq[..cap.min(self.mq.len())]
    }

    /// The ids waiting behind the window.
    pub fn queued(&self) -> &[MessageId] {
        let cap = self.window();
        if self.mq.len() > cap {
            &self.mq[cap..]
        } else {
            &[]
        }
    }

    /// Whether `id` currently holds the semaphore.
    pub fn holds(&self, id: MessageId) -> bool {
        self.active().contains(&id)
    }

    fn window(&self) -> usize {
        self.value.max(0) as usize
    }
}
