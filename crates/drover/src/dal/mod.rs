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

//! Data Access Layer.
//!
//! `Dal` is the single facade over the document store: entity-specific
//! DALs hang off it (`tasks()`, `messages()`, `semaphores()`), and every
//! operation they expose is a single atomic find-and-modify against one
//! document. The message DAL owns the reservation protocol; the task and
//! semaphore DALs own the admission lists it walks.
//!
//! # Thread Safety
//!
//! `Dal` is `Clone` and can be shared freely; clones reference the same
//! underlying store and event bus.

pub mod message;
pub mod semaphore;
pub mod task_state;

use std::sync::Arc;

use crate::bus::EventBus;
use crate::store::Store;

pub use message::{MessageDal, NewMessage};
pub use semaphore::SemaphoreDal;
pub use task_state::TaskStateDal;

/// The unified Data Access Layer facade.
#[derive(Clone)]
pub struct Dal {
    store: Store,
    bus: Arc<dyn EventBus>,
}

impl Dal {
    /// Creates a new DAL over a store and notification bus.
    pub fn new(store: Store, bus: Arc<dyn EventBus>) -> Self {
        Dal { store, bus }
    }

    /// The underlying store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The notification bus.
    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// Task state operations.
    pub fn tasks(&self) -> TaskStateDal<'_> {
        TaskStateDal::new(self)
    }

    /// Message operations, including the reservation protocol.
    pub fn messages(&self) -> MessageDal<'_> {
        MessageDal::new(self)
    }

    /// Semaphore operations.
    pub fn semaphores(&self) -> SemaphoreDal<'_> {
        SemaphoreDal::new(self)
    }
}
