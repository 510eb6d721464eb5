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

//! Document identifiers.
//!
//! Ids are random non-negative 63-bit integers. Collisions are not
//! avoided by construction; instead
//! [`Collection::insert`](crate::store::Collection::insert) treats a
//! duplicate as a fatal creation error, which at 63 bits of entropy is
//! effectively unreachable.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A random 63-bit document identifier.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DocId(pub i64);

impl DocId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        DocId(rand::thread_rng().gen_range(0..i64::MAX))
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<i64> for DocId {
    fn from(raw: i64) -> Self {
        DocId(raw)
    }
}

/// Identifier of a [`TaskState`](crate::models::task_state::TaskState) document.
pub type TaskId = DocId;

/// Identifier of a [`Message`](crate::models::message::Message) document.
pub type MessageId = DocId;
