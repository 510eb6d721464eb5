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

//! Persistent document models.
//!
//! These are the only shared mutable records in the system: task states,
//! messages, and semaphores. All of them serialize with serde; JSON is the
//! versioned contract between task creation and task execution.

pub mod message;
pub mod result;
pub mod semaphore;
pub mod task_state;

pub use message::{Message, MessageSchedule, MessageStatus};
pub use result::TaskResult;
pub use semaphore::Semaphore;
pub use task_state::{TaskOptions, TaskState, TaskStatus};
