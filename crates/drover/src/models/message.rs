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

//! Message Model
//!
//! The persistent record of one pending or in-flight invocation on a task:
//! target slot, call arguments, and the scheduling metadata driving the
//! reservation state machine (`Pending -> Ready -> Acquire -> {Busy |
//! Queued}`, with `Queued -> Ready` on wake).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::ids::{MessageId, TaskId};

/// Reservation status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageStatus {
    /// Created but not yet sent; invisible to workers.
    Pending,
    /// Eligible for reservation.
    Ready,
    /// Claimed by a worker that is walking the resource sequence.
    Acquire,
    /// Parked on a full resource; woken when the resource releases.
    Queued,
    /// All resources held; the handler is executing.
    Busy,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Ready => "ready",
            MessageStatus::Acquire => "acquire",
            MessageStatus::Queued => "queued",
            MessageStatus::Busy => "busy",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling metadata for a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSchedule {
    /// Reservation status.
    pub status: MessageStatus,
    /// Resume index into the resource-acquisition sequence. A reservation
    /// that already acquired resources on a prior attempt resumes here
    /// instead of starting over.
    pub sub_status: usize,
    /// Selection priority; higher is reserved first.
    pub priority: i32,
    /// Creation time, for observability.
    pub timestamp: DateTime<Utc>,
    /// Monotonic sequence number; the FIFO tie-break within a priority.
    pub seq: u64,
    /// Do not reserve before this time.
    pub after: Option<DateTime<Utc>>,
    /// Queue this message is dispatched on.
    pub queue: String,
    /// Claiming worker identity; `None` when unclaimed.
    pub worker: Option<String>,
}

/// A persisted, queued invocation request targeting one task's slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, assigned at creation.
    pub id: MessageId,
    /// Target task.
    pub task_id: TaskId,
    /// Behavior method to invoke.
    pub slot: String,
    /// Positional arguments. Send-time arguments are prepended to these.
    pub args: Vec<Value>,
    /// Keyword arguments. Send-time keywords override these.
    pub kwargs: Map<String, Value>,
    /// Scheduling metadata.
    pub schedule: MessageSchedule,
    /// Named semaphores to acquire before the implicit task mutex, in
    /// order.
    pub semaphores: Vec<String>,
    /// Wake flag: set when a wake arrives while a reservation is
    /// mid-acquisition, so the acquire walk retries instead of parking
    /// into a missed wakeup.
    pub signalled: bool,
}

impl Message {
    /// Whether this message is eligible for reservation at `now` on one of
    /// `queues`.
    pub fn is_claimable(&self, queues: &[String], now: DateTime<Utc>) -> bool {
        self.schedule.status == MessageStatus::Ready
            && queues.iter().any(|q| *q == self.schedule.queue)
            && self.schedule.after.map_or(true, |after| after <= now)
    }

    /// Selection order: resumable acquisitions first (highest
    /// `sub_status`), then priority, then FIFO.
    pub fn claim_order(&self) -> (std::cmp::Reverse<usize>, std::cmp::Reverse<i32>, u64) {
        (
            std::cmp::Reverse(self.schedule.sub_status),
            std::cmp::Reverse(self.schedule.priority),
            self.schedule.seq,
        )
    }
}
