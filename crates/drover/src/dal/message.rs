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

//! Message DAL: creation, sending, and the reservation protocol.
//!
//! The reservation state machine is built entirely from single-document
//! atomic operations:
//!
//! ```text
//! Pending --send--> Ready --reserve--> Acquire --all resources--> Busy
//!                     ^                   |                         |
//!                     |                park on full resource        |
//!                     +---wake------- Queued                     retire
//! ```
//!
//! A reservation that parks records how far it got in `sub_status`; when
//! woken and re-reserved it resumes from that index instead of
//! re-acquiring. Every transition out of `Acquire` is a compare-and-swap
//! guarded on the current status (and the wake flag, for parking), so a
//! concurrent wake or unlock can never be lost; at worst the reservation
//! aborts and the message is picked up again.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::Dal;
use crate::bus::{Event, EventKind};
use crate::error::StoreError;
use crate::models::message::{Message, MessageSchedule, MessageStatus};
use crate::models::task_state::TaskState;
use crate::resource::Resource;
use crate::store::ids::{MessageId, TaskId};

/// Parameters for creating a message.
pub struct NewMessage<'a> {
    /// Target task; the message inherits its queue, priority, and
    /// semaphore list.
    pub task: &'a TaskState,
    /// Behavior slot to invoke.
    pub slot: &'a str,
    /// Construction-time positional arguments.
    pub args: Vec<Value>,
    /// Construction-time keyword arguments.
    pub kwargs: Map<String, Value>,
    /// Do not reserve before this time.
    pub after: Option<DateTime<Utc>>,
    /// Overrides the task's base priority when set.
    pub priority: Option<i32>,
}

impl<'a> NewMessage<'a> {
    pub fn run(task: &'a TaskState, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self::slot(task, "run", args, kwargs)
    }

    pub fn slot(task: &'a TaskState, slot: &'a str, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            task,
            slot,
            args,
            kwargs,
            after: None,
            priority: None,
        }
    }

    pub fn after(mut self, after: DateTime<Utc>) -> Self {
        self.after = Some(after);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Outcome of attempting to park a reservation on a full resource.
enum ParkOutcome {
    /// Parked as `Queued`; a later release will wake it.
    Parked,
    /// A wake raced in mid-walk; re-check admission instead of parking.
    Woken,
    /// The message left `Acquire` under us; the reservation is void.
    Lost,
}

/// Operations on the message collection.
pub struct MessageDal<'a> {
    dal: &'a Dal,
}

impl<'a> MessageDal<'a> {
    pub(crate) fn new(dal: &'a Dal) -> Self {
        Self { dal }
    }

    /// Creates a `Pending` message targeting a task. The message is
    /// invisible to workers until [`send`](Self::send).
    pub async fn create(&self, new: NewMessage<'_>) -> Result<Message, StoreError> {
        let msg = Message {
            id: MessageId::generate(),
            task_id: new.task.id,
            slot: new.slot.to_string(),
            args: new.args,
            kwargs: new.kwargs,
            schedule: MessageSchedule {
                status: MessageStatus::Pending,
                sub_status: 0,
                priority: new.priority.unwrap_or(new.task.options.priority),
                timestamp: Utc::now(),
                seq: self.dal.store().next_seq(),
                after: new.after,
                queue: new.task.options.queue.clone(),
                worker: None,
            },
            semaphores: new.task.options.semaphores.clone(),
            signalled: false,
        };
        self.dal.store().messages().insert(msg.id, msg.clone())?;
        debug!(message = %msg.id, task = %msg.task_id, slot = %msg.slot, "message created");
        Ok(msg)
    }

    /// Returns the message if it still exists.
    pub async fn try_get(&self, id: MessageId) -> Option<Message> {
        self.dal.store().messages().get(&id)
    }

    /// Marks a message `Ready` and notifies the queue channel. Send-time
    /// positional arguments are prepended to the stored arguments;
    /// send-time keywords override stored keywords.
    pub async fn send(
        &self,
        id: MessageId,
        prepend_args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Message, StoreError> {
        let (msg, published) = self.dal.store().messages().update_required(&id, |m| {
            if !prepend_args.is_empty() {
                let mut args = prepend_args;
                args.append(&mut m.args);
                m.args = args;
            }
            for (k, v) in kwargs {
                m.kwargs.insert(k, v);
            }
            match m.schedule.status {
                MessageStatus::Pending => {
                    m.schedule.status = MessageStatus::Ready;
                    true
                }
                MessageStatus::Ready => true,
                _ => false,
            }
        })?;
        if published {
            self.dal
                .bus()
                .publish(Event::work(msg.schedule.queue.clone(), EventKind::Send));
            debug!(message = %msg.id, task = %msg.task_id, slot = %msg.slot, "message sent");
        } else {
            warn!(message = %msg.id, status = %msg.schedule.status, "send on in-flight message ignored");
        }
        Ok(msg)
    }

    /// Reserves the next ready message on one of `queues` for `worker`.
    ///
    /// Returns `None` when nothing is claimable. Returns
    /// `Some((message, None))` when a message was selected but could not
    /// reach `Busy` (it parked on a full resource or its reservation was
    /// invalidated), and `Some((message, Some(task)))` once every resource
    /// in the message's sequence is held, which is the only path that
    /// yields work to execute.
    pub async fn reserve(
        &self,
        worker: &str,
        queues: &[String],
    ) -> Result<Option<(Message, Option<TaskState>)>, StoreError> {
        let now = Utc::now();
        let claimed = self.dal.store().messages().find_one_and_update(
            |m| m.is_claimable(queues, now),
            Message::claim_order,
            |m| {
                m.schedule.status = MessageStatus::Acquire;
                m.schedule.worker = Some(worker.to_string());
            },
        );
        let Some((msg, ())) = claimed else {
            return Ok(None);
        };
        debug!(
            message = %msg.id,
            task = %msg.task_id,
            slot = %msg.slot,
            worker,
            sub_status = msg.schedule.sub_status,
            "message claimed"
        );
        self.acquire_resources(msg).await
    }

    /// Walks the message's resource sequence from its resume index.
    async fn acquire_resources(
        &self,
        msg: Message,
    ) -> Result<Option<(Message, Option<TaskState>)>, StoreError> {
        let resources = Resource::for_message(&msg);
        let mut idx = msg.schedule.sub_status;
        while idx < resources.len() {
            let resource = &resources[idx];
            let admitted = match resource.acquire(self.dal, msg.id).await {
                Ok(admitted) => admitted,
                Err(StoreError::NotFound { collection: "task", .. }) => {
                    // The target task is gone; the message is an orphan.
                    return self.discard_orphan(msg, idx).await;
                }
                Err(e) => return Err(e),
            };
            if admitted {
                if !self.advance_sub_status(msg.id, idx + 1).await {
                    debug!(message = %msg.id, "reservation invalidated during acquire");
                    return Ok(Some((self.snapshot(msg), None)));
                }
                idx += 1;
            } else {
                match self.park(msg.id).await {
                    ParkOutcome::Parked => {
                        debug!(message = %msg.id, resource = %resource.name(), "message queued on full resource");
                        return Ok(Some((self.snapshot(msg), None)));
                    }
                    ParkOutcome::Woken => {
                        // The resource released while we were deciding to
                        // park; its window may now admit us.
                        continue;
                    }
                    ParkOutcome::Lost => {
                        debug!(message = %msg.id, "reservation invalidated while parking");
                        return Ok(Some((self.snapshot(msg), None)));
                    }
                }
            }
        }
        if !self.mark_busy(msg.id).await {
            debug!(message = %msg.id, "reservation invalidated before dispatch");
            return Ok(Some((self.snapshot(msg), None)));
        }
        match self.dal.tasks().try_get(msg.task_id).await {
            Some(state) => {
                let msg = self.snapshot(msg);
                debug!(message = %msg.id, task = %state.id, "message busy; all resources held");
                Ok(Some((msg, Some(state))))
            }
            // Deleted between the mutex acquisition and the load.
            None => self.discard_orphan(msg, resources.len()).await,
        }
    }

    /// Advances the acquisition resume index, contingent on the message
    /// still being in `Acquire`.
    async fn advance_sub_status(&self, id: MessageId, next: usize) -> bool {
        let updated = self.dal.store().messages().update(&id, |m| {
            if m.schedule.status == MessageStatus::Acquire {
                m.schedule.sub_status = next;
                true
            } else {
                false
            }
        });
        matches!(updated, Some((_, true)))
    }

    /// Parks an in-flight reservation as `Queued`, unless a wake raced in.
    async fn park(&self, id: MessageId) -> ParkOutcome {
        let updated = self.dal.store().messages().update(&id, |m| {
            if m.schedule.status != MessageStatus::Acquire {
                ParkOutcome::Lost
            } else if m.signalled {
                m.signalled = false;
                ParkOutcome::Woken
            } else {
                m.schedule.status = MessageStatus::Queued;
                ParkOutcome::Parked
            }
        });
        match updated {
            Some((_, outcome)) => outcome,
            None => ParkOutcome::Lost,
        }
    }

    /// Transitions `Acquire -> Busy`, clearing any stale wake flag.
    async fn mark_busy(&self, id: MessageId) -> bool {
        let updated = self.dal.store().messages().update(&id, |m| {
            if m.schedule.status == MessageStatus::Acquire {
                m.schedule.status = MessageStatus::Busy;
                m.signalled = false;
                true
            } else {
                false
            }
        });
        matches!(updated, Some((_, true)))
    }

    /// Retires a message: releases every held resource in reverse order,
    /// wakes the ids each release admitted, and deletes the document.
    /// This is the normal, no-redelivery end of a dispatch cycle.
    pub async fn retire(&self, id: MessageId) -> Result<(), StoreError> {
        let Some(doc) = self.dal.store().messages().get(&id) else {
            return Ok(());
        };
        self.release_all(&doc, true).await?;
        self.dal.store().messages().delete(&id);
        debug!(message = %id, task = %doc.task_id, slot = %doc.slot, "message retired");
        Ok(())
    }

    /// Releases a message's resources and resets it for redelivery from
    /// scratch: `Ready`, resume index zero, unclaimed. Conservative by
    /// construction: the redelivered message re-acquires everything.
    pub async fn unlock(&self, id: MessageId) -> Result<(), StoreError> {
        let Some(doc) = self.dal.store().messages().get(&id) else {
            return Ok(());
        };
        self.release_all(&doc, true).await?;
        let (msg, ()) = self.dal.store().messages().update_required(&id, |m| {
            m.schedule.status = MessageStatus::Ready;
            m.schedule.sub_status = 0;
            m.schedule.worker = None;
            m.signalled = false;
        })?;
        self.dal
            .bus()
            .publish(Event::work(msg.schedule.queue.clone(), EventKind::Unlock));
        debug!(message = %id, "message unlocked for redelivery");
        Ok(())
    }

    /// Wakes a message: `Queued` becomes `Ready` (with a send
    /// notification); a message mid-acquisition gets its wake flag set so
    /// the in-flight walk retries immediately instead of parking into a
    /// missed wakeup.
    pub async fn wake(&self, id: MessageId) -> Result<(), StoreError> {
        let updated = self.dal.store().messages().update(&id, |m| match m.schedule.status {
            MessageStatus::Queued => {
                m.schedule.status = MessageStatus::Ready;
                m.schedule.worker = None;
                Some(m.schedule.queue.clone())
            }
            MessageStatus::Acquire => {
                m.signalled = true;
                None
            }
            _ => None,
        });
        if let Some((msg, Some(queue))) = updated {
            self.dal.bus().publish(Event::work(queue, EventKind::Send));
            debug!(message = %msg.id, "queued message woken");
        }
        Ok(())
    }

    /// Deletes a message before it runs, cleaning up any admission-list
    /// entries it left on its resources (used by cancellation paths).
    pub async fn delete(&self, id: MessageId) -> Result<(), StoreError> {
        let Some(doc) = self.dal.store().messages().get(&id) else {
            return Ok(());
        };
        self.release_all(&doc, false).await?;
        self.dal.store().messages().delete(&id);
        debug!(message = %id, "message deleted");
        Ok(())
    }

    /// Deletes every message targeting one of `task_ids`, except the
    /// optional in-flight message a caller is still handling.
    pub async fn delete_for_tasks(
        &self,
        task_ids: &[TaskId],
        exclude: Option<MessageId>,
    ) -> Result<usize, StoreError> {
        let doomed = self
            .dal
            .store()
            .messages()
            .find(|m| task_ids.contains(&m.task_id) && Some(m.id) != exclude);
        let n = doomed.len();
        for msg in doomed {
            self.delete(msg.id).await?;
        }
        Ok(n)
    }

    /// Releases everything a message holds (and, for a parked or mid-walk
    /// message, the admission entry on the resource it stopped at), waking
    /// the ids each release admits. `strict` errors if a supposedly-held
    /// resource has no record of the message.
    async fn release_all(&self, doc: &Message, strict: bool) -> Result<(), StoreError> {
        let resources = Resource::for_message(doc);
        let held = doc.schedule.sub_status.min(resources.len());

        // A queued or mid-acquisition message is enqueued on (but does not
        // hold) the resource its walk stopped at; clear that entry first so
        // release order stays strictly reverse.
        if held < resources.len()
            && matches!(
                doc.schedule.status,
                MessageStatus::Queued | MessageStatus::Acquire
            )
        {
            for woken in resources[held].try_release(self.dal, doc.id).await? {
                self.wake(woken).await?;
            }
        }

        for resource in resources[..held].iter().rev() {
            let woken = match resource.release(self.dal, doc.id).await {
                Ok(woken) => woken,
                // The resource document itself is gone (task or semaphore
                // deleted underneath us); nothing left to release.
                Err(StoreError::NotFound { .. }) => {
                    warn!(message = %doc.id, resource = %resource.name(), "held resource no longer exists");
                    Vec::new()
                }
                Err(e @ StoreError::InvalidState { .. }) if strict => return Err(e),
                Err(StoreError::InvalidState { .. }) => Vec::new(),
                Err(e) => return Err(e),
            };
            for id in woken {
                self.wake(id).await?;
            }
        }
        Ok(())
    }

    /// Cleans up a message whose target task no longer exists.
    async fn discard_orphan(
        &self,
        msg: Message,
        acquired: usize,
    ) -> Result<Option<(Message, Option<TaskState>)>, StoreError> {
        warn!(message = %msg.id, task = %msg.task_id, "discarding message for deleted task");
        let resources = Resource::for_message(&msg);
        for resource in resources[..acquired.min(resources.len())].iter().rev() {
            for woken in resource.try_release(self.dal, msg.id).await? {
                self.wake(woken).await?;
            }
        }
        self.dal.store().messages().delete(&msg.id);
        Ok(Some((msg, None)))
    }

    /// Latest snapshot of a message, falling back to the caller's copy if
    /// it was deleted concurrently.
    fn snapshot(&self, msg: Message) -> Message {
        self.dal.store().messages().get(&msg.id).unwrap_or(msg)
    }
}
