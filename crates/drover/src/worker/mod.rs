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

//! Worker Module
//!
//! The dispatch loop tying the engine together: reserve a ready message,
//! resolve the target task's behavior, dispatch the slot, retire the
//! message. Concurrency is bounded by a semaphore; waiting for work
//! blocks on the event bus with the poll interval as fallback, so the
//! worker stays correct even if every notification is dropped.
//!
//! Control events steer the loop: `kill` terminates immediately
//! (in-flight work is abandoned), `shutdown` stops claiming and drains
//! in-flight work, `ping` is answered with a log line. Control is
//! observed between reservations.
//!
//! Loop-level errors (store faults, unresolvable task types) are logged
//! and the loop backs off and retries; handler-level failures never reach
//! the loop at all; they are converted to failure results at the
//! handling boundary.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{EventKind, CONTROL_CHANNEL};
use crate::engine::Engine;
use crate::error::WorkerError;
use crate::task::TaskHandle;

/// Configuration for a worker's dispatch loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker name: the reservation identity and the control-event
    /// address.
    pub name: String,
    /// Queues this worker reserves from.
    pub queues: Vec<String>,
    /// Maximum concurrently executing handlers.
    pub concurrency: usize,
    /// Fallback poll interval while waiting for work.
    pub poll_interval: Duration,
    /// Debug mode: dispatch errors abort the loop instead of completing
    /// the task with a failure result.
    pub raise_errors: bool,
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queues: vec![crate::models::task_state::DEFAULT_QUEUE.to_string()],
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            raise_errors: false,
        }
    }

    pub fn queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn raise_errors(mut self, raise_errors: bool) -> Self {
        self.raise_errors = raise_errors;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new(format!("worker-{}", Uuid::new_v4()))
    }
}

/// Backoff after a loop-level error before retrying.
const ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// A message dispatch loop over one engine.
pub struct Worker {
    engine: Engine,
    config: WorkerConfig,
    instance_id: Uuid,
}

impl Worker {
    pub fn new(engine: Engine, config: WorkerConfig) -> Self {
        Self {
            engine,
            config,
            instance_id: Uuid::new_v4(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Runs the dispatch loop until a `kill` or `shutdown` control event
    /// addresses this worker.
    pub async fn run(&self) -> Result<(), WorkerError> {
        info!(
            worker = %self.config.name,
            instance = %self.instance_id,
            queues = ?self.config.queues,
            "worker starting"
        );
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut wait_channels = self.config.queues.clone();
        wait_channels.push(CONTROL_CHANNEL.to_string());

        loop {
            // Reap finished handlers so the join set stays bounded.
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    warn!(worker = %self.config.name, error = %e, "handler task join error");
                }
            }

            let reserved = self
                .engine
                .dal()
                .messages()
                .reserve(&self.config.name, &self.config.queues)
                .await;
            match reserved {
                Ok(Some((msg, Some(state)))) => {
                    if self.config.raise_errors {
                        let mut task = TaskHandle::new(self.engine.clone(), state);
                        task.handle_raising(&msg, true).await?;
                        continue;
                    }
                    let permit = semaphore.clone().acquire_owned().await?;
                    let engine = self.engine.clone();
                    let worker_name = self.config.name.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        let mut task = TaskHandle::new(engine, state);
                        if let Err(e) = task.handle(&msg).await {
                            error!(worker = %worker_name, message = %msg.id, error = %e, "message handling failed");
                        }
                    });
                }
                // Claimed but parked or invalidated; try the next one
                // right away.
                Ok(Some((_, None))) => continue,
                Ok(None) => {
                    let event = self
                        .engine
                        .bus()
                        .wait_for_event(&wait_channels, self.config.poll_interval)
                        .await;
                    if let Some(event) = event {
                        if event.channel == CONTROL_CHANNEL && event.targets(&self.config.name) {
                            match event.kind {
                                EventKind::Kill => {
                                    info!(worker = %self.config.name, "kill received; terminating immediately");
                                    in_flight.abort_all();
                                    return Ok(());
                                }
                                EventKind::Shutdown => break,
                                EventKind::Ping => {
                                    info!(worker = %self.config.name, instance = %self.instance_id, "pong");
                                }
                                _ => {}
                            }
                        }
                        // Work hints fall through to the next reserve.
                    }
                }
                Err(e) => {
                    error!(worker = %self.config.name, error = %e, "reservation failed; backing off");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }

        info!(worker = %self.config.name, "shutdown received; draining in-flight work");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!(worker = %self.config.name, error = %e, "handler task join error during drain");
            }
        }
        info!(worker = %self.config.name, "worker stopped");
        Ok(())
    }

    /// Drains everything currently runnable, handling messages inline on
    /// this task, and returns how many were handled. Deferred messages
    /// whose time has not come are left in place. This is the
    /// single-process execution mode and the test harness's workhorse.
    pub async fn run_until_idle(&self) -> Result<usize, WorkerError> {
        let mut handled = 0;
        loop {
            let reserved = self
                .engine
                .dal()
                .messages()
                .reserve(&self.config.name, &self.config.queues)
                .await?;
            match reserved {
                Some((msg, Some(state))) => {
                    let mut task = TaskHandle::new(self.engine.clone(), state);
                    if self.config.raise_errors {
                        task.handle_raising(&msg, true).await?;
                    } else if let Err(e) = task.handle(&msg).await {
                        error!(worker = %self.config.name, message = %msg.id, error = %e, "message handling failed");
                    }
                    handled += 1;
                }
                Some((msg, None)) => {
                    debug!(worker = %self.config.name, message = %msg.id, "message parked during drain");
                    continue;
                }
                None => return Ok(handled),
            }
        }
    }
}
