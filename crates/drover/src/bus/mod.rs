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

//! Event bus for work notification and worker control.
//!
//! The bus is strictly a latency optimization: a `send` event tells
//! waiting workers a message just became ready so they can skip the rest
//! of their poll interval. Delivery is best-effort (the bus may drop
//! events under lag or when nobody is waiting) and the engine stays
//! correct by falling back to polling: wait until work *might* be
//! available, then go look.
//!
//! Control events (`ping` / `kill` / `shutdown`) travel on the dedicated
//! [`CONTROL_CHANNEL`] and carry a target worker name (or `"*"`).

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Channel name for worker control events.
pub const CONTROL_CHANNEL: &str = "drover.control";

/// Wildcard target matching every worker.
pub const ALL_WORKERS: &str = "*";

/// Kinds of events published on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A message became ready on a queue channel.
    Send,
    /// A busy message was unlocked back to ready on a queue channel.
    Unlock,
    /// Liveness probe for a worker.
    Ping,
    /// Terminate the targeted worker immediately, abandoning in-flight
    /// work.
    Kill,
    /// Drain in-flight work on the targeted worker, then exit.
    Shutdown,
}

/// One event on the bus.
#[derive(Debug, Clone)]
pub struct Event {
    /// Queue name for work events, [`CONTROL_CHANNEL`] for control events.
    pub channel: String,
    pub kind: EventKind,
    /// Worker name (or [`ALL_WORKERS`]) for control events.
    pub target: Option<String>,
}

impl Event {
    /// A work notification on a queue channel.
    pub fn work(channel: impl Into<String>, kind: EventKind) -> Self {
        Self {
            channel: channel.into(),
            kind,
            target: None,
        }
    }

    /// A control event aimed at `target`.
    pub fn control(kind: EventKind, target: impl Into<String>) -> Self {
        Self {
            channel: CONTROL_CHANNEL.to_string(),
            kind,
            target: Some(target.into()),
        }
    }

    /// Whether a control event addresses the worker named `name`.
    pub fn targets(&self, name: &str) -> bool {
        matches!(self.target.as_deref(), Some(t) if t == name || t == ALL_WORKERS)
    }
}

/// Abstract publish/wait notification channel.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes an event. Never blocks; dropping the event is permitted.
    fn publish(&self, event: Event);

    /// Blocks until an event arrives on one of `channels` or `timeout`
    /// elapses. Returns `None` on timeout. Callers must treat a returned
    /// event as a hint, not a guarantee of available work.
    async fn wait_for_event(&self, channels: &[String], timeout: Duration) -> Option<Event>;
}

/// In-process bus built on a broadcast channel.
///
/// Events published while no waiter is subscribed are dropped, as are
/// events beyond the channel's lag window. Both are within the bus
/// contract.
pub struct LocalBus {
    sender: broadcast::Sender<Event>,
}

impl LocalBus {
    const CAPACITY: usize = 256;

    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(Self::CAPACITY);
        Self { sender }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    fn publish(&self, event: Event) {
        // Err means no live receiver; that is the drop case the contract
        // allows.
        let _ = self.sender.send(event);
    }

    async fn wait_for_event(&self, channels: &[String], timeout: Duration) -> Option<Event> {
        let mut receiver = self.sender.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, receiver.recv()).await {
                Ok(Ok(event)) if channels.iter().any(|c| *c == event.channel) => {
                    debug!(channel = %event.channel, kind = ?event.kind, "woke from bus event");
                    return Some(event);
                }
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    debug!(skipped, "bus receiver lagged; treating as wake hint");
                    return None;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => return None,
            }
        }
    }
}
