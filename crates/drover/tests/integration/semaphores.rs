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

//! Semaphore admission during reservation: capacity limits, multi-resource
//! acquisition, and resumable partial progress.

use crate::common::*;
use drover::{Message, MessageStatus, TaskState};
use serde_json::{json, Map};

fn queues() -> Vec<String> {
    vec!["default".to_string()]
}

async fn reserve(engine: &drover::Engine, worker: &str) -> Option<(Message, Option<TaskState>)> {
    engine
        .dal()
        .messages()
        .reserve(worker, &queues())
        .await
        .unwrap()
}

/// Starts `n` "echo" tasks gated on the given semaphores and returns
/// nothing; the messages are what matters.
async fn start_gated(engine: &drover::Engine, n: usize, semaphores: &[&str]) {
    for _ in 0..n {
        let names: Vec<String> = semaphores.iter().map(|s| s.to_string()).collect();
        let mut task = engine
            .create_with("echo", vec![], Map::new(), |o| o.semaphores = names)
            .await
            .unwrap();
        task.start(vec![json!("hi")], Map::new()).await.unwrap();
    }
}

#[tokio::test]
async fn capacity_two_admits_two_and_queues_the_rest() {
    let engine = engine();
    engine.ensure_semaphore("foo", 2).await.unwrap();
    start_gated(&engine, 5, &["foo"]).await;

    let mut busy = Vec::new();
    for i in 0..4 {
        let (msg, state) = reserve(&engine, "w").await.unwrap();
        if i < 2 {
            assert_eq!(msg.schedule.status, MessageStatus::Busy);
            assert!(state.is_some());
            busy.push(msg);
        } else {
            assert_eq!(msg.schedule.status, MessageStatus::Queued);
            assert!(state.is_none());
        }
    }

    // The semaphore invariant holds: the active window never exceeds
    // capacity.
    let sem = engine.dal().semaphores().get("foo").await.unwrap();
    assert_eq!(sem.active().len(), 2);

    // Retiring one admits exactly one waiter.
    engine.dal().messages().retire(busy[0].id).await.unwrap();
    let (msg, _) = reserve(&engine, "w").await.unwrap();
    assert_eq!(msg.schedule.status, MessageStatus::Busy);
    let (msg, _) = reserve(&engine, "w").await.unwrap();
    assert_eq!(msg.schedule.status, MessageStatus::Queued);

    let sem = engine.dal().semaphores().get("foo").await.unwrap();
    assert_eq!(sem.active().len(), 2);
}

#[tokio::test]
async fn messages_queue_across_multiple_semaphores() {
    let engine = engine();
    engine.ensure_semaphore("foo", 2).await.unwrap();
    engine.ensure_semaphore("bar", 2).await.unwrap();
    start_gated(&engine, 2, &["foo"]).await;
    start_gated(&engine, 2, &["foo", "bar"]).await;

    // "foo" fills after two admissions; the double-gated messages queue
    // on it without ever touching "bar".
    for i in 0..4 {
        let (msg, state) = reserve(&engine, "w").await.unwrap();
        if i < 2 {
            assert_eq!(msg.schedule.status, MessageStatus::Busy);
        } else {
            assert_eq!(msg.schedule.status, MessageStatus::Queued);
            assert_eq!(msg.schedule.sub_status, 0);
            assert!(state.is_none());
        }
    }
    let bar = engine.dal().semaphores().get("bar").await.unwrap();
    assert!(bar.mq.is_empty());
}

#[tokio::test]
async fn partial_acquisition_resumes_where_it_stopped() {
    let engine = engine();
    engine.ensure_semaphore("a", 1).await.unwrap();
    engine.ensure_semaphore("b", 1).await.unwrap();

    // A blocker holds "b" alone.
    start_gated(&engine, 1, &["b"]).await;
    let (blocker, state) = reserve(&engine, "w").await.unwrap();
    assert!(state.is_some());

    // The contender needs "a" then "b": it takes "a", then parks on "b"
    // with its progress recorded.
    start_gated(&engine, 1, &["a", "b"]).await;
    let (contender, state) = reserve(&engine, "w").await.unwrap();
    assert!(state.is_none());
    assert_eq!(contender.schedule.status, MessageStatus::Queued);
    assert_eq!(contender.schedule.sub_status, 1);

    // Releasing "b" wakes the contender back to ready, progress intact.
    engine.dal().messages().retire(blocker.id).await.unwrap();
    let woken = engine
        .dal()
        .messages()
        .try_get(contender.id)
        .await
        .unwrap();
    assert_eq!(woken.schedule.status, MessageStatus::Ready);
    assert_eq!(woken.schedule.sub_status, 1);

    // Re-reservation resumes at "b" rather than re-acquiring "a": the
    // contender appears exactly once in "a"'s list throughout.
    let (resumed, state) = reserve(&engine, "w").await.unwrap();
    assert_eq!(resumed.id, contender.id);
    assert_eq!(resumed.schedule.status, MessageStatus::Busy);
    assert!(state.is_some());

    let a = engine.dal().semaphores().get("a").await.unwrap();
    assert_eq!(a.mq, vec![contender.id]);
    let b = engine.dal().semaphores().get("b").await.unwrap();
    assert_eq!(b.mq, vec![contender.id]);
}

#[tokio::test]
async fn resumable_reservations_outrank_fresh_ones() {
    let engine = engine();
    engine.ensure_semaphore("a", 1).await.unwrap();
    engine.ensure_semaphore("b", 1).await.unwrap();

    start_gated(&engine, 1, &["b"]).await;
    let (blocker, _) = reserve(&engine, "w").await.unwrap();

    // Contender parks on "b" holding "a".
    start_gated(&engine, 1, &["a", "b"]).await;
    let (contender, _) = reserve(&engine, "w").await.unwrap();
    assert_eq!(contender.schedule.sub_status, 1);

    // A fresh rival with no progress becomes ready too.
    start_gated(&engine, 1, &[]).await;

    engine.dal().messages().retire(blocker.id).await.unwrap();

    // The partially-acquired contender is selected before the fresh
    // rival, preventing acquisition starvation.
    let (next, _) = reserve(&engine, "w").await.unwrap();
    assert_eq!(next.id, contender.id);
}

#[tokio::test]
async fn gated_tasks_still_run_to_completion() {
    let engine = engine();
    engine.ensure_semaphore("foo", 2).await.unwrap();
    let names = vec!["foo".to_string()];
    let mut task = engine
        .create_with("double", vec![], Map::new(), |o| o.semaphores = names)
        .await
        .unwrap();
    task.start(vec![json!(10)], Map::new()).await.unwrap();

    drain(&engine).await;

    task.refresh().await.unwrap();
    assert_eq!(task.result().unwrap().get().unwrap(), json!(20));
    // All admissions were released on retire.
    let sem = engine.dal().semaphores().get("foo").await.unwrap();
    assert!(sem.mq.is_empty());
    assert_eq!(message_count(&engine), 0);
}

#[tokio::test]
async fn wake_flags_in_flight_acquisitions() {
    let engine = engine();
    let mut task = engine.create("echo", vec![], Map::new()).await.unwrap();
    let msg = task.start(vec![], Map::new()).await.unwrap();

    // Force the message into the mid-acquisition state, then wake it: the
    // flag must be set so the walk retries instead of parking.
    let _ = engine.store().messages().update(&msg.id, |m| {
        m.schedule.status = MessageStatus::Acquire;
    });
    engine.dal().messages().wake(msg.id).await.unwrap();

    let flagged = engine.dal().messages().try_get(msg.id).await.unwrap();
    assert_eq!(flagged.schedule.status, MessageStatus::Acquire);
    assert!(flagged.signalled);
}
