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

//! Reservation protocol and the per-task mutex.

use crate::common::*;
use drover::{task, MessageStatus, TaskStatus};
use serde_json::{json, Map};

fn queues() -> Vec<String> {
    vec!["default".to_string()]
}

#[tokio::test]
async fn a_ready_message_is_claimed_at_most_once() {
    let engine = engine();
    let mut task = engine.create("double", vec![], Map::new()).await.unwrap();
    task.start(vec![json!(2)], Map::new()).await.unwrap();

    let (msg, state) = engine
        .dal()
        .messages()
        .reserve("w1", &queues())
        .await
        .unwrap()
        .expect("message should be claimable");
    assert!(state.is_some());
    assert_eq!(msg.schedule.status, MessageStatus::Busy);
    assert_eq!(msg.schedule.worker.as_deref(), Some("w1"));

    // Nothing left for a second worker.
    assert!(engine
        .dal()
        .messages()
        .reserve("w2", &queues())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_yield_one_winner() {
    let engine = engine();
    let mut task = engine.create("double", vec![], Map::new()).await.unwrap();
    task.start(vec![json!(2)], Map::new()).await.unwrap();

    let mut attempts = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        attempts.push(tokio::spawn(async move {
            engine
                .dal()
                .messages()
                .reserve(&format!("w{}", i), &queues())
                .await
                .unwrap()
        }));
    }
    let mut winners = 0;
    for attempt in attempts {
        if let Some((_, Some(_))) = attempt.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn priority_orders_selection() {
    let engine = engine();
    let mut low = engine.create("double", vec![], Map::new()).await.unwrap();
    let mut high = engine
        .create_with("double", vec![], Map::new(), |o| o.priority = 50)
        .await
        .unwrap();
    low.start(vec![json!(1)], Map::new()).await.unwrap();
    high.start(vec![json!(2)], Map::new()).await.unwrap();

    let (msg, _) = engine
        .dal()
        .messages()
        .reserve("w1", &queues())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.task_id, high.id());
}

#[tokio::test]
async fn queue_spec_filters_reservations() {
    let engine = engine();
    let mut task = engine
        .create_with("double", vec![], Map::new(), |o| o.queue = "analytics".into())
        .await
        .unwrap();
    task.start(vec![json!(2)], Map::new()).await.unwrap();

    assert!(engine
        .dal()
        .messages()
        .reserve("w1", &queues())
        .await
        .unwrap()
        .is_none());
    assert!(engine
        .dal()
        .messages()
        .reserve("w1", &["analytics".to_string()])
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn task_mutex_serializes_competing_messages() {
    // Two subtask completions race for the group's lock: the first goes
    // busy, the second parks in the group's mutex queue and is woken when
    // the first retires.
    let engine = engine();
    let subtasks = vec![
        engine.create("double", vec![], Map::new()).await.unwrap(),
        engine.create("double", vec![], Map::new()).await.unwrap(),
    ];
    let mut group = task::group::new(&engine, subtasks).await.unwrap();
    group.start(vec![json!(2)], Map::new()).await.unwrap();

    // Group's own run message first.
    assert_eq!(handle_one(&engine).await.unwrap().slot, "run");

    // Reserve both children's run messages before handling either, so
    // their completion callbacks land together.
    let (run0, state0) = engine
        .dal()
        .messages()
        .reserve("w1", &queues())
        .await
        .unwrap()
        .unwrap();
    let (run1, state1) = engine
        .dal()
        .messages()
        .reserve("w2", &queues())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run0.slot, "run");
    assert_eq!(run1.slot, "run");
    let mut child0 = task_handle(&engine, state0.unwrap().id).await;
    child0.handle(&run0).await.unwrap();
    let mut child1 = task_handle(&engine, state1.unwrap().id).await;
    child1.handle(&run1).await.unwrap();

    // Both retire_subtask callbacks are now ready and contend for the
    // group's mutex.
    let (first, first_state) = engine
        .dal()
        .messages()
        .reserve("w1", &queues())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.slot, "retire_subtask");
    assert_eq!(first.schedule.status, MessageStatus::Busy);
    assert!(first_state.is_some());

    let (second, second_state) = engine
        .dal()
        .messages()
        .reserve("w2", &queues())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.slot, "retire_subtask");
    assert_eq!(second.schedule.status, MessageStatus::Queued);
    assert!(second_state.is_none());

    // The mutex queue records the contention order.
    let state = engine.dal().tasks().get(group.id()).await.unwrap();
    assert_eq!(state.mq, vec![first.id, second.id]);

    // Nothing else is claimable while the second is parked.
    assert!(engine
        .dal()
        .messages()
        .reserve("w3", &queues())
        .await
        .unwrap()
        .is_none());

    // Handling the first releases the mutex and wakes the second.
    let mut handle = task_handle(&engine, group.id()).await;
    handle.handle(&first).await.unwrap();
    let state = engine.dal().tasks().get(group.id()).await.unwrap();
    assert_eq!(state.mq, vec![second.id]);

    let (woken, woken_state) = engine
        .dal()
        .messages()
        .reserve("w3", &queues())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(woken.id, second.id);
    assert_eq!(woken.schedule.status, MessageStatus::Busy);
    assert!(woken_state.is_some());

    let mut handle = task_handle(&engine, group.id()).await;
    handle.handle(&woken).await.unwrap();

    group.refresh().await.unwrap();
    assert_eq!(group.status(), TaskStatus::Success);
    assert_eq!(group.result().unwrap().get().unwrap(), json!([4, 4]));
}

#[tokio::test]
async fn unlock_resets_for_full_reacquisition() {
    let engine = engine();
    engine.ensure_semaphore("io", 1).await.unwrap();
    let mut task = engine
        .create_with("double", vec![], Map::new(), |o| o.semaphores = vec!["io".into()])
        .await
        .unwrap();
    task.start(vec![json!(2)], Map::new()).await.unwrap();

    let (msg, state) = engine
        .dal()
        .messages()
        .reserve("w1", &queues())
        .await
        .unwrap()
        .unwrap();
    assert!(state.is_some());
    assert_eq!(msg.schedule.sub_status, 2);

    engine.dal().messages().unlock(msg.id).await.unwrap();

    let reset = engine.dal().messages().try_get(msg.id).await.unwrap();
    assert_eq!(reset.schedule.status, MessageStatus::Ready);
    assert_eq!(reset.schedule.sub_status, 0);
    assert!(reset.schedule.worker.is_none());

    // Every resource was released.
    let sem = engine.dal().semaphores().get("io").await.unwrap();
    assert!(sem.mq.is_empty());
    let state = engine.dal().tasks().get(task.id()).await.unwrap();
    assert!(state.mq.is_empty());

    // And the message is fully reservable again.
    let (again, state) = engine
        .dal()
        .messages()
        .reserve("w2", &queues())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.id, msg.id);
    assert!(state.is_some());
}

#[tokio::test]
async fn deferred_messages_become_claimable_on_time() {
    let engine = engine();
    let mut task = engine.create("double", vec![], Map::new()).await.unwrap();
    let after = chrono::Utc::now() + chrono::Duration::milliseconds(80);
    task.schedule(after, vec![json!(2)], Map::new()).await.unwrap();

    assert!(engine
        .dal()
        .messages()
        .reserve("w1", &queues())
        .await
        .unwrap()
        .is_none());

    tokio::time::sleep(std::time::Duration::from_millis(120)).await;
    assert!(engine
        .dal()
        .messages()
        .reserve("w1", &queues())
        .await
        .unwrap()
        .is_some());
}
