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

//! Periodic scheduling: deferred re-runs, tick skipping, cancellation.

use crate::common::*;
use chrono::{Duration, Utc};
use drover::{task, MessageStatus, TaskStatus};
use serde_json::{json, Map};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn runs_once_and_defers_the_next_tick() {
    let (counted, calls) = counting_fn("tick");
    let engine = engine_with(|registry| {
        registry.register_function(counted).unwrap();
    });

    let mut subtask = engine.create("tick", vec![], Map::new()).await.unwrap();
    let first = Utc::now() - Duration::seconds(1);
    let mut periodic = task::periodic::schedule(
        &engine,
        &mut subtask,
        first,
        60,
        vec![json!("payload")],
        Map::new(),
    )
    .await
    .unwrap();

    // The first run is due immediately; the reschedule callback follows.
    drain(&engine).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    periodic.refresh().await.unwrap();
    assert_eq!(periodic.status(), TaskStatus::Active);

    // Exactly one deferred run message remains, aimed at the next tick.
    let deferred = engine
        .store()
        .messages()
        .find(|m| m.schedule.status == MessageStatus::Ready);
    assert_eq!(deferred.len(), 1);
    let after = deferred[0].schedule.after.expect("next run must be deferred");
    assert!(after > Utc::now());

    // Nothing more is runnable until the tick arrives.
    assert_eq!(drain(&engine).await, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delayed_completion_skips_missed_ticks() {
    let (counted, _calls) = counting_fn("tick");
    let engine = engine_with(|registry| {
        registry.register_function(counted).unwrap();
    });

    let mut subtask = engine.create("tick", vec![], Map::new()).await.unwrap();
    // The tick at `first` is 185 seconds stale by the time it runs; the
    // next run lands on the first whole multiple in the future.
    let first = Utc::now() - Duration::seconds(185);
    task::periodic::schedule(&engine, &mut subtask, first, 60, vec![], Map::new())
        .await
        .unwrap();
    drain(&engine).await;

    let deferred = engine
        .store()
        .messages()
        .find(|m| m.schedule.after.is_some());
    assert_eq!(deferred.len(), 1);
    assert_eq!(deferred[0].schedule.after.unwrap(), first + Duration::seconds(240));
}

#[tokio::test]
async fn subtask_is_reset_between_runs() {
    let (counted, _calls) = counting_fn("tick");
    let engine = engine_with(|registry| {
        registry.register_function(counted).unwrap();
    });

    let mut subtask = engine.create("tick", vec![], Map::new()).await.unwrap();
    let subtask_id = subtask.id();
    let first = Utc::now() - Duration::seconds(1);
    task::periodic::schedule(&engine, &mut subtask, first, 60, vec![], Map::new())
        .await
        .unwrap();
    drain(&engine).await;

    // After a completed run the template is pending again, cleared for
    // the next dispatch.
    let state = engine.dal().tasks().get(subtask_id).await.unwrap();
    assert_eq!(state.status, TaskStatus::Pending);
    assert!(state.result.is_none());
    assert!(state.on_complete.is_some());
}

#[tokio::test]
async fn cancel_removes_every_trace() {
    let (counted, _calls) = counting_fn("tick");
    let engine = engine_with(|registry| {
        registry.register_function(counted).unwrap();
    });

    let mut subtask = engine.create("tick", vec![], Map::new()).await.unwrap();
    let first = Utc::now() - Duration::seconds(1);
    let periodic = task::periodic::schedule(&engine, &mut subtask, first, 60, vec![], Map::new())
        .await
        .unwrap();
    drain(&engine).await;

    task::periodic::cancel(&periodic).await.unwrap();

    assert_eq!(task_count(&engine), 0);
    assert_eq!(message_count(&engine), 0);
}
