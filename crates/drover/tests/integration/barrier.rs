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

//! Barrier: completion only after every subtask is terminal.

use crate::common::*;
use drover::{task, TaskStatus};
use serde_json::{json, Map, Value};

#[tokio::test]
async fn discards_sub_results_and_completes_with_null() {
    let engine = engine();
    let subtasks = vec![
        engine.create("double", vec![], Map::new()).await.unwrap(),
        engine.create("double", vec![], Map::new()).await.unwrap(),
    ];
    let mut barrier = task::barrier::new(&engine, subtasks).await.unwrap();
    barrier.start(vec![json!(2)], Map::new()).await.unwrap();
    drain(&engine).await;

    barrier.refresh().await.unwrap();
    assert_eq!(barrier.status(), TaskStatus::Success);
    assert_eq!(barrier.result().unwrap().get().unwrap(), Value::Null);
    assert_eq!(task_count(&engine), 1);
    assert_eq!(message_count(&engine), 0);
}

#[tokio::test]
async fn does_not_complete_while_a_subtask_is_pending() {
    let engine = engine();
    let subtasks = vec![
        engine.create("double", vec![], Map::new()).await.unwrap(),
        engine.create("double", vec![], Map::new()).await.unwrap(),
        engine.create("double", vec![], Map::new()).await.unwrap(),
    ];
    let mut barrier = task::barrier::new(&engine, subtasks).await.unwrap();
    barrier.start(vec![json!(2)], Map::new()).await.unwrap();

    // Fan-out, then let exactly two subtasks finish (run + callback
    // each).
    assert_eq!(handle_one(&engine).await.unwrap().slot, "run");
    for _ in 0..4 {
        handle_one(&engine).await.unwrap();
    }

    barrier.refresh().await.unwrap();
    assert!(
        !barrier.status().is_terminal(),
        "barrier completed with a subtask still pending"
    );

    let children = engine.dal().tasks().children(barrier.id()).await;
    assert!(children.iter().any(|c| !c.status.is_terminal()));

    // The last subtask finishes; now the barrier completes.
    drain(&engine).await;
    barrier.refresh().await.unwrap();
    assert_eq!(barrier.status(), TaskStatus::Success);
}

#[tokio::test]
async fn failed_child_parks_then_fails_the_barrier() {
    let engine = engine();
    let subtasks = vec![
        engine.create("boom", vec![], Map::new()).await.unwrap(),
        engine.create("double", vec![], Map::new()).await.unwrap(),
        engine.create("double", vec![], Map::new()).await.unwrap(),
    ];
    let mut barrier = task::barrier::new(&engine, subtasks).await.unwrap();
    barrier.start(vec![json!(2)], Map::new()).await.unwrap();

    // Run fan-out, the failing child, and its callback.
    assert_eq!(handle_one(&engine).await.unwrap().slot, "run");
    handle_one(&engine).await.unwrap();
    handle_one(&engine).await.unwrap();

    // The failure is visible while siblings are still outstanding, but
    // the barrier stays open.
    barrier.refresh().await.unwrap();
    assert_eq!(barrier.status(), TaskStatus::FailChild);

    drain(&engine).await;
    barrier.refresh().await.unwrap();
    assert_eq!(barrier.status(), TaskStatus::Failure);
    assert_eq!(task_count(&engine), 1);
    assert_eq!(message_count(&engine), 0);
}
