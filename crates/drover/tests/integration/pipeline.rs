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

//! Pipeline composition: feed-forward, short-circuit, immutable stages.

use crate::common::*;
use drover::{task, TaskError, TaskStatus};
use serde_json::{json, Map};

#[tokio::test]
async fn two_stages_feed_forward() {
    let engine = engine();
    let stages = vec![
        engine.create("double", vec![], Map::new()).await.unwrap(),
        engine.create("double", vec![], Map::new()).await.unwrap(),
    ];
    let mut pipeline = task::pipeline::new(&engine, stages).await.unwrap();
    pipeline.start(vec![json!(2)], Map::new()).await.unwrap();
    drain(&engine).await;

    pipeline.refresh().await.unwrap();
    assert_eq!(pipeline.status(), TaskStatus::Success);
    let result = pipeline.result().unwrap();
    // The final result is re-tagged as the pipeline's own.
    assert_eq!(result.task_id(), pipeline.id());
    assert_eq!(result.get().unwrap(), json!(8));
    assert_eq!(task_count(&engine), 1);
    assert_eq!(message_count(&engine), 0);
}

#[tokio::test]
async fn first_stage_failure_short_circuits() {
    let (counted, calls) = counting_fn("counted");
    let engine = engine_with(|registry| {
        registry.register_function(counted).unwrap();
    });
    let stages = vec![
        engine.create("double", vec![], Map::new()).await.unwrap(),
        engine.create("counted", vec![], Map::new()).await.unwrap(),
    ];
    let mut pipeline = task::pipeline::new(&engine, stages).await.unwrap();
    // Doubling a null fails in the first stage.
    pipeline
        .start(vec![serde_json::Value::Null], Map::new())
        .await
        .unwrap();
    drain(&engine).await;

    pipeline.refresh().await.unwrap();
    assert_eq!(pipeline.status(), TaskStatus::Failure);
    match pipeline.result().unwrap().get() {
        Err(TaskError::Failed(info)) => assert_eq!(info.kind, "TypeError"),
        other => panic!("expected failure, got {:?}", other),
    }
    // The second stage never ran.
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(task_count(&engine), 1);
    assert_eq!(message_count(&engine), 0);
}

#[tokio::test]
async fn immutable_stage_ignores_the_piped_value() {
    let engine = engine();
    let stages = vec![
        engine
            .create_with("double", vec![json!(2)], Map::new(), |o| o.immutable = true)
            .await
            .unwrap(),
        engine.create("double", vec![], Map::new()).await.unwrap(),
    ];
    let mut pipeline = task::pipeline::new(&engine, stages).await.unwrap();
    // 99 is ignored by the immutable first stage, which doubles its
    // curried 2 instead; the second stage doubles the piped 4.
    pipeline.start(vec![json!(99)], Map::new()).await.unwrap();
    drain(&engine).await;

    pipeline.refresh().await.unwrap();
    assert_eq!(pipeline.result().unwrap().get().unwrap(), json!(8));
}

#[tokio::test]
async fn empty_pipeline_completes_immediately() {
    let engine = engine();
    let mut pipeline = task::pipeline::new(&engine, vec![]).await.unwrap();
    pipeline.start(vec![json!(1)], Map::new()).await.unwrap();
    drain(&engine).await;

    pipeline.refresh().await.unwrap();
    assert_eq!(pipeline.status(), TaskStatus::Success);
    assert_eq!(
        pipeline.result().unwrap().get().unwrap(),
        serde_json::Value::Null
    );
}
