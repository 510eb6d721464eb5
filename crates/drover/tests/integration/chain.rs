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

//! Chained continuations: stackless recursion through fresh dispatches.

use crate::common::*;
use drover::{FailureInfo, FnOutcome, TaskError, TaskFn, TaskStatus};
use serde_json::{json, Map, Value};

fn fact_args(args: &[Value]) -> (i64, i64) {
    let n = args.first().and_then(Value::as_i64).unwrap_or(0);
    let acc = args.get(1).and_then(Value::as_i64).unwrap_or(1);
    (n, acc)
}

#[tokio::test]
async fn factorial_by_accumulator() {
    let engine = engine_with(|registry| {
        registry
            .register_function(TaskFn::new("fact", |args, _kwargs| {
                let (n, acc) = fact_args(args);
                if n > 1 {
                    // Each step is a fresh task dispatch, not a nested
                    // call.
                    Ok(FnOutcome::chain("fact", vec![json!(n - 1), json!(n * acc)]))
                } else {
                    Ok(FnOutcome::Value(json!(acc)))
                }
            }))
            .unwrap();
    });

    let mut task = engine.create("fact", vec![], Map::new()).await.unwrap();
    task.start(vec![json!(5)], Map::new()).await.unwrap();
    drain(&engine).await;

    task.refresh().await.unwrap();
    assert_eq!(task.status(), TaskStatus::Success);
    assert_eq!(task.result().unwrap().get().unwrap(), json!(120));
    // All intermediate tasks and wrappers are cleaned up.
    assert_eq!(task_count(&engine), 1);
    assert_eq!(message_count(&engine), 0);
}

#[tokio::test]
async fn failure_mid_chain_propagates_to_the_root() {
    let engine = engine_with(|registry| {
        registry
            .register_function(TaskFn::new("fact_err", |args, _kwargs| {
                let (n, acc) = fact_args(args);
                if n == 2 {
                    Err(FailureInfo::new("TypeError", "fact blew up"))
                } else if n > 1 {
                    Ok(FnOutcome::chain("fact_err", vec![json!(n - 1), json!(n * acc)]))
                } else {
                    Ok(FnOutcome::Value(json!(acc)))
                }
            }))
            .unwrap();
    });

    let mut task = engine.create("fact_err", vec![], Map::new()).await.unwrap();
    task.start(vec![json!(5)], Map::new()).await.unwrap();
    drain(&engine).await;

    task.refresh().await.unwrap();
    assert_eq!(task.status(), TaskStatus::Failure);
    match task.result().unwrap().get() {
        Err(TaskError::Failed(info)) => {
            assert_eq!(info.kind, "TypeError");
            assert_eq!(info.message, "fact blew up");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(task_count(&engine), 1);
    assert_eq!(message_count(&engine), 0);
}

#[tokio::test]
async fn caller_suspends_while_the_continuation_runs() {
    let engine = engine_with(|registry| {
        registry
            .register_function(TaskFn::new("hop", |args, _kwargs| {
                let depth = args.first().and_then(Value::as_i64).unwrap_or(0);
                if depth > 0 {
                    Ok(FnOutcome::chain("hop", vec![json!(depth - 1)]))
                } else {
                    Ok(FnOutcome::Value(json!("done")))
                }
            }))
            .unwrap();
    });

    let mut task = engine.create("hop", vec![], Map::new()).await.unwrap();
    task.start(vec![json!(1)], Map::new()).await.unwrap();

    // Handle only the caller's run: it spawns the continuation and
    // suspends.
    handle_one(&engine).await.unwrap();
    task.refresh().await.unwrap();
    assert_eq!(task.status(), TaskStatus::Suspended);

    drain(&engine).await;
    task.refresh().await.unwrap();
    assert_eq!(task.status(), TaskStatus::Success);
    assert_eq!(task.result().unwrap().get().unwrap(), json!("done"));
}
