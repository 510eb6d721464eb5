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

//! Task Registry
//!
//! The store holds no executable code: a task state carries only a type
//! tag, and every path that loads one resolves the tag here to get the
//! behavior that interprets it. Resolution of an unregistered tag is
//! [`RegistryError::UnknownTaskType`], fatal for the message that
//! referenced it.
//!
//! The composite behaviors (`group`, `pipeline`, `chain`, `barrier`,
//! `periodic`) are registered by [`TaskRegistry::new`]. Function tasks
//! are registered explicitly at initialization via
//! [`TaskFn`](crate::task::function::TaskFn), an ordinary value holding
//! a name, a closure, and an options bag.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RegistryError, TaskError};
use crate::models::message::Message;
use crate::models::result::TaskResult;
use crate::models::task_state::{TaskOptions, TaskStatus};
use crate::task::function::{FunctionBehavior, TaskFn};
use crate::task::TaskHandle;

/// Explicit outcome of one slot invocation.
///
/// Suspension is control flow here, not an error: a behavior that wants
/// to pause without completing returns `Suspend` and the task stays open,
/// awaiting a future message.
#[derive(Debug)]
pub enum SlotOutcome {
    /// The slot did its work; the task stays in its current status.
    Continue,
    /// Park the task in an intermediate status without completing it.
    Suspend(TaskStatus),
    /// Complete the task with this result.
    Complete(TaskResult),
}

/// A task behavior: the executable side of a stored type tag.
#[async_trait]
pub trait Behavior: Send + Sync {
    /// The registered type name.
    fn type_name(&self) -> &str;

    /// Options new instances of this type start with.
    fn default_options(&self) -> TaskOptions {
        TaskOptions::default()
    }

    /// Builds the initial `data` payload for a new instance from
    /// construction-time arguments.
    fn initial_data(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value, TaskError>;

    /// Invokes the slot named by `msg.slot` against the task. Errors are
    /// caught at the handling boundary and converted into failure
    /// results; they never propagate past the worker loop.
    async fn dispatch(&self, task: &mut TaskHandle, msg: &Message) -> Result<SlotOutcome, TaskError>;
}

/// Maps task-type names to behaviors.
pub struct TaskRegistry {
    behaviors: HashMap<String, Arc<dyn Behavior>>,
}

impl TaskRegistry {
    /// Creates a registry with the built-in composite behaviors
    /// registered.
    pub fn new() -> Self {
        let mut registry = Self {
            behaviors: HashMap::new(),
        };
        for behavior in crate::task::builtin_behaviors() {
            registry
                .register(behavior)
                .expect("built-in behaviors have unique names");
        }
        registry
    }

    /// Registers a behavior under its type name.
    pub fn register(&mut self, behavior: Arc<dyn Behavior>) -> Result<(), RegistryError> {
        let name = behavior.type_name().to_string();
        if self.behaviors.contains_key(&name) {
            return Err(RegistryError::DuplicateTaskType(name));
        }
        self.behaviors.insert(name, behavior);
        Ok(())
    }

    /// Registers a function task.
    pub fn register_function(&mut self, task_fn: TaskFn) -> Result<(), RegistryError> {
        self.register(Arc::new(FunctionBehavior::new(task_fn)))
    }

    /// Resolves a type tag to its behavior.
    pub fn resolve(&self, type_name: &str) -> Result<Arc<dyn Behavior>, RegistryError> {
        self.behaviors
            .get(type_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTaskType(type_name.to_string()))
    }

    /// Whether a type tag is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.behaviors.contains_key(type_name)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
