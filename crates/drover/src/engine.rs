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

//! The engine handle: store, DAL, registry, and bus composed into one
//! cheap-clone value that task handles, behaviors, and workers share.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::bus::{Event, EventBus, EventKind, LocalBus};
use crate::dal::Dal;
use crate::error::TaskError;
use crate::models::task_state::{TaskOptions, TaskState, TaskStatus};
use crate::registry::TaskRegistry;
use crate::store::ids::TaskId;
use crate::store::Store;
use crate::task::TaskHandle;

/// Shared handle to one task engine instance.
#[derive(Clone)]
pub struct Engine {
    dal: Dal,
    registry: Arc<TaskRegistry>,
}

impl Engine {
    /// Creates an engine over a store with an in-process notification
    /// bus.
    pub fn new(store: Store, registry: TaskRegistry) -> Self {
        Self::with_bus(store, registry, Arc::new(LocalBus::new()))
    }

    /// Creates an engine with an explicit bus implementation.
    pub fn with_bus(store: Store, registry: TaskRegistry, bus: Arc<dyn EventBus>) -> Self {
        Self {
            dal: Dal::new(store, bus),
            registry: Arc::new(registry),
        }
    }

    pub fn dal(&self) -> &Dal {
        &self.dal
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Store {
        self.dal.store()
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        self.dal.bus()
    }

    /// Creates a task instance of a registered type with curried
    /// arguments, using the type's default options.
    pub async fn create(
        &self,
        task_type: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<TaskHandle, TaskError> {
        self.create_with(task_type, args, kwargs, |_| {}).await
    }

    /// Creates a task instance, applying `configure` on top of the
    /// type's default options.
    pub async fn create_with(
        &self,
        task_type: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        configure: impl FnOnce(&mut TaskOptions),
    ) -> Result<TaskHandle, TaskError> {
        let behavior = self.registry.resolve(task_type)?;
        let data = behavior.initial_data(args, kwargs)?;
        let mut options = behavior.default_options();
        configure(&mut options);
        let state = TaskState::new(task_type, data, TaskStatus::Pending, options);
        let state = self.dal.tasks().create(state).await?;
        Ok(TaskHandle::new(self.clone(), state))
    }

    /// Creates and immediately starts a task instance; the send-time
    /// arguments are the `args` given here.
    pub async fn spawn(
        &self,
        task_type: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<TaskHandle, TaskError> {
        let mut task = self.create(task_type, Vec::new(), Map::new()).await?;
        task.start(args, kwargs).await?;
        Ok(task)
    }

    /// Loads an existing task by id.
    pub async fn task(&self, id: TaskId) -> Result<TaskHandle, TaskError> {
        let state = self.dal.tasks().get(id).await?;
        Ok(TaskHandle::new(self.clone(), state))
    }

    /// Creates a named semaphore with the given capacity if it does not
    /// already exist.
    pub async fn ensure_semaphore(&self, name: &str, value: i32) -> Result<(), TaskError> {
        self.dal.semaphores().ensure(name, value).await?;
        Ok(())
    }

    /// Publishes a `kill` control event at a worker name or `"*"`.
    pub fn kill(&self, target: &str) {
        self.bus().publish(Event::control(EventKind::Kill, target));
    }

    /// Publishes a `shutdown` control event at a worker name or `"*"`.
    pub fn shutdown(&self, target: &str) {
        self.bus().publish(Event::control(EventKind::Shutdown, target));
    }

    /// Publishes a `ping` control event at a worker name or `"*"`.
    pub fn ping(&self, target: &str) {
        self.bus().publish(Event::control(EventKind::Ping, target));
    }
}
