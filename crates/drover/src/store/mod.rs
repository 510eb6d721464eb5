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

//! The atomic document store.
//!
//! Every piece of shared mutable state in the engine lives in one of three
//! [`Collection`]s (tasks, messages, semaphores). A collection offers the
//! minimal primitive set the scheduler is defined in terms of: atomic
//! insert, get, find-one-and-update with sort and return-new semantics,
//! update-many, and delete. Each primitive is a single atomic critical
//! section; there are no multi-document transactions, and every multi-step
//! protocol above this layer is designed to tolerate observing partial
//! progress.
//!
//! [`Store`] is the in-memory backend handle. A persistent backend would
//! implement the same primitives behind the same DAL boundary; nothing
//! above the [`dal`](crate::dal) module assumes the store is in-process.

pub mod ids;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::StoreError;
use crate::models::message::Message;
use crate::models::semaphore::Semaphore;
use crate::models::task_state::TaskState;
use ids::{MessageId, TaskId};

/// One named collection of documents with atomic find-and-modify
/// operations.
///
/// Documents are cloned out on read; mutation happens only inside the
/// closure passed to an update primitive, under the collection lock.
#[derive(Debug)]
pub struct Collection<K, V> {
    name: &'static str,
    inner: Arc<Mutex<HashMap<K, V>>>,
}

impl<K, V> Clone for Collection<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Collection<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a new document. A duplicate key is a fatal creation error.
    pub fn insert(&self, key: K, doc: V) -> Result<(), StoreError> {
        let mut guard = self.lock();
        if guard.contains_key(&key) {
            return Err(StoreError::DuplicateId {
                collection: self.name,
                id: key.to_string(),
            });
        }
        guard.insert(key, doc);
        Ok(())
    }

    /// Returns a snapshot of the document, if present.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Returns a snapshot of the document or a `NotFound` error.
    pub fn require(&self, key: &K) -> Result<V, StoreError> {
        self.get(key).ok_or_else(|| StoreError::NotFound {
            collection: self.name,
            id: key.to_string(),
        })
    }

    /// Atomically mutates the document under `key`, returning the
    /// closure's output alongside a snapshot of the new document. Returns
    /// `None` if the document does not exist.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<(V, R)> {
        let mut guard = self.lock();
        let doc = guard.get_mut(key)?;
        let out = f(doc);
        Some((doc.clone(), out))
    }

    /// Like [`update`](Self::update) but errors when the document is
    /// missing.
    pub fn update_required<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Result<(V, R), StoreError> {
        self.update(key, f).ok_or_else(|| StoreError::NotFound {
            collection: self.name,
            id: key.to_string(),
        })
    }

    /// Atomically selects the document minimizing `sort_key` among those
    /// matching `filter`, applies `update` to it, and returns a snapshot
    /// of the *new* document together with the update's output.
    pub fn find_one_and_update<S, R>(
        &self,
        filter: impl Fn(&V) -> bool,
        sort_key: impl Fn(&V) -> S,
        update: impl FnOnce(&mut V) -> R,
    ) -> Option<(V, R)>
    where
        S: Ord,
    {
        let mut guard = self.lock();
        let key = guard
            .iter()
            .filter(|(_, v)| filter(v))
            .min_by_key(|(_, v)| sort_key(v))
            .map(|(k, _)| k.clone())?;
        let doc = guard.get_mut(&key).expect("selected key is present");
        let out = update(doc);
        Some((doc.clone(), out))
    }

    /// Applies `update` to every matching document; returns how many
    /// matched.
    pub fn update_many(&self, filter: impl Fn(&V) -> bool, mut update: impl FnMut(&mut V)) -> usize {
        let mut guard = self.lock();
        let mut n = 0;
        for doc in guard.values_mut().filter(|v| filter(v)) {
            update(doc);
            n += 1;
        }
        n
    }

    /// Deletes the document under `key`, returning it if it existed.
    pub fn delete(&self, key: &K) -> Option<V> {
        self.lock().remove(key)
    }

    /// Deletes every matching document; returns how many were removed.
    pub fn delete_many(&self, filter: impl Fn(&V) -> bool) -> usize {
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|_, v| !filter(v));
        before - guard.len()
    }

    /// Returns snapshots of all matching documents, unordered.
    pub fn find(&self, filter: impl Fn(&V) -> bool) -> Vec<V> {
        self.lock().values().filter(|v| filter(v)).cloned().collect()
    }

    /// Returns snapshots of all matching documents, ordered by `sort_key`.
    pub fn find_sorted<S>(&self, filter: impl Fn(&V) -> bool, sort_key: impl Fn(&V) -> S) -> Vec<V>
    where
        S: Ord,
    {
        let mut docs = self.find(filter);
        docs.sort_by_key(sort_key);
        docs
    }

    /// Counts matching documents.
    pub fn count(&self, filter: impl Fn(&V) -> bool) -> usize {
        self.lock().values().filter(|v| filter(v)).count()
    }
}

/// The in-memory backend: the three engine collections plus a monotonic
/// sequence source used for FIFO tie-breaks in message selection.
#[derive(Debug, Clone)]
pub struct Store {
    tasks: Collection<TaskId, TaskState>,
    messages: Collection<MessageId, Message>,
    semaphores: Collection<String, Semaphore>,
    seq: Arc<AtomicU64>,
}

impl Store {
    /// Creates an empty in-memory store.
    pub fn in_memory() -> Self {
        Self {
            tasks: Collection::new("task"),
            messages: Collection::new("message"),
            semaphores: Collection::new("semaphore"),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn tasks(&self) -> &Collection<TaskId, TaskState> {
        &self.tasks
    }

    pub fn messages(&self) -> &Collection<MessageId, Message> {
        &self.messages
    }

    pub fn semaphores(&self) -> &Collection<String, Semaphore> {
        &self.semaphores
    }

    /// Returns the next value of the store-wide monotonic sequence.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::in_memory()
    }
}
