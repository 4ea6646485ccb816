//! In-memory KeyValueStore for unit testing
//!
//! Behaves like a single etcd v2 member: every write bumps a global index, keys with a
//! TTL expire on a timer, and watches observe the same delete/expire events a real
//! cluster would emit. Failures can be injected per operation.

mod tree;

use crate::error::StoreError;
use crate::models::{Action, Node, WatchEvent};
use crate::store_trait::KeyValueStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) value: String,
    pub(crate) created_index: u64,
    pub(crate) modified_index: u64,
    pub(crate) ttl: Option<u64>,
}

#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) entries: BTreeMap<String, Entry>,
    pub(crate) index: u64,
    pub(crate) history: Vec<WatchEvent>,
    pub(crate) failures: HashMap<String, Failure>,
}

/// Injected failure: `skip` calls pass, then `times` calls fail.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Failure {
    skip: usize,
    times: usize,
}

/// Mock coordination store for testing
#[derive(Clone)]
pub struct MemoryStore {
    pub(crate) state: Arc<Mutex<State>>,
    pub(crate) events: broadcast::Sender<WatchEvent>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            events,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make the next `times` calls of `operation` fail with an API error.
    ///
    /// Operation names match the trait methods: `get`, `list`, `set`, `create`,
    /// `update`, `delete`, `compare_and_delete`, `delete_dir`, `watch`.
    pub fn fail_next(&self, operation: &str, times: usize) {
        self.lock()
            .failures
            .insert(operation.to_string(), Failure { skip: 0, times });
    }

    /// Make only the `nth` next call of `operation` fail (1 = the very next call).
    pub fn fail_nth(&self, operation: &str, nth: usize) {
        let failure = Failure {
            skip: nth.max(1) - 1,
            times: 1,
        };
        self.lock().failures.insert(operation.to_string(), failure);
    }

    /// Write a key directly (for test setup)
    pub fn put(&self, key: &str, value: &str) {
        let mut state = self.lock();
        let event = tree::write(&mut state, key, value, None, Action::Set);
        drop(state);
        let _ = self.events.send(event);
    }

    /// Remove a key directly (for test setup)
    pub fn remove(&self, key: &str) {
        let mut state = self.lock();
        let event = tree::remove(&mut state, key, Action::Delete);
        drop(state);
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }

    /// Current value of a key
    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().entries.get(key).map(|entry| entry.value.clone())
    }

    /// TTL in seconds a key was written with
    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.lock().entries.get(key).and_then(|entry| entry.ttl)
    }

    /// Every key under `prefix` with its value
    pub fn dump(&self, prefix: &str) -> BTreeMap<String, String> {
        self.lock()
            .entries
            .iter()
            .filter(|(key, _)| tree::is_under(key, prefix) || key.as_str() == prefix)
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    fn check_failure(&self, operation: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let Some(failure) = state.failures.get_mut(operation) else {
            return Ok(());
        };
        if failure.skip > 0 {
            failure.skip -= 1;
            return Ok(());
        }
        if failure.times == 0 {
            return Ok(());
        }
        failure.times -= 1;
        Err(StoreError::Api {
            code: 300,
            message: format!("injected {} failure", operation),
        })
    }

    fn publish(&self, event: WatchEvent) {
        let _ = self.events.send(event);
    }

    fn schedule_expiry(&self, key: &str, index: u64, ttl: Duration) {
        let store = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut state = store.lock();
            let current = state.entries.get(&key).map(|entry| entry.modified_index);
            if current == Some(index) {
                let event = tree::remove(&mut state, &key, Action::Expire);
                drop(state);
                if let Some(event) = event {
                    store.publish(event);
                }
            }
        });
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Node, StoreError> {
        self.check_failure("get")?;
        let state = self.lock();
        state
            .entries
            .get(key)
            .map(|entry| tree::leaf(key, entry))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self, dir: &str) -> Result<Vec<Node>, StoreError> {
        self.check_failure("list")?;
        let state = self.lock();
        if state.entries.contains_key(dir) {
            return Err(StoreError::NotADirectory(dir.to_string()));
        }
        let children = tree::children(&state, dir);
        if children.is_empty() {
            return Err(StoreError::NotFound(dir.to_string()));
        }
        Ok(children)
    }

    async fn set(&self, key: &str, value: &str) -> Result<Node, StoreError> {
        self.check_failure("set")?;
        let mut state = self.lock();
        let event = tree::write(&mut state, key, value, None, Action::Set);
        drop(state);
        let node = event.node.clone();
        self.publish(event);
        Ok(node)
    }

    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Node, StoreError> {
        self.check_failure("create")?;
        let mut state = self.lock();
        if state.entries.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let ttl_secs = ttl.map(|ttl| ttl.as_secs().max(1));
        let event = tree::write(&mut state, key, value, ttl_secs, Action::Create);
        drop(state);
        let node = event.node.clone();
        self.publish(event);
        if let Some(ttl) = ttl {
            self.schedule_expiry(key, node.modified_index, ttl);
        }
        Ok(node)
    }

    async fn update(&self, key: &str, value: &str) -> Result<Node, StoreError> {
        self.check_failure("update")?;
        let mut state = self.lock();
        if !state.entries.contains_key(key) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let event = tree::write(&mut state, key, value, None, Action::Update);
        drop(state);
        let node = event.node.clone();
        self.publish(event);
        Ok(node)
    }

    async fn delete(&self, key: &str) -> Result<Node, StoreError> {
        self.check_failure("delete")?;
        let mut state = self.lock();
        let event = tree::remove(&mut state, key, Action::Delete)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        drop(state);
        let node = event.node.clone();
        self.publish(event);
        Ok(node)
    }

    async fn compare_and_delete(&self, key: &str, prev_value: &str) -> Result<Node, StoreError> {
        self.check_failure("compare_and_delete")?;
        let mut state = self.lock();
        match state.entries.get(key) {
            None => return Err(StoreError::NotFound(key.to_string())),
            Some(entry) if entry.value != prev_value => {
                return Err(StoreError::CompareFailed(key.to_string()));
            }
            Some(_) => {}
        }
        let event = tree::remove(&mut state, key, Action::CompareAndDelete)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        drop(state);
        let node = event.node.clone();
        self.publish(event);
        Ok(node)
    }

    async fn delete_dir(&self, dir: &str) -> Result<(), StoreError> {
        self.check_failure("delete_dir")?;
        let mut state = self.lock();
        let keys: Vec<String> = state
            .entries
            .keys()
            .filter(|key| tree::is_under(key, dir))
            .cloned()
            .collect();
        let events: Vec<WatchEvent> = keys
            .iter()
            .filter_map(|key| tree::remove(&mut state, key, Action::Delete))
            .collect();
        drop(state);
        for event in events {
            self.publish(event);
        }
        Ok(())
    }

    async fn watch(&self, key: &str, wait_index: u64) -> Result<WatchEvent, StoreError> {
        self.check_failure("watch")?;
        // subscribe before scanning history so nothing slips between the two
        let mut receiver = self.events.subscribe();
        let past = tree::first_event(&self.lock(), key, wait_index);
        if let Some(event) = past {
            return Ok(event);
        }

        loop {
            match receiver.recv().await {
                Ok(event) if event.node.key == key && event.index() >= wait_index => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    let past = tree::first_event(&self.lock(), key, wait_index);
                    if let Some(event) = past {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(StoreError::InvalidResponse("watch channel closed".to_string()));
                }
            }
        }
    }
}
