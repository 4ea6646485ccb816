//! KeyValueStore trait for mocking
//!
//! The etcd client implements this trait; tests use the in-memory store behind
//! the `test-util` feature.

use crate::error::StoreError;
use crate::models::{Node, WatchEvent};
use std::time::Duration;

/// Linearizable key-value operations the coordination layer relies on.
///
/// Keys are absolute slash-separated paths. Directories are implicit: a listing
/// returns the direct children of a path.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a single leaf.
    async fn get(&self, key: &str) -> Result<Node, StoreError>;

    /// List the direct children of a directory.
    ///
    /// Returns `NotFound` when nothing exists under `dir`.
    async fn list(&self, dir: &str) -> Result<Vec<Node>, StoreError>;

    /// Unconditional write.
    async fn set(&self, key: &str, value: &str) -> Result<Node, StoreError>;

    /// Write only if the key is absent (`prevExist=false`).
    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Node, StoreError>;

    /// Write only if the key exists (`prevExist=true`).
    async fn update(&self, key: &str, value: &str) -> Result<Node, StoreError>;

    async fn delete(&self, key: &str) -> Result<Node, StoreError>;

    /// Delete only if the current value equals `prev_value`.
    async fn compare_and_delete(&self, key: &str, prev_value: &str) -> Result<Node, StoreError>;

    /// Recursively delete a directory. A missing directory is not an error.
    async fn delete_dir(&self, dir: &str) -> Result<(), StoreError>;

    /// Block until the first change to `key` at or after `wait_index`.
    async fn watch(&self, key: &str, wait_index: u64) -> Result<WatchEvent, StoreError>;

    /// Create the key, or overwrite it if it already exists.
    async fn create_or_update(&self, key: &str, value: &str) -> Result<Node, StoreError> {
        match self.create(key, value, None).await {
            Err(StoreError::AlreadyExists(_)) => self.update(key, value).await,
            other => other,
        }
    }
}
