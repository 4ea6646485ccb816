//! etcd coordination store
//!
//! Client for the etcd v2 keys API plus the distributed lock built on top of it.
//! Everything above this crate talks to [`KeyValueStore`], so the plugin can run
//! against the in-memory [`mock::MemoryStore`] in tests.
//!
//! ```no_run
//! use etcd_store::{DistributedLock, EtcdClient, EtcdConf, KeyValueStore, SHORT_LOCK_TTL};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), etcd_store::StoreError> {
//! let conf = EtcdConf {
//!     urls: vec!["http://127.0.0.1:2379".to_string()],
//!     ..Default::default()
//! };
//! let store: Arc<dyn KeyValueStore> = Arc::new(EtcdClient::new(&conf)?);
//!
//! let guard = DistributedLock::new(Arc::clone(&store), "/midonet-cni/router_ip", SHORT_LOCK_TTL)
//!     .acquire()
//!     .await?;
//! store.set("/midonet-cni/example", "value").await?;
//! guard.release().await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod lock;
pub mod models;
#[path = "trait.rs"]
pub mod store_trait;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use backoff::FibonacciBackoff;
pub use client::EtcdClient;
pub use config::EtcdConf;
pub use error::StoreError;
pub use lock::{DistributedLock, LockGuard, DEFAULT_LOCK_TTL, SHORT_LOCK_TTL};
pub use models::{Action, Node, WatchEvent};
pub use store_trait::KeyValueStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MemoryStore;
