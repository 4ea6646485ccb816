//! Distributed mutex on top of the coordination store
//!
//! A lock is a single key created with `prevExist=false` and a TTL. Whoever creates it
//! holds the lock; everybody else watches the key and races again once it is deleted
//! or expires. The lock serializes critical sections only; it grants no access to data.

use crate::backoff::FibonacciBackoff;
use crate::error::StoreError;
use crate::store_trait::KeyValueStore;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// TTL for locks that do not ask for anything shorter.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// TTL for hot paths (tenant creation, bridge creation, uplink pool).
pub const SHORT_LOCK_TTL: Duration = Duration::from_secs(20);

/// Attempts for store errors that are not lock contention.
const MAX_ATTEMPTS: u32 = 3;

/// An unacquired lock on `key`.
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    key: String,
    holder: String,
    ttl: Duration,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("holder", &self.holder)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl DistributedLock {
    /// Describe a lock. A zero TTL means [`DEFAULT_LOCK_TTL`].
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, ttl: Duration) -> Self {
        let mut key = key.into();
        if !key.starts_with('/') {
            key.insert(0, '/');
        }
        let ttl = if ttl.is_zero() { DEFAULT_LOCK_TTL } else { ttl };

        Self {
            store,
            key,
            holder: holder_identity(),
            ttl,
        }
    }

    /// Store key the lock lives at.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value written into the lock key while held.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Block until the lock is held.
    ///
    /// Contention never counts against the retry budget. Other store errors are
    /// retried up to three attempts in total before being returned.
    pub async fn acquire(self) -> Result<LockGuard, StoreError> {
        let mut backoff = FibonacciBackoff::default();
        let mut attempt = 1;

        loop {
            match self.race().await {
                Ok(()) => {
                    debug!("Acquired lock {} as {}", self.key, self.holder);
                    return Ok(LockGuard {
                        store: self.store,
                        key: self.key,
                        holder: self.holder,
                    });
                }
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!("Lock {} attempt {} failed: {}", self.key, attempt, e);
                    attempt += 1;
                    tokio::time::sleep(backoff.next_backoff()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Create the key, or wait for the current holder to go away and try again.
    async fn race(&self) -> Result<(), StoreError> {
        loop {
            match self.store.create(&self.key, &self.holder, Some(self.ttl)).await {
                Ok(_) => return Ok(()),
                Err(StoreError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }

            let current = match self.store.get(&self.key).await {
                Ok(node) => node,
                // released between our create and get
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            debug!("Lock {} held by {}, waiting for release", self.key, current.value());

            self.wait_for_release(current.modified_index + 1).await?;
        }
    }

    async fn wait_for_release(&self, mut wait_index: u64) -> Result<(), StoreError> {
        loop {
            match self.store.watch(&self.key, wait_index).await {
                Ok(event) if event.action.is_removal() => return Ok(()),
                Ok(event) => wait_index = event.index() + 1,
                Err(StoreError::EventIndexCleared(_)) => return Ok(()),
                Err(e) if e.is_timeout() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

/// A held lock. Call [`LockGuard::release`] when the critical section ends; a guard
/// that is dropped without release frees the key only when its TTL runs out.
#[must_use = "a held lock must be released"]
pub struct LockGuard {
    store: Arc<dyn KeyValueStore>,
    key: String,
    holder: String,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

impl LockGuard {
    /// Store key of the held lock.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Delete the lock key if this process still owns it.
    ///
    /// A key that is already gone, or that now belongs to someone else because our
    /// TTL ran out, counts as released.
    pub async fn release(self) -> Result<(), StoreError> {
        let mut backoff = FibonacciBackoff::default();
        let mut attempt = 1;

        loop {
            match self.store.compare_and_delete(&self.key, &self.holder).await {
                Ok(_) | Err(StoreError::NotFound(_)) => {
                    debug!("Released lock {}", self.key);
                    return Ok(());
                }
                Err(StoreError::CompareFailed(_)) => {
                    info!("Lock {} expired before release and is held by another process", self.key);
                    return Ok(());
                }
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!("Release of lock {} attempt {} failed: {}", self.key, attempt, e);
                    attempt += 1;
                    tokio::time::sleep(backoff.next_backoff()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// `hostname-pid-timestamp`
fn holder_identity() -> String {
    format!(
        "{}-{}-{}",
        hostname(),
        std::process::id(),
        Local::now().format("%Y%m%d-%H:%M:%S%.9f")
    )
}

fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> (MemoryStore, Arc<dyn KeyValueStore>) {
        let memory = MemoryStore::new();
        let shared: Arc<dyn KeyValueStore> = Arc::new(memory.clone());
        (memory, shared)
    }

    #[tokio::test]
    async fn test_acquire_writes_holder_with_ttl() {
        let (memory, shared) = store();
        let lock = DistributedLock::new(shared, "midonet-cni/router_ip", SHORT_LOCK_TTL);
        let holder = lock.holder().to_string();

        let guard = lock.acquire().await.unwrap();
        assert_eq!(guard.key(), "/midonet-cni/router_ip");
        assert_eq!(memory.value("/midonet-cni/router_ip").as_deref(), Some(holder.as_str()));
        assert_eq!(memory.ttl("/midonet-cni/router_ip"), Some(20));

        guard.release().await.unwrap();
        assert!(memory.value("/midonet-cni/router_ip").is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_uses_default() {
        let (_memory, shared) = store();
        let lock = DistributedLock::new(shared, "/k", Duration::ZERO);
        assert_eq!(lock.ttl, DEFAULT_LOCK_TTL);
    }

    #[tokio::test]
    async fn test_holder_identity_has_pid() {
        let identity = holder_identity();
        assert!(identity.contains(&format!("-{}-", std::process::id())));
    }

    #[tokio::test]
    async fn test_release_of_missing_key_is_ok() {
        let (memory, shared) = store();
        let guard = DistributedLock::new(shared, "/lock", SHORT_LOCK_TTL).acquire().await.unwrap();
        memory.remove("/lock");
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_does_not_steal_foreign_lock() {
        let (memory, shared) = store();
        let guard = DistributedLock::new(shared, "/lock", SHORT_LOCK_TTL).acquire().await.unwrap();
        // our lease expired and a peer took the key
        memory.put("/lock", "peer-1-x");
        guard.release().await.unwrap();
        assert_eq!(memory.value("/lock").as_deref(), Some("peer-1-x"));
    }

    #[tokio::test]
    async fn test_second_acquire_waits_for_release() {
        let (_memory, shared) = store();
        let first = DistributedLock::new(Arc::clone(&shared), "/lock", SHORT_LOCK_TTL)
            .acquire()
            .await
            .unwrap();

        let inside = Arc::new(AtomicUsize::new(1));
        let observed = Arc::clone(&inside);
        let contender = DistributedLock::new(Arc::clone(&shared), "/lock", SHORT_LOCK_TTL);
        let waiter = tokio::spawn(async move {
            let guard = contender.acquire().await.unwrap();
            let holders = observed.fetch_add(1, Ordering::SeqCst) + 1;
            guard.release().await.unwrap();
            holders
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "second holder must block while the first holds the key");

        inside.fetch_sub(1, Ordering::SeqCst);
        first.release().await.unwrap();

        let holders_seen = waiter.await.unwrap();
        assert_eq!(holders_seen, 1, "second holder must never overlap the first");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_is_reacquired() {
        let (_memory, shared) = store();
        let stale = DistributedLock::new(Arc::clone(&shared), "/lock", Duration::from_secs(2))
            .acquire()
            .await
            .unwrap();
        // the first holder crashes without releasing
        std::mem::forget(stale);

        let guard = tokio::time::timeout(
            Duration::from_secs(10),
            DistributedLock::new(shared, "/lock", SHORT_LOCK_TTL).acquire(),
        )
        .await
        .expect("lock should be free after TTL expiry")
        .unwrap();
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_errors_are_retried_then_surfaced() {
        let (memory, shared) = store();
        memory.fail_next("create", 2);
        let guard = DistributedLock::new(Arc::clone(&shared), "/lock", SHORT_LOCK_TTL)
            .acquire()
            .await
            .unwrap();
        guard.release().await.unwrap();

        memory.fail_next("create", 3);
        let result = DistributedLock::new(shared, "/lock", SHORT_LOCK_TTL).acquire().await;
        assert!(matches!(result, Err(StoreError::Api { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_holders_never_overlap() {
        let (_memory, shared) = store();
        let inside = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();

        for _ in 0..8 {
            let shared = Arc::clone(&shared);
            let inside = Arc::clone(&inside);
            tasks.push(tokio::spawn(async move {
                let guard = DistributedLock::new(shared, "/lock", SHORT_LOCK_TTL)
                    .acquire()
                    .await
                    .unwrap();
                let concurrent = inside.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                guard.release().await.unwrap();
                concurrent
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), 1);
        }
    }
}
