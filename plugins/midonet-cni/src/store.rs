//! Store layout and typed access
//!
//! All plugin state lives under one namespace in the coordination store. [`Keys`]
//! builds every path; the free functions read and write [`Record`]s and run critical
//! sections under a [`DistributedLock`].

use crate::error::PluginError;
use crate::records::Record;
use etcd_store::{DistributedLock, KeyValueStore, StoreError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Key builder for the plugin namespace (default `/midonet-cni`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    root: String,
}

impl Keys {
    /// Keys under `namespace`; surrounding slashes are ignored.
    pub fn new(namespace: &str) -> Self {
        let trimmed = namespace.trim().trim_matches('/');
        Self {
            root: format!("/{}", trimmed),
        }
    }

    /// Namespace root, with a leading slash.
    pub fn root(&self) -> &str {
        &self.root
    }

    fn path(&self, rest: &str) -> String {
        format!("{}/{}", self.root, rest)
    }

    /// Everything recorded about a tenant network.
    pub fn tenant_dir(&self, tenant: &str) -> String {
        self.path(&format!("tenant/{}", tenant))
    }

    /// Tenant record; present once the network is fully provisioned.
    pub fn tenant_info(&self, tenant: &str) -> String {
        self.path(&format!("tenant/{}/info", tenant))
    }

    /// Tenant router record.
    pub fn tenant_router(&self, tenant: &str) -> String {
        self.path(&format!("tenant/{}/router", tenant))
    }

    /// Uplink between the tenant router and the provider router.
    pub fn router_link(&self, tenant: &str) -> String {
        self.path(&format!("tenant/{}/router-link", tenant))
    }

    /// Default NAT rules of the tenant router.
    pub fn router_rules(&self, tenant: &str) -> String {
        self.path(&format!("tenant/{}/router-rule", tenant))
    }

    /// Record of one tenant bridge.
    pub fn bridge(&self, tenant: &str, bridge: &uuid::Uuid) -> String {
        self.path(&format!("tenant/{}/bridge/{}", tenant, bridge))
    }

    /// Id of the bridge new ports are created on.
    pub fn active_bridge(&self, tenant: &str) -> String {
        self.path(&format!("tenant/{}/bridge/usage", tenant))
    }

    /// Lock serializing provisioning, binding and teardown of a tenant.
    pub fn tenant_create_lock(&self, tenant: &str) -> String {
        self.path(&format!("tenant/{}/create", tenant))
    }

    /// Lock serializing new bridges and pool writes of a tenant.
    pub fn bridge_create_lock(&self, tenant: &str) -> String {
        self.path(&format!("tenant/{}/bridge/create", tenant))
    }

    /// Lock over the uplink pool.
    pub fn router_ip_lock(&self) -> String {
        self.path("router_ip")
    }

    /// Free-address directory of a tenant pool.
    pub fn tenant_pool(&self, tenant: &str) -> String {
        self.path(&format!("ip/pod/{}/available", tenant))
    }

    /// Free-address directory of the uplink pool.
    pub fn router_pool(&self) -> String {
        self.path("ip/router/available")
    }

    /// Parent of the tenant pool and its lease records.
    pub fn tenant_ip_dir(&self, tenant: &str) -> String {
        self.path(&format!("ip/pod/{}", tenant))
    }

    /// Address leased to a container.
    pub fn lease(&self, tenant: &str, container: &str) -> String {
        self.path(&format!("ip/pod/{}/{}", tenant, container))
    }

    /// Uplink addresses taken by a tenant router.
    pub fn uplink(&self, router: &uuid::Uuid) -> String {
        self.path(&format!("pod/router/{}", router))
    }

    /// Binding records of a tenant.
    pub fn binding_dir(&self, tenant: &str) -> String {
        self.path(&format!("bingding/{}", tenant))
    }

    /// Host interface binding of a container.
    pub fn binding(&self, tenant: &str, container: &str) -> String {
        self.path(&format!("bingding/{}/{}", tenant, container))
    }

    /// Cached CNI result of a container.
    pub fn result(&self, container: &str) -> String {
        self.path(&format!("result/{}", container))
    }

    /// Shared route set reported with every result.
    pub fn route_config(&self) -> String {
        self.path("config/route")
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_NAMESPACE)
    }
}

/// Read and decode `key`. A missing key is `Ok(None)`.
pub async fn read<T: Record>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>, PluginError> {
    match store.get(key).await {
        Ok(node) => T::decode(key, node.value()).map(Some),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read and decode `key`, which must exist.
pub async fn read_required<T: Record>(store: &dyn KeyValueStore, key: &str) -> Result<T, PluginError> {
    read(store, key)
        .await?
        .ok_or_else(|| PluginError::Store(StoreError::NotFound(key.to_string())))
}

/// Unconditional write.
pub async fn write<T: Record>(store: &dyn KeyValueStore, key: &str, record: &T) -> Result<(), PluginError> {
    store.set(key, &record.encode(key)?).await?;
    Ok(())
}

/// Write only if `key` does not exist yet.
pub async fn create<T: Record>(store: &dyn KeyValueStore, key: &str, record: &T) -> Result<(), PluginError> {
    store.create(key, &record.encode(key)?, None).await?;
    Ok(())
}

/// Delete `key`; a missing key counts as deleted.
pub async fn remove(store: &dyn KeyValueStore, key: &str) -> Result<(), PluginError> {
    match store.delete(key).await {
        Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Run `work` while holding the lock at `key`.
///
/// The lock is released whatever `work` returns. A failed release is only logged: the
/// key expires with its TTL.
pub async fn with_lock<T, F>(
    store: &Arc<dyn KeyValueStore>,
    key: &str,
    ttl: Duration,
    work: F,
) -> Result<T, PluginError>
where
    F: Future<Output = Result<T, PluginError>>,
{
    let guard = DistributedLock::new(Arc::clone(store), key, ttl).acquire().await?;
    let result = work.await;
    if let Err(e) = guard.release().await {
        warn!("Failed to release lock {}: {}", key, e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::LeaseRecord;
    use etcd_store::MemoryStore;
    use etcd_store::SHORT_LOCK_TTL;

    #[test]
    fn test_namespace_normalized() {
        assert_eq!(Keys::new("midonet-cni/").root(), "/midonet-cni");
        assert_eq!(Keys::new("/cni").tenant_info("ns1"), "/cni/tenant/ns1/info");
    }

    #[test]
    fn test_key_schema() {
        let keys = Keys::default();
        assert_eq!(keys.tenant_pool("ns1"), "/midonet-cni/ip/pod/ns1/available");
        assert_eq!(keys.lease("ns1", "abc"), "/midonet-cni/ip/pod/ns1/abc");
        assert_eq!(keys.binding("ns1", "abc"), "/midonet-cni/bingding/ns1/abc");
        assert_eq!(keys.active_bridge("ns1"), "/midonet-cni/tenant/ns1/bridge/usage");
        assert_eq!(keys.bridge_create_lock("ns1"), "/midonet-cni/tenant/ns1/bridge/create");
        assert_eq!(keys.router_ip_lock(), "/midonet-cni/router_ip");
        assert_eq!(keys.route_config(), "/midonet-cni/config/route");
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let store = MemoryStore::new();
        let lease: Option<LeaseRecord> = read(&store, "/midonet-cni/ip/pod/ns1/abc").await.unwrap();
        assert!(lease.is_none());
        let required: Result<LeaseRecord, _> = read_required(&store, "/midonet-cni/ip/pod/ns1/abc").await;
        assert!(required.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_malformed_record_is_decode_error() {
        let store = MemoryStore::new();
        store.put("/midonet-cni/ip/pod/ns1/abc", "not-an-address");
        let err = read::<LeaseRecord>(&store, "/midonet-cni/ip/pod/ns1/abc").await.unwrap_err();
        assert!(matches!(err, PluginError::Decode { ref key, .. } if key == "/midonet-cni/ip/pod/ns1/abc"));
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let memory = MemoryStore::new();
        let store: Arc<dyn KeyValueStore> = Arc::new(memory.clone());

        let result: Result<(), PluginError> = with_lock(&store, "/midonet-cni/router_ip", SHORT_LOCK_TTL, async {
            assert!(memory.value("/midonet-cni/router_ip").is_some());
            Err(PluginError::Config("boom".into()))
        })
        .await;

        assert!(result.is_err());
        assert!(memory.value("/midonet-cni/router_ip").is_none());
    }
}
