//! Tenant topology on MidoNet
//!
//! A tenant (Kubernetes namespace) gets a router uplinked to the provider router, a
//! set of NAT rules and one or more bridges whose ports carry the pods. Everything is
//! created on first use and removed again when the last pod of the tenant is gone.
//!
//! - `tenant.rs` - first-use provisioning of a tenant network
//! - `bridge.rs` - extra bridges and container port bindings
//! - `teardown.rs` - removal of an idle tenant

mod bridge;
mod teardown;
mod tenant;

use crate::error::PluginError;
use crate::ipam::IpPool;
use crate::records::Record;
use crate::saga::{Saga, Undo};
use crate::store::{self, Keys};
use etcd_store::{KeyValueStore, SHORT_LOCK_TTL};
use midonet_client::{MidonetClientTrait, Tenant};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Port type of router ports that link to another device.
pub const INTERIOR_ROUTER_PORT: &str = "InteriorRouter";

/// Progress of a tenant provisioning run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Start,
    TenantCreated,
    NetworkChainsCreated,
    RouterCreated,
    UplinkPortsCreated,
    PortsLinked,
    RoutesCreated,
    RulesCreated,
    FirstBridgeCreated,
    BridgeLinked,
    Persisted,
}

/// Builds and removes tenant networks.
pub struct Provisioner {
    pub(crate) store: Arc<dyn KeyValueStore>,
    pub(crate) midonet: Arc<dyn MidonetClientTrait>,
    pub(crate) pool: IpPool,
    pub(crate) keys: Keys,
    pub(crate) provider_router: Uuid,
    pub(crate) host_id: Uuid,
    pub(crate) bridge_cidr: String,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("keys", &self.keys)
            .field("provider_router", &self.provider_router)
            .field("host_id", &self.host_id)
            .field("bridge_cidr", &self.bridge_cidr)
            .finish_non_exhaustive()
    }
}

impl Provisioner {
    /// Create a provisioner
    ///
    /// # Arguments
    /// * `midonet` - MidoNet API client
    /// * `pool` - address pools; also provides the store and key layout
    /// * `provider_router` - router every tenant router is uplinked to
    /// * `host_id` - MidoNet host the container interfaces live on
    /// * `bridge_cidr` - block the first bridge of every tenant is numbered from
    pub fn new(
        midonet: Arc<dyn MidonetClientTrait>,
        pool: IpPool,
        provider_router: Uuid,
        host_id: Uuid,
        bridge_cidr: impl Into<String>,
    ) -> Self {
        Self {
            store: Arc::clone(pool.store()),
            keys: pool.keys().clone(),
            midonet,
            pool,
            provider_router,
            host_id,
            bridge_cidr: bridge_cidr.into(),
        }
    }

    /// Address pools the tenant networks are numbered from.
    pub fn pool(&self) -> &IpPool {
        &self.pool
    }

    /// Info record of `tenant`, provisioning the tenant network on first use.
    pub async fn resolve_tenant(&self, tenant: &str) -> Result<Tenant, PluginError> {
        let info_key = self.keys.tenant_info(tenant);
        if let Some(info) = store::read::<Tenant>(self.store.as_ref(), &info_key).await? {
            return Ok(info);
        }

        let lock = self.keys.tenant_create_lock(tenant);
        store::with_lock(&self.store, &lock, SHORT_LOCK_TTL, async {
            if let Some(info) = store::read::<Tenant>(self.store.as_ref(), &info_key).await? {
                debug!("Tenant {} was provisioned while waiting for the lock", tenant);
                return Ok(info);
            }
            self.init_tenant(tenant).await
        })
        .await
    }

    pub(crate) fn saga(&self, name: String) -> Saga {
        Saga::new(name, Arc::clone(&self.midonet), self.pool.clone())
    }

    /// Write `record` and record its removal.
    pub(crate) async fn persist<T: Record>(&self, saga: &mut Saga, key: String, record: &T) -> Result<(), PluginError> {
        store::write(self.store.as_ref(), &key, record).await?;
        saga.push(Undo::DeleteKey(key));
        Ok(())
    }
}

#[cfg(test)]
mod provisioner_test;
