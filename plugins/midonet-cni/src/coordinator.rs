//! ADD and DEL handling
//!
//! The coordinator sequences one CNI request over the address allocator, the tenant
//! topology and the veth controller. ADD is idempotent through the cached result;
//! DEL is best effort and attempts every step.

use crate::config::{IpamType, NetConf, RouteEntry};
use crate::context::Context;
use crate::error::PluginError;
use crate::ipam::region::{IpService, RegionClient, RegionRequest};
use crate::ipam::{IpPool, Lease, PoolScope};
use crate::provisioner::Provisioner;
use crate::records::LeaseRecord;
use crate::result::CniResult;
use crate::store::{self, Keys};
use crate::veth::{self, VethController};
use etcd_store::{EtcdClient, KeyValueStore};
use ipnet::Ipv4Net;
use midonet_client::MidonetClient;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where pod addresses come from.
pub enum Allocator {
    /// Tenant pools in the store, with MidoNet topology
    Etcd(Provisioner),
    /// External IP service; no topology is managed
    Region(Arc<dyn IpService>),
}

/// Handles one CNI request.
pub struct Coordinator {
    store: Arc<dyn KeyValueStore>,
    keys: Keys,
    allocator: Allocator,
    veth: Arc<dyn VethController>,
    conf: NetConf,
}

impl Coordinator {
    /// Create a coordinator
    ///
    /// # Arguments
    /// * `store` - coordination store
    /// * `allocator` - address source for ADD
    /// * `veth` - host-side wiring
    /// * `conf` - network configuration with defaults applied
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        allocator: Allocator,
        veth: Arc<dyn VethController>,
        conf: NetConf,
    ) -> Self {
        Self {
            keys: Keys::new(&conf.namespace),
            store,
            allocator,
            veth,
            conf,
        }
    }

    /// Build the real clients described by `conf`.
    pub fn from_conf(conf: NetConf) -> Result<Self, PluginError> {
        let store: Arc<dyn KeyValueStore> = Arc::new(EtcdClient::new(&conf.etcd_conf)?);
        let keys = Keys::new(&conf.namespace);

        let allocator = match conf.ipam_type() {
            IpamType::Etcd => {
                let midonet = Arc::new(MidonetClient::new(&conf.midonet_api)?);
                let provider = parse_uuid("midonet_api.provider_router_id", &conf.midonet_api.provider_router_id)?;
                let host = parse_uuid("midonet_host_uuid", &conf.midonet_host_uuid)?;
                let pool = IpPool::new(Arc::clone(&store), keys, conf.midonet_router_cidr.clone());
                Allocator::Etcd(Provisioner::new(midonet, pool, provider, host, conf.midonet_bridge_cidr.clone()))
            }
            IpamType::Region => Allocator::Region(Arc::new(RegionClient::new(
                &conf.ipam.region_net_api,
                &conf.ipam.region_token,
            )?)),
        };
        let veth: Arc<dyn VethController> = Arc::from(veth::controller_for(&conf.veth_ctrl_type)?);

        Ok(Self::new(store, allocator, veth, conf))
    }

    /// Attach the container and return its result.
    pub async fn add(&self, ctx: &Context) -> Result<CniResult, PluginError> {
        let result_key = self.keys.result(&ctx.container_id);
        if let Some(cached) = store::read::<CniResult>(self.store.as_ref(), &result_key).await? {
            info!("Returning cached result for container {}", ctx.container_id);
            return Ok(cached.with_version(&self.conf.cni_version));
        }

        let (address, gateway) = match &self.allocator {
            Allocator::Etcd(provisioner) => self.allocate(provisioner, ctx).await?,
            Allocator::Region(service) => {
                let request = RegionRequest::new(&self.conf.midonet_host_uuid, &ctx.cni_container_id, &ctx.pod_name);
                let lease = service.request_ip(&ctx.tenant, &request).await?;
                (lease.address, lease.gateway)
            }
        };

        self.veth.wire(&ctx.cni_container_id, address, gateway).await?;

        let routes = self.routes().await;
        let result = CniResult::for_address(&self.conf.cni_version, address, gateway, &routes);
        if let Err(e) = store::write(self.store.as_ref(), &result_key, &result).await {
            warn!("Failed to cache result of container {}: {}", ctx.container_id, e);
        }
        info!("Container {} attached with {} via {}", ctx.container_id, address, gateway);
        Ok(result)
    }

    /// ADD, followed by a DEL of the same container when it fails.
    ///
    /// The DEL removes whatever the failed attempt left behind. Its own failure is
    /// logged; the caller always gets the ADD error.
    pub async fn add_or_unwind(&self, ctx: &Context) -> Result<CniResult, PluginError> {
        let err = match self.add(ctx).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };
        error!("ADD of container {} failed: {}", ctx.container_id, err);
        if let Err(cleanup) = self.delete(ctx).await {
            warn!("Cleanup after failed ADD of container {}: {}", ctx.container_id, cleanup);
        }
        Err(err)
    }

    async fn allocate(&self, provisioner: &Provisioner, ctx: &Context) -> Result<(Ipv4Net, Ipv4Addr), PluginError> {
        provisioner.resolve_tenant(&ctx.tenant).await?;

        let pool = provisioner.pool();
        let lease = match pool.lease(&ctx.tenant, &ctx.container_id).await? {
            Lease::Leased(lease) => lease,
            Lease::Exhausted => {
                let bridge = provisioner.create_new_bridge(&ctx.tenant).await?;
                debug!("Tenant {} moved to bridge {}", ctx.tenant, bridge);
                match pool.lease(&ctx.tenant, &ctx.container_id).await? {
                    Lease::Leased(lease) => lease,
                    Lease::Exhausted => return Err(PluginError::PoolExhausted(ctx.tenant.clone())),
                }
            }
        };

        if let Err(e) = provisioner.bind(&ctx.tenant, &ctx.container_id, &ctx.host_ifname).await {
            warn!("Binding {} failed, retrying: {}", ctx.host_ifname, e);
            provisioner.bind(&ctx.tenant, &ctx.container_id, &ctx.host_ifname).await?;
        }
        Ok((lease.address, lease.gateway))
    }

    /// Configured routes, or the shared route set in the store.
    async fn routes(&self) -> Vec<RouteEntry> {
        if !self.conf.ipam.route.is_empty() {
            return self.conf.ipam.route.clone();
        }
        match store::read::<Vec<RouteEntry>>(self.store.as_ref(), &self.keys.route_config()).await {
            Ok(routes) => routes.unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring stored routes: {}", e);
                Vec::new()
            }
        }
    }

    /// Detach the container. Every step runs; the first failure is returned.
    pub async fn delete(&self, ctx: &Context) -> Result<(), PluginError> {
        let mut first_error: Option<PluginError> = None;
        let mut note = |step: &str, result: Result<(), PluginError>| {
            if let Err(e) = result {
                warn!("DEL of container {}: {} failed: {}", ctx.container_id, step, e);
                first_error.get_or_insert(e);
            }
        };

        note(
            "result cleanup",
            store::remove(self.store.as_ref(), &self.keys.result(&ctx.container_id)).await,
        );

        if let Allocator::Etcd(provisioner) = &self.allocator {
            note("unbind", provisioner.unbind(&ctx.tenant, &ctx.container_id).await.map(|_| ()));
            note("address release", self.release_lease(provisioner, ctx).await);
            let removed = provisioner.deprovision_if_idle(&ctx.tenant).await;
            if let Ok(true) = removed {
                info!("Tenant {} had no containers left and was removed", ctx.tenant);
            }
            note("tenant teardown", removed.map(|_| ()));
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn release_lease(&self, provisioner: &Provisioner, ctx: &Context) -> Result<(), PluginError> {
        let key = self.keys.lease(&ctx.tenant, &ctx.container_id);
        let Some(lease) = store::read::<LeaseRecord>(self.store.as_ref(), &key).await? else {
            debug!("Container {} holds no address", ctx.container_id);
            return Ok(());
        };
        let scope = PoolScope::Tenant(ctx.tenant.clone());
        if !provisioner.pool().release(&scope, lease.address).await? {
            info!("Address {} of container {} was not returned to the pool", lease.address, ctx.container_id);
        }
        store::remove(self.store.as_ref(), &key).await
    }
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, PluginError> {
    Uuid::parse_str(value.trim()).map_err(|e| PluginError::Config(format!("{} {:?} is not a UUID: {}", field, value, e)))
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod coordinator_test;
