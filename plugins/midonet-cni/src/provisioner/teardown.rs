use super::Provisioner;
use super::bridge::tolerate_missing;
use crate::error::PluginError;
use crate::records::UplinkPair;
use crate::store;
use etcd_store::{SHORT_LOCK_TTL, StoreError};
use midonet_client::{MidonetError, Router, Tenant};
use tracing::{debug, info, warn};
use uuid::Uuid;

impl Provisioner {
    /// Tear the tenant network down when no container is bound to it or holds one of
    /// its addresses any more.
    ///
    /// Returns whether the tenant was deprovisioned.
    pub async fn deprovision_if_idle(&self, tenant: &str) -> Result<bool, PluginError> {
        if self.attached_count(tenant).await? > 0 {
            return Ok(false);
        }
        let info_key = self.keys.tenant_info(tenant);
        if store::read::<Tenant>(self.store.as_ref(), &info_key).await?.is_none() {
            debug!("Tenant {} has no network to remove", tenant);
            return Ok(false);
        }

        let lock = self.keys.tenant_create_lock(tenant);
        store::with_lock(&self.store, &lock, SHORT_LOCK_TTL, async {
            let remaining = self.attached_count(tenant).await?;
            if remaining > 0 {
                info!("Tenant {} gained {} containers, keeping its network", tenant, remaining);
                return Ok(false);
            }
            self.deprovision(tenant).await?;
            Ok(true)
        })
        .await
    }

    /// Binding records plus lease records of `tenant`.
    ///
    /// An ADD writes its lease before it binds, so counting leases keeps the network of
    /// a container that is still being attached.
    async fn attached_count(&self, tenant: &str) -> Result<usize, PluginError> {
        let bindings = self.record_count(&self.keys.binding_dir(tenant)).await?;
        // the free pool lives in a subdirectory; only lease records are plain keys here
        let leases = self.record_count(&self.keys.tenant_ip_dir(tenant)).await?;
        Ok(bindings + leases)
    }

    async fn record_count(&self, dir: &str) -> Result<usize, PluginError> {
        match self.store.list(dir).await {
            Ok(nodes) => Ok(nodes.iter().filter(|node| !node.dir).count()),
            Err(StoreError::NotFound(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every MidoNet object and store record of `tenant`.
    ///
    /// All steps run; the first failure is returned at the end.
    async fn deprovision(&self, tenant: &str) -> Result<(), PluginError> {
        info!("Removing network of tenant {}", tenant);
        let mut first_error: Option<PluginError> = None;
        let mut note = |step: &str, result: Result<(), PluginError>| {
            if let Err(e) = result {
                warn!("Teardown of tenant {}: {} failed: {}", tenant, step, e);
                first_error.get_or_insert(e);
            }
        };

        let recorded = store::read::<Router>(self.store.as_ref(), &self.keys.tenant_router(tenant)).await;
        let mut routers: Vec<Uuid> = match recorded {
            Ok(router) => router.map(|router| router.id).into_iter().collect(),
            Err(e) => {
                note("read router record", Err(e));
                Vec::new()
            }
        };

        let (swept, bridges, chains) = tokio::join!(
            self.sweep_routers(tenant),
            self.sweep_bridges(tenant),
            self.sweep_chains(tenant)
        );
        match swept {
            Ok(ids) => {
                for id in ids {
                    if !routers.contains(&id) {
                        routers.push(id);
                    }
                }
            }
            Err(e) => note("router sweep", Err(e)),
        }
        note("bridge sweep", bridges);
        note("chain sweep", chains);

        note("keystone tenant", tolerate_missing(self.midonet.delete_tenant(tenant).await));

        for router in &routers {
            note("uplink release", self.release_uplink(router).await);
        }

        for dir in [
            self.keys.tenant_dir(tenant),
            self.keys.tenant_ip_dir(tenant),
            self.keys.binding_dir(tenant),
        ] {
            let removed = match self.store.delete_dir(&dir).await {
                Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
                Err(e) => Err(e.into()),
            };
            note("store cleanup", removed);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Tenant {} removed", tenant);
                Ok(())
            }
        }
    }

    async fn release_uplink(&self, router: &Uuid) -> Result<(), PluginError> {
        let key = self.keys.uplink(router);
        let Some(pair) = store::read::<UplinkPair>(self.store.as_ref(), &key).await? else {
            return Ok(());
        };
        let returned = self.pool.release_uplink_pair(&pair).await?;
        debug!("Returned {} uplink addresses of router {}", returned, router);
        store::remove(self.store.as_ref(), &key).await
    }

    /// Delete the tenant routers with their uplink peers, links, routes and ports.
    async fn sweep_routers(&self, tenant: &str) -> Result<Vec<Uuid>, PluginError> {
        let routers = listed(self.midonet.list_routers(tenant).await)?;
        let mut removed = Vec::with_capacity(routers.len());
        for router in routers {
            for peer in listed(self.midonet.list_router_peer_ports(router.id).await)? {
                tolerate_missing(self.midonet.delete_port(peer.id()).await)?;
            }
            for port in listed(self.midonet.list_router_ports(router.id).await)? {
                if port.port.peer_id.is_some() {
                    tolerate_missing(self.midonet.delete_port_link(port.id()).await)?;
                }
            }
            for route in listed(self.midonet.list_routes(router.id).await)? {
                tolerate_missing(self.midonet.delete_route(router.id, route.id).await)?;
            }
            for port in listed(self.midonet.list_router_ports(router.id).await)? {
                tolerate_missing(self.midonet.delete_port(port.id()).await)?;
            }
            tolerate_missing(self.midonet.delete_router(router.id).await)?;
            debug!("Deleted router {}", router.name);
            removed.push(router.id);
        }
        Ok(removed)
    }

    /// Delete the tenant bridges and their ports.
    async fn sweep_bridges(&self, tenant: &str) -> Result<(), PluginError> {
        for bridge in listed(self.midonet.list_bridges(tenant).await)? {
            for port in listed(self.midonet.list_bridge_ports(bridge.id).await)? {
                if port.port.peer_id.is_some() {
                    tolerate_missing(self.midonet.delete_port_link(port.id()).await)?;
                }
                tolerate_missing(self.midonet.delete_port(port.id()).await)?;
            }
            tolerate_missing(self.midonet.delete_bridge(bridge.id).await)?;
            debug!("Deleted bridge {}", bridge.name);
        }
        Ok(())
    }

    /// Delete the tenant chains and their rules.
    async fn sweep_chains(&self, tenant: &str) -> Result<(), PluginError> {
        for chain in listed(self.midonet.list_chains(tenant).await)? {
            for rule in listed(self.midonet.list_rules(chain.id).await)? {
                tolerate_missing(self.midonet.delete_rule(rule.id).await)?;
            }
            tolerate_missing(self.midonet.delete_chain(chain.id).await)?;
            debug!("Deleted chain {}", chain.name);
        }
        Ok(())
    }
}

/// A listing of something that vanished concurrently is empty.
fn listed<T>(result: Result<Vec<T>, MidonetError>) -> Result<Vec<T>, PluginError> {
    match result {
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        other => Ok(other?),
    }
}
