use super::{INTERIOR_ROUTER_PORT, Provisioner};
use crate::cidr;
use crate::error::PluginError;
use crate::ipam::{MIN_ENTRIES, PoolScope};
use crate::saga::{Saga, Undo, step};
use crate::store;
use etcd_store::SHORT_LOCK_TTL;
use midonet_client::{Bridge, BridgePort, HostInterfacePort, PortLink, Route, Router, RouterPort, Tenant};
use std::future::Future;
use tracing::{debug, info, warn};
use uuid::Uuid;

impl Provisioner {
    /// Number `bridge` from `cidr` and route it from the tenant router.
    ///
    /// Seeds the tenant pool, then creates a router port at the gateway address, a
    /// bridge port, the link between them and a route for `cidr` through the router
    /// port.
    pub(crate) async fn attach_bridge(
        &self,
        saga: &mut Saga,
        tenant: &str,
        router: &Router,
        bridge: &Bridge,
        cidr: &str,
    ) -> Result<(), PluginError> {
        let net = cidr::parse_network(cidr)?;
        let seeded = self.pool.seed(&PoolScope::Tenant(tenant.to_string()), cidr).await?;
        saga.push(Undo::RestorePool(seeded));

        let gateway = cidr::gateway(&net);
        let mut router_port = RouterPort::new(router.id, net.network(), net.prefix_len(), gateway);
        router_port.port.port_type = Some(INTERIOR_ROUTER_PORT.to_string());
        step(saga, Undo::DeletePort(router_port.id()), self.midonet.create_router_port(&router_port)).await?;

        let bridge_port = BridgePort::new(bridge.id);
        step(saga, Undo::DeletePort(bridge_port.id()), self.midonet.create_bridge_port(&bridge_port)).await?;

        let link = PortLink {
            port_id: router_port.id(),
            peer_id: bridge_port.id(),
        };
        step(saga, Undo::Unlink(router_port.id()), self.midonet.create_port_link(&link)).await?;

        let route = Route::normal(router.id, net.network(), net.prefix_len(), router_port.id());
        step(
            saga,
            Undo::DeleteRoute {
                router_id: router.id,
                route_id: route.id,
            },
            self.midonet.create_route(&route),
        )
        .await?;

        info!("Bridge {} of tenant {} serves {} via {}", bridge.name, tenant, net, gateway);
        Ok(())
    }

    /// Add a bridge numbered from the next block and make it the active bridge.
    ///
    /// Runs under the bridge-create lock. When another process already refilled the
    /// pool, the current active bridge is returned unchanged.
    pub async fn create_new_bridge(&self, tenant: &str) -> Result<Uuid, PluginError> {
        let lock = self.keys.bridge_create_lock(tenant);
        store::with_lock(&self.store, &lock, SHORT_LOCK_TTL, async {
            let scope = PoolScope::Tenant(tenant.to_string());
            let active_key = self.keys.active_bridge(tenant);
            if self.pool.available(&scope).await? >= MIN_ENTRIES {
                debug!("Pool of tenant {} was refilled while waiting for the lock", tenant);
                return store::read_required::<Uuid>(self.store.as_ref(), &active_key).await;
            }

            let router = store::read_required::<Router>(self.store.as_ref(), &self.keys.tenant_router(tenant)).await?;
            let next = match self.pool.current_range(&scope).await? {
                Some(current) => cidr::next_cidr(&current.to_string())?,
                None => self.bridge_cidr.clone(),
            };

            let id = Uuid::new_v4();
            let bridge = Bridge {
                id,
                name: format!("{} bridge-{}", tenant, id),
                tenant_id: tenant.to_string(),
                inbound_filter_id: None,
                outbound_filter_id: None,
            };
            info!("Adding bridge {} for tenant {} from {}", bridge.name, tenant, next);

            let mut saga = self.saga(format!("bridge {}", bridge.name));
            let built = async {
                step(&mut saga, Undo::DeleteBridge(bridge.id), self.midonet.create_bridge(&bridge)).await?;
                self.attach_bridge(&mut saga, tenant, &router, &bridge, &next).await?;
                self.persist(&mut saga, self.keys.bridge(tenant, &bridge.id), &bridge).await?;
                store::write(self.store.as_ref(), &active_key, &bridge.id).await
            }
            .await;

            match built {
                Ok(()) => {
                    saga.commit();
                    Ok(bridge.id)
                }
                Err(e) => saga.abort(e).await,
            }
        })
        .await
    }

    /// Bind the host side of a container interface to a port on the active bridge.
    ///
    /// Binding an already bound container returns the existing binding. The port and
    /// its record are created under the tenant-create lock, so a concurrent teardown
    /// either sees the binding or has already removed the tenant, in which case this
    /// fails with [`PluginError::TenantRemoved`].
    pub async fn bind(&self, tenant: &str, container: &str, ifname: &str) -> Result<HostInterfacePort, PluginError> {
        let key = self.keys.binding(tenant, container);
        if let Some(existing) = store::read::<HostInterfacePort>(self.store.as_ref(), &key).await? {
            debug!("Container {} is already bound to port {}", container, existing.port_id);
            return Ok(existing);
        }

        let lock = self.keys.tenant_create_lock(tenant);
        store::with_lock(&self.store, &lock, SHORT_LOCK_TTL, async {
            if store::read::<Tenant>(self.store.as_ref(), &self.keys.tenant_info(tenant)).await?.is_none() {
                return Err(PluginError::TenantRemoved(tenant.to_string()));
            }

            let active = store::read_required::<Uuid>(self.store.as_ref(), &self.keys.active_bridge(tenant)).await?;
            let port = BridgePort::new(active);
            let binding = HostInterfacePort {
                host_id: self.host_id,
                interface_name: ifname.to_string(),
                port_id: port.id(),
            };

            let mut saga = self.saga(format!("bind {}", container));
            let bound = async {
                step(&mut saga, Undo::DeletePort(port.id()), self.midonet.create_bridge_port(&port)).await?;
                step(&mut saga, Undo::Unbind(binding.clone()), self.midonet.bind_interface(&binding)).await?;
                store::write(self.store.as_ref(), &key, &binding).await
            }
            .await;

            match bound {
                Ok(()) => {
                    saga.commit();
                    info!("Bound {} to port {} on bridge {}", ifname, binding.port_id, active);
                    Ok(binding)
                }
                Err(e) => saga.abort(e).await,
            }
        })
        .await
    }

    /// Remove the binding of `container` and its bridge port.
    ///
    /// Each step is attempted even when an earlier one failed. Returns whether a
    /// binding existed.
    pub async fn unbind(&self, tenant: &str, container: &str) -> Result<bool, PluginError> {
        let key = self.keys.binding(tenant, container);
        let Some(binding) = store::read::<HostInterfacePort>(self.store.as_ref(), &key).await? else {
            debug!("Container {} has no binding", container);
            return Ok(false);
        };

        if let Err(e) = retry_once(|| self.midonet.delete_binding(&binding)).await {
            warn!("Failed to unbind port {}: {}", binding.port_id, e);
        }
        if let Err(e) = tolerate_missing(self.midonet.delete_port(binding.port_id).await) {
            warn!("Failed to delete port {}: {}", binding.port_id, e);
        }
        store::remove(self.store.as_ref(), &key).await?;
        info!("Unbound {} from port {}", binding.interface_name, binding.port_id);
        Ok(true)
    }
}

/// Run `call`, and once more if it fails with anything but not-found.
async fn retry_once<F, Fut>(call: F) -> Result<(), PluginError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), midonet_client::MidonetError>>,
{
    match tolerate_missing(call().await) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!("Retrying after: {}", e);
            tolerate_missing(call().await)
        }
    }
}

pub(crate) fn tolerate_missing(result: Result<(), midonet_client::MidonetError>) -> Result<(), PluginError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => Ok(other?),
    }
}
