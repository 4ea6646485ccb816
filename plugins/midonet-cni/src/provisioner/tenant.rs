use super::{INTERIOR_ROUTER_PORT, Provisioner, Stage};
use crate::error::PluginError;
use crate::records::UplinkPair;
use crate::saga::{Saga, Undo, step};
use crate::store;
use midonet_client::{Bridge, Chain, NatTarget, PortLink, Route, Router, RouterPort, Rule, RuleType, Tenant};
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};
use uuid::Uuid;

const NAT_PORT_FROM: u16 = 1024;
const NAT_PORT_TO: u16 = 65535;

/// Router, uplink and rules of a tenant once they exist.
struct RouterSetup {
    router: Router,
    pair: UplinkPair,
    uplink: PortLink,
}

impl Provisioner {
    /// Build the network of `tenant` from scratch. Runs under the tenant-create lock.
    pub(crate) async fn init_tenant(&self, tenant: &str) -> Result<Tenant, PluginError> {
        info!("Provisioning network for tenant {}", tenant);
        let mut saga = self.saga(format!("tenant {}", tenant));
        let mut stage = Stage::Start;

        match self.build_tenant(tenant, &mut saga, &mut stage).await {
            Ok(info) => {
                saga.commit();
                info!("Tenant {} provisioned", tenant);
                Ok(info)
            }
            Err(e) => {
                warn!("Provisioning of tenant {} stopped after {:?}", tenant, stage);
                saga.abort(e).await
            }
        }
    }

    async fn build_tenant(&self, tenant: &str, saga: &mut Saga, stage: &mut Stage) -> Result<Tenant, PluginError> {
        let info = Tenant::for_namespace(tenant);
        match self.midonet.create_tenant(&info).await {
            Ok(()) => saga.push(Undo::DeleteTenant(info.id.clone())),
            // left over from an earlier run; not ours to remove
            Err(e) if e.is_conflict() => debug!("Keystone tenant {} already exists", tenant),
            Err(e) => return Err(e.into()),
        }
        advance(stage, Stage::TenantCreated, tenant);

        let inbound = chain(tenant, "upstream_in");
        let outbound = chain(tenant, "upstream_out");
        step(saga, Undo::DeleteChain(inbound.id), self.midonet.create_chain(&inbound)).await?;
        step(saga, Undo::DeleteChain(outbound.id), self.midonet.create_chain(&outbound)).await?;
        advance(stage, Stage::NetworkChainsCreated, tenant);

        let router = Router {
            id: Uuid::new_v4(),
            name: format!("{} default router", tenant),
            tenant_id: tenant.to_string(),
            inbound_filter_id: Some(inbound.id),
            outbound_filter_id: Some(outbound.id),
        };
        step(saga, Undo::DeleteRouter(router.id), self.midonet.create_router(&router)).await?;
        advance(stage, Stage::RouterCreated, tenant);

        let setup = self.uplink_router(saga, stage, tenant, router).await?;
        let rules = self.create_rules(saga, &inbound, &outbound, &setup).await?;
        advance(stage, Stage::RulesCreated, tenant);

        let bridge = Bridge {
            id: Uuid::new_v4(),
            name: format!("{} bridge0", tenant),
            tenant_id: tenant.to_string(),
            inbound_filter_id: None,
            outbound_filter_id: None,
        };
        step(saga, Undo::DeleteBridge(bridge.id), self.midonet.create_bridge(&bridge)).await?;
        advance(stage, Stage::FirstBridgeCreated, tenant);

        let bridge_cidr = self.bridge_cidr.clone();
        self.attach_bridge(saga, tenant, &setup.router, &bridge, &bridge_cidr).await?;
        advance(stage, Stage::BridgeLinked, tenant);

        let keys = &self.keys;
        self.persist(saga, keys.tenant_router(tenant), &setup.router).await?;
        self.persist(saga, keys.uplink(&setup.router.id), &setup.pair).await?;
        self.persist(saga, keys.router_link(tenant), &setup.uplink).await?;
        self.persist(saga, keys.router_rules(tenant), &rules).await?;
        self.persist(saga, keys.bridge(tenant, &bridge.id), &bridge).await?;
        self.persist(saga, keys.active_bridge(tenant), &bridge.id).await?;
        advance(stage, Stage::Persisted, tenant);

        // the info record marks the tenant as complete, so it goes last
        store::create(self.store.as_ref(), &keys.tenant_info(tenant), &info).await?;
        Ok(info)
    }

    /// Connect the tenant router to the provider router over a fresh uplink pair.
    async fn uplink_router(
        &self,
        saga: &mut Saga,
        stage: &mut Stage,
        tenant: &str,
        router: Router,
    ) -> Result<RouterSetup, PluginError> {
        let pair = self.pool.lease_uplink_pair().await?;
        saga.push(Undo::ReleaseUplink(pair));
        debug!("Tenant {} uplink: local {} remote {}", tenant, pair.local, pair.remote);

        let mut remote = RouterPort::new(
            self.provider_router,
            pair.remote.network(),
            pair.remote.prefix_len(),
            pair.remote.addr(),
        );
        remote.port.port_type = Some(INTERIOR_ROUTER_PORT.to_string());
        step(saga, Undo::DeletePort(remote.id()), self.midonet.create_router_port(&remote)).await?;

        let mut local = RouterPort::new(router.id, pair.local.network(), pair.local.prefix_len(), pair.local.addr());
        local.port.port_type = Some(INTERIOR_ROUTER_PORT.to_string());
        step(saga, Undo::DeletePort(local.id()), self.midonet.create_router_port(&local)).await?;
        advance(stage, Stage::UplinkPortsCreated, tenant);

        let uplink = PortLink {
            port_id: local.id(),
            peer_id: remote.id(),
        };
        step(saga, Undo::Unlink(local.id()), self.midonet.create_port_link(&uplink)).await?;
        advance(stage, Stage::PortsLinked, tenant);

        let mut outbound = Route::normal(router.id, Ipv4Addr::UNSPECIFIED, 0, local.id());
        outbound.next_hop_gateway = Some(pair.remote.addr());
        step(
            saga,
            Undo::DeleteRoute {
                router_id: router.id,
                route_id: outbound.id,
            },
            self.midonet.create_route(&outbound),
        )
        .await?;

        let inbound = Route::normal(self.provider_router, pair.local.addr(), 32, remote.id());
        step(
            saga,
            Undo::DeleteRoute {
                router_id: self.provider_router,
                route_id: inbound.id,
            },
            self.midonet.create_route(&inbound),
        )
        .await?;
        advance(stage, Stage::RoutesCreated, tenant);

        Ok(RouterSetup { router, pair, uplink })
    }

    /// Return-flow accept, SNAT to the uplink address and the matching reverse SNAT.
    ///
    /// The rules roll back as a group before the error reaches the outer saga.
    async fn create_rules(
        &self,
        saga: &mut Saga,
        inbound: &Chain,
        outbound: &Chain,
        setup: &RouterSetup,
    ) -> Result<Vec<Rule>, PluginError> {
        let local_port = setup.uplink.port_id;
        let local_addr = setup.pair.local.addr();

        let mut accept = Rule::new(RuleType::Accept, outbound.id, 1);
        accept.match_return_flow = true;
        accept.fragment_policy = Some("any".to_string());

        let mut snat = Rule::new(RuleType::Snat, outbound.id, 2);
        snat.flow_action = Some("accept".to_string());
        snat.out_ports = vec![local_port];
        snat.fragment_policy = Some("unfragmented".to_string());
        snat.nat_targets = vec![NatTarget {
            address_from: local_addr,
            address_to: local_addr,
            port_from: NAT_PORT_FROM,
            port_to: NAT_PORT_TO,
        }];

        let mut rev_snat = Rule::new(RuleType::RevSnat, inbound.id, 1);
        rev_snat.flow_action = Some("continue".to_string());
        rev_snat.in_ports = vec![local_port];
        rev_snat.fragment_policy = Some("any".to_string());

        let rules = vec![accept, snat, rev_snat];
        let mut rule_saga = saga.child("rules");
        for rule in &rules {
            if let Err(e) = step(&mut rule_saga, Undo::DeleteRule(rule.id), self.midonet.create_rule(rule)).await {
                return rule_saga.abort(e).await;
            }
        }
        saga.absorb(rule_saga);
        Ok(rules)
    }
}

fn chain(tenant: &str, suffix: &str) -> Chain {
    Chain {
        id: Uuid::new_v4(),
        name: format!("{} {}", tenant, suffix),
        tenant_id: tenant.to_string(),
    }
}

fn advance(stage: &mut Stage, next: Stage, tenant: &str) {
    debug!("Tenant {}: {:?} -> {:?}", tenant, stage, next);
    *stage = next;
}
