#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::ipam::{Lease, PoolScope};
    use crate::records::UplinkPair;
    use crate::test_utils::Harness;
    use midonet_client::{HostInterfacePort, Router};
    use std::net::Ipv4Addr;

    const TENANT: &str = "ns1";

    fn tenant_scope() -> PoolScope {
        PoolScope::Tenant(TENANT.to_string())
    }

    #[tokio::test]
    async fn test_resolve_tenant_builds_topology() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");

        let info = provisioner.resolve_tenant(TENANT).await.unwrap();
        assert_eq!(info.id, TENANT);

        let midonet = &harness.midonet;
        assert_eq!(midonet.tenants().len(), 1);
        assert_eq!(midonet.chains().len(), 2);
        assert_eq!(midonet.rules().len(), 3);
        assert_eq!(midonet.bridges().len(), 1);
        assert_eq!(midonet.bridges()[0].name, "ns1 bridge0");
        assert_eq!(midonet.bridge_ports().len(), 1);

        let routers = harness.tenant_routers();
        assert_eq!(routers.len(), 1);
        let router = &routers[0];
        assert_eq!(router.name, "ns1 default router");
        assert!(router.inbound_filter_id.is_some());
        assert!(router.outbound_filter_id.is_some());

        // provider side, tenant side and the bridge gateway
        let mut addresses: Vec<Ipv4Addr> = midonet.router_ports().iter().map(|port| port.port_address).collect();
        addresses.sort();
        assert_eq!(
            addresses,
            vec![
                Ipv4Addr::new(172, 16, 0, 2),
                Ipv4Addr::new(172, 16, 0, 3),
                Ipv4Addr::new(192, 168, 0, 254)
            ]
        );
        assert!(midonet.router_ports().iter().all(|port| port.port.peer_id.is_some()));

        let routes = midonet.routes();
        assert_eq!(routes.len(), 3);
        let default_route = routes
            .iter()
            .find(|route| route.router_id == router.id && route.dst_network_length == 0)
            .unwrap();
        assert_eq!(default_route.next_hop_gateway, Some(Ipv4Addr::new(172, 16, 0, 2)));
        let return_route = routes.iter().find(|route| route.router_id == harness.provider).unwrap();
        assert_eq!(return_route.dst_network_addr, Ipv4Addr::new(172, 16, 0, 3));
        assert_eq!(return_route.dst_network_length, 32);

        let keys = harness.keys();
        let store = harness.store();
        let recorded: Router = store::read_required(store.as_ref(), &keys.tenant_router(TENANT)).await.unwrap();
        assert_eq!(recorded.id, router.id);
        let pair: UplinkPair = store::read_required(store.as_ref(), &keys.uplink(&router.id)).await.unwrap();
        assert_eq!(pair.local.to_string(), "172.16.0.3/24");
        assert_eq!(pair.remote.to_string(), "172.16.0.2/24");
        let active: Uuid = store::read_required(store.as_ref(), &keys.active_bridge(TENANT)).await.unwrap();
        assert_eq!(active, midonet.bridges()[0].id);
        assert!(harness.memory.value(&keys.tenant_info(TENANT)).is_some());
        assert!(harness.memory.value(&keys.tenant_create_lock(TENANT)).is_none());

        assert_eq!(provisioner.pool().available(&tenant_scope()).await.unwrap(), 252);
    }

    #[tokio::test]
    async fn test_resolve_tenant_is_idempotent() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");

        let first = provisioner.resolve_tenant(TENANT).await.unwrap();
        let second = provisioner.resolve_tenant(TENANT).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(harness.midonet.call_count("create_router"), 1);
        assert_eq!(harness.tenant_routers().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolve_provisions_once() {
        let harness = Harness::new();
        let a = harness.provisioner("192.168.0.0/24");
        let b = harness.provisioner("192.168.0.0/24");

        let (first, second) = tokio::join!(a.resolve_tenant(TENANT), b.resolve_tenant(TENANT));

        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(harness.tenant_routers().len(), 1);
        assert_eq!(harness.midonet.bridges().len(), 1);
    }

    #[tokio::test]
    async fn test_route_failure_rolls_back_everything() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");
        harness.midonet.fail_nth_call("create_route", 2);

        let err = provisioner.resolve_tenant(TENANT).await.unwrap_err();
        assert!(matches!(err, PluginError::Midonet(_)));

        let midonet = &harness.midonet;
        assert!(midonet.tenants().is_empty());
        assert!(midonet.chains().is_empty());
        assert!(midonet.rules().is_empty());
        assert!(harness.tenant_routers().is_empty());
        assert!(midonet.router_ports().is_empty());
        assert!(midonet.routes().is_empty());
        assert!(midonet.bridges().is_empty());
        assert!(harness.memory.dump("/midonet-cni/tenant/ns1").is_empty());

        // uplink pair went back: 251 left after the first seed, plus the two held ones
        let uplinks = provisioner.pool().available(&PoolScope::RouterUplink).await.unwrap();
        assert_eq!(uplinks, 253);
    }

    #[tokio::test]
    async fn test_rule_failure_rolls_back_rules_first() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");
        harness.midonet.fail_nth_call("create_rule", 3);

        assert!(provisioner.resolve_tenant(TENANT).await.is_err());

        let midonet = &harness.midonet;
        assert_eq!(midonet.call_count("delete_rule"), 2);
        assert!(midonet.rules().is_empty());
        assert!(midonet.chains().is_empty());
        assert!(harness.tenant_routers().is_empty());
        assert!(midonet.bridges().is_empty());
        assert!(harness.memory.value(&harness.keys().tenant_info(TENANT)).is_none());
    }

    #[tokio::test]
    async fn test_failed_bridge_attach_restores_tenant_pool() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");
        // third route is the bridge route
        harness.midonet.fail_nth_call("create_route", 3);

        assert!(provisioner.resolve_tenant(TENANT).await.is_err());

        assert!(harness.memory.dump("/midonet-cni/ip/pod/ns1").is_empty());
        assert!(harness.midonet.bridges().is_empty());
        assert!(harness.midonet.bridge_ports().is_empty());
    }

    #[tokio::test]
    async fn test_existing_keystone_tenant_is_kept_on_rollback() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");
        harness
            .midonet
            .create_tenant(&midonet_client::Tenant::for_namespace(TENANT))
            .await
            .unwrap();
        harness.midonet.fail_nth_call("create_router", 1);

        assert!(provisioner.resolve_tenant(TENANT).await.is_err());

        assert_eq!(harness.midonet.tenants().len(), 1);
        assert!(harness.midonet.chains().is_empty());
    }

    #[tokio::test]
    async fn test_create_new_bridge_moves_to_next_block() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/30");
        provisioner.resolve_tenant(TENANT).await.unwrap();
        let pool = provisioner.pool();
        let first_bridge = harness.midonet.bridges()[0].id;

        let Lease::Leased(first) = pool.lease(TENANT, "c1").await.unwrap() else {
            panic!("first lease failed");
        };
        assert_eq!(first.address.to_string(), "192.168.0.2/30");
        assert_eq!(pool.lease(TENANT, "c2").await.unwrap(), Lease::Exhausted);

        let bridge = provisioner.create_new_bridge(TENANT).await.unwrap();
        assert_ne!(bridge, first_bridge);
        assert_eq!(
            pool.current_range(&tenant_scope()).await.unwrap().map(|net| net.to_string()),
            Some("192.168.0.4/30".to_string())
        );
        let created = harness.midonet.bridges().into_iter().find(|b| b.id == bridge).unwrap();
        assert_eq!(created.name, format!("ns1 bridge-{}", bridge));

        let store = harness.store();
        let active: Uuid = store::read_required(store.as_ref(), &harness.keys().active_bridge(TENANT))
            .await
            .unwrap();
        assert_eq!(active, bridge);

        // the leftover of the old block stays where it is
        assert!(
            harness
                .memory
                .value("/midonet-cni/ip/pod/ns1/available/192.168.0.3")
                .is_some()
        );

        let Lease::Leased(second) = pool.lease(TENANT, "c2").await.unwrap() else {
            panic!("lease after new bridge failed");
        };
        assert_eq!(second.address.to_string(), "192.168.0.6/30");
    }

    #[tokio::test]
    async fn test_failed_bridge_route_restores_previous_block() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/30");
        provisioner.resolve_tenant(TENANT).await.unwrap();
        let pool = provisioner.pool();
        let first_bridge = harness.midonet.bridges()[0].id;
        pool.lease(TENANT, "c1").await.unwrap();
        assert_eq!(pool.lease(TENANT, "c2").await.unwrap(), Lease::Exhausted);
        let tenant_state = harness.memory.dump("/midonet-cni/tenant/ns1");
        let pool_state = harness.memory.dump("/midonet-cni/ip/pod/ns1");
        harness.midonet.fail_nth_call("create_route", 1);

        let err = provisioner.create_new_bridge(TENANT).await.unwrap_err();
        assert!(matches!(err, PluginError::Midonet(_)));

        let midonet = &harness.midonet;
        assert_eq!(midonet.bridges().len(), 1);
        assert_eq!(midonet.bridges()[0].id, first_bridge);
        assert_eq!(midonet.bridge_ports().len(), 1);
        assert_eq!(midonet.router_ports().len(), 3);
        assert!(midonet.router_ports().iter().all(|port| port.port.peer_id.is_some()));
        assert_eq!(midonet.routes().len(), 3);
        assert_eq!(harness.memory.dump("/midonet-cni/tenant/ns1"), tenant_state);
        assert_eq!(harness.memory.dump("/midonet-cni/ip/pod/ns1"), pool_state);

        // the next attempt takes the same block instead of skipping one
        provisioner.create_new_bridge(TENANT).await.unwrap();
        let Lease::Leased(lease) = pool.lease(TENANT, "c2").await.unwrap() else {
            panic!("lease after new bridge failed");
        };
        assert_eq!(lease.address.to_string(), "192.168.0.6/30");
    }

    #[tokio::test]
    async fn test_failed_active_bridge_write_rolls_back() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/30");
        provisioner.resolve_tenant(TENANT).await.unwrap();
        let pool = provisioner.pool();
        let first_bridge = harness.midonet.bridges()[0].id;
        pool.lease(TENANT, "c1").await.unwrap();
        let tenant_state = harness.memory.dump("/midonet-cni/tenant/ns1");
        let pool_state = harness.memory.dump("/midonet-cni/ip/pod/ns1");
        // two pool entries and the bridge record go first
        harness.memory.fail_nth("set", 4);

        let err = provisioner.create_new_bridge(TENANT).await.unwrap_err();
        assert!(matches!(err, PluginError::Store(_)));

        let midonet = &harness.midonet;
        assert_eq!(midonet.bridges().len(), 1);
        assert_eq!(midonet.bridge_ports().len(), 1);
        assert_eq!(midonet.router_ports().len(), 3);
        assert_eq!(midonet.routes().len(), 3);
        assert_eq!(harness.memory.dump("/midonet-cni/tenant/ns1"), tenant_state);
        assert_eq!(harness.memory.dump("/midonet-cni/ip/pod/ns1"), pool_state);
        let store = harness.store();
        let active: Uuid = store::read_required(store.as_ref(), &harness.keys().active_bridge(TENANT))
            .await
            .unwrap();
        assert_eq!(active, first_bridge);
        assert_eq!(
            pool.current_range(&tenant_scope()).await.unwrap().map(|net| net.to_string()),
            Some("192.168.0.0/30".to_string())
        );
    }

    #[tokio::test]
    async fn test_create_new_bridge_skips_refilled_pool() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/30");
        provisioner.resolve_tenant(TENANT).await.unwrap();
        let active = harness.midonet.bridges()[0].id;

        // two entries left: nothing to do
        let bridge = provisioner.create_new_bridge(TENANT).await.unwrap();

        assert_eq!(bridge, active);
        assert_eq!(harness.midonet.bridges().len(), 1);
    }

    #[tokio::test]
    async fn test_bind_and_unbind() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");
        provisioner.resolve_tenant(TENANT).await.unwrap();

        let binding = provisioner.bind(TENANT, "c1", "vif0123456789ab").await.unwrap();
        assert_eq!(binding.host_id, harness.host);
        assert_eq!(binding.interface_name, "vif0123456789ab");
        assert_eq!(harness.midonet.bindings(), vec![binding.clone()]);
        assert_eq!(harness.midonet.bridge_ports().len(), 2);

        let store = harness.store();
        let key = harness.keys().binding(TENANT, "c1");
        let recorded: HostInterfacePort = store::read_required(store.as_ref(), &key).await.unwrap();
        assert_eq!(recorded, binding);

        let again = provisioner.bind(TENANT, "c1", "vif0123456789ab").await.unwrap();
        assert_eq!(again, binding);
        assert_eq!(harness.midonet.call_count("bind_interface"), 1);

        assert!(provisioner.unbind(TENANT, "c1").await.unwrap());
        assert!(harness.midonet.bindings().is_empty());
        assert_eq!(harness.midonet.bridge_ports().len(), 1);
        assert!(harness.memory.value(&key).is_none());

        assert!(!provisioner.unbind(TENANT, "c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_bind_store_failure_cleans_up() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");
        provisioner.resolve_tenant(TENANT).await.unwrap();
        harness.memory.fail_next("set", 1);

        let err = provisioner.bind(TENANT, "c1", "vif0123456789ab").await.unwrap_err();
        assert!(matches!(err, PluginError::Store(_)));

        assert!(harness.midonet.bindings().is_empty());
        assert_eq!(harness.midonet.bridge_ports().len(), 1);
    }

    #[tokio::test]
    async fn test_bind_after_teardown_fails() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");
        provisioner.resolve_tenant(TENANT).await.unwrap();
        assert!(provisioner.deprovision_if_idle(TENANT).await.unwrap());

        let err = provisioner.bind(TENANT, "c1", "vif0123456789ab").await.unwrap_err();

        assert!(matches!(err, PluginError::TenantRemoved(_)));
        assert!(harness.midonet.bridge_ports().is_empty());
        assert!(harness.midonet.bindings().is_empty());
        assert!(harness.memory.value(&harness.keys().binding(TENANT, "c1")).is_none());
    }

    #[tokio::test]
    async fn test_unbind_retries_binding_removal() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");
        provisioner.resolve_tenant(TENANT).await.unwrap();
        provisioner.bind(TENANT, "c1", "vif0123456789ab").await.unwrap();
        harness.midonet.fail_nth_call("delete_binding", 1);

        assert!(provisioner.unbind(TENANT, "c1").await.unwrap());

        assert_eq!(harness.midonet.call_count("delete_binding"), 2);
        assert!(harness.midonet.bindings().is_empty());
        assert_eq!(harness.midonet.bridge_ports().len(), 1);
        assert!(harness.memory.value(&harness.keys().binding(TENANT, "c1")).is_none());
    }

    #[tokio::test]
    async fn test_unbind_continues_after_second_binding_failure() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");
        provisioner.resolve_tenant(TENANT).await.unwrap();
        provisioner.bind(TENANT, "c1", "vif0123456789ab").await.unwrap();
        harness.midonet.fail_calls("delete_binding", 2);

        assert!(provisioner.unbind(TENANT, "c1").await.unwrap());

        // no third attempt; deleting the port drops the binding with it
        assert_eq!(harness.midonet.call_count("delete_binding"), 2);
        assert!(harness.midonet.bindings().is_empty());
        assert_eq!(harness.midonet.bridge_ports().len(), 1);
        assert!(harness.memory.value(&harness.keys().binding(TENANT, "c1")).is_none());
    }

    #[tokio::test]
    async fn test_unbind_tolerates_vanished_port() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");
        provisioner.resolve_tenant(TENANT).await.unwrap();
        let binding = provisioner.bind(TENANT, "c1", "vif0123456789ab").await.unwrap();
        harness.midonet.delete_port(binding.port_id).await.unwrap();

        assert!(provisioner.unbind(TENANT, "c1").await.unwrap());
        assert!(harness.memory.value(&harness.keys().binding(TENANT, "c1")).is_none());
    }

    #[tokio::test]
    async fn test_deprovision_if_idle() {
        let harness = Harness::new();
        let provisioner = harness.provisioner("192.168.0.0/24");
        assert!(!provisioner.deprovision_if_idle(TENANT).await.unwrap());

        provisioner.resolve_tenant(TENANT).await.unwrap();
        let router = harness.tenant_routers()[0].id;
        provisioner.bind(TENANT, "c1", "vif0123456789ab").await.unwrap();

        assert!(!provisioner.deprovision_if_idle(TENANT).await.unwrap());
        assert_eq!(harness.tenant_routers().len(), 1);

        // a leased but not yet bound container also keeps the network
        provisioner.unbind(TENANT, "c1").await.unwrap();
        let Lease::Leased(lease) = provisioner.pool().lease(TENANT, "c2").await.unwrap() else {
            panic!("lease failed");
        };
        assert!(!provisioner.deprovision_if_idle(TENANT).await.unwrap());
        assert_eq!(harness.tenant_routers().len(), 1);

        provisioner.pool().release(&tenant_scope(), lease.address).await.unwrap();
        store::remove(harness.store().as_ref(), &harness.keys().lease(TENANT, "c2"))
            .await
            .unwrap();
        assert!(provisioner.deprovision_if_idle(TENANT).await.unwrap());

        let midonet = &harness.midonet;
        assert!(midonet.tenants().is_empty());
        assert!(midonet.chains().is_empty());
        assert!(midonet.rules().is_empty());
        assert!(harness.tenant_routers().is_empty());
        assert!(midonet.router_ports().is_empty());
        assert!(midonet.routes().is_empty());
        assert!(midonet.bridges().is_empty());
        assert!(midonet.bridge_ports().is_empty());

        assert!(harness.memory.dump("/midonet-cni/tenant/ns1").is_empty());
        assert!(harness.memory.dump("/midonet-cni/ip/pod/ns1").is_empty());
        assert!(harness.memory.value(&harness.keys().uplink(&router)).is_none());
        let uplinks = provisioner.pool().available(&PoolScope::RouterUplink).await.unwrap();
        assert_eq!(uplinks, 253);

        // a fresh ADD provisions from scratch again
        provisioner.resolve_tenant(TENANT).await.unwrap();
        assert_eq!(harness.tenant_routers().len(), 1);
    }
}
