#[cfg(test)]
mod tests {
    use super::super::*;
    use etcd_store::MemoryStore;

    const TENANT: &str = "ns1";

    fn pool(memory: &MemoryStore) -> IpPool {
        IpPool::new(Arc::new(memory.clone()), Keys::default(), "172.16.0.0/29")
    }

    fn tenant() -> PoolScope {
        PoolScope::Tenant(TENANT.to_string())
    }

    fn entry_key(addr: &str) -> String {
        format!("/midonet-cni/ip/pod/ns1/available/{}", addr)
    }

    #[tokio::test]
    async fn test_seed_skips_reserved_addresses() {
        let memory = MemoryStore::new();
        let seeded = pool(&memory).seed(&tenant(), "192.168.0.0/24").await.unwrap();

        assert_eq!(seeded.entries.len(), 252);
        assert!(seeded.held.is_empty());
        assert_eq!(seeded.previous, None);
        assert_eq!(
            memory.value("/midonet-cni/ip/pod/ns1/available/iprange").as_deref(),
            Some("192.168.0.0/24")
        );
        for skipped in ["192.168.0.0", "192.168.0.1", "192.168.0.254", "192.168.0.255"] {
            assert!(memory.value(&entry_key(skipped)).is_none(), "{} was seeded", skipped);
        }
        assert_eq!(memory.value(&entry_key("192.168.0.2")).as_deref(), Some("192.168.0.2/24"));
    }

    #[tokio::test]
    async fn test_seed_small_block() {
        let memory = MemoryStore::new();
        let seeded = pool(&memory).seed(&tenant(), "192.168.0.0/30").await.unwrap();
        assert_eq!(
            seeded.entries,
            vec![Ipv4Addr::new(192, 168, 0, 2), Ipv4Addr::new(192, 168, 0, 3)]
        );

        let err = pool(&memory).seed(&tenant(), "192.168.0.0/31").await.unwrap_err();
        assert!(matches!(err, PluginError::Cidr(CidrError::TooSmall { len: 2, .. })));
    }

    #[tokio::test]
    async fn test_lease_is_idempotent_per_container() {
        let memory = MemoryStore::new();
        let pool = pool(&memory);
        pool.seed(&tenant(), "192.168.0.0/24").await.unwrap();

        let first = pool.lease(TENANT, "abc").await.unwrap();
        let second = pool.lease(TENANT, "abc").await.unwrap();
        assert_eq!(first, second);

        let Lease::Leased(record) = first else {
            panic!("expected a lease");
        };
        assert_eq!(record.address.to_string(), "192.168.0.2/24");
        assert_eq!(record.gateway, Ipv4Addr::new(192, 168, 0, 254));
        assert_eq!(
            memory.value("/midonet-cni/ip/pod/ns1/abc").as_deref(),
            Some("192.168.0.2/24")
        );
        assert_eq!(pool.available(&tenant()).await.unwrap(), 251);
    }

    #[tokio::test]
    async fn test_concurrent_leases_get_distinct_addresses() {
        let memory = MemoryStore::new();
        let pool = pool(&memory);
        pool.seed(&tenant(), "192.168.0.0/24").await.unwrap();

        let (a, b) = tokio::join!(pool.lease(TENANT, "a"), pool.lease(TENANT, "b"));
        let (Lease::Leased(a), Lease::Leased(b)) = (a.unwrap(), b.unwrap()) else {
            panic!("expected two leases");
        };
        assert_ne!(a.address, b.address);
    }

    #[tokio::test]
    async fn test_lease_reports_exhaustion() {
        let memory = MemoryStore::new();
        let pool = pool(&memory);
        pool.seed(&tenant(), "192.168.0.0/30").await.unwrap();

        assert!(matches!(pool.lease(TENANT, "a").await.unwrap(), Lease::Leased(_)));
        assert_eq!(pool.lease(TENANT, "b").await.unwrap(), Lease::Exhausted);
        // the last entry stays for the next block
        assert_eq!(memory.value(&entry_key("192.168.0.3")).as_deref(), Some("192.168.0.3/30"));
    }

    #[tokio::test]
    async fn test_lease_ignores_entries_of_old_blocks() {
        let memory = MemoryStore::new();
        let pool = pool(&memory);
        pool.seed(&tenant(), "192.168.0.0/30").await.unwrap();
        pool.seed(&tenant(), "192.168.0.4/30").await.unwrap();

        let Lease::Leased(record) = pool.lease(TENANT, "a").await.unwrap() else {
            panic!("expected a lease");
        };
        assert_eq!(record.address.to_string(), "192.168.0.6/30");
        assert_eq!(pool.current_range(&tenant()).await.unwrap(), Some("192.168.0.4/30".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_lease_without_pool() {
        let memory = MemoryStore::new();
        let err = pool(&memory).lease(TENANT, "abc").await.unwrap_err();
        assert!(matches!(err, PluginError::PoolUninitialized(_)));
    }

    #[tokio::test]
    async fn test_failed_lease_write_returns_address() {
        let memory = MemoryStore::new();
        let pool = pool(&memory);
        pool.seed(&tenant(), "192.168.0.0/24").await.unwrap();

        memory.fail_next("set", 1);
        assert!(pool.lease(TENANT, "abc").await.is_err());
        assert_eq!(memory.value(&entry_key("192.168.0.2")).as_deref(), Some("192.168.0.2/24"));
        assert!(memory.value("/midonet-cni/ip/pod/ns1/abc").is_none());
    }

    #[tokio::test]
    async fn test_release() {
        let memory = MemoryStore::new();
        let pool = pool(&memory);
        pool.seed(&tenant(), "192.168.0.0/30").await.unwrap();
        let Lease::Leased(record) = pool.lease(TENANT, "abc").await.unwrap() else {
            panic!("expected a lease");
        };

        assert!(pool.release(&tenant(), record.address).await.unwrap());
        assert_eq!(pool.available(&tenant()).await.unwrap(), 2);
        // the lock is gone again
        assert!(memory.value("/midonet-cni/tenant/ns1/bridge/create").is_none());
    }

    #[tokio::test]
    async fn test_release_outside_current_range_is_dropped() {
        let memory = MemoryStore::new();
        let pool = pool(&memory);
        pool.seed(&tenant(), "192.168.0.0/30").await.unwrap();
        let before = memory.dump("/midonet-cni/ip");

        let released = pool.release(&tenant(), "10.0.0.5/24".parse().unwrap()).await.unwrap();
        assert!(!released);
        assert_eq!(memory.dump("/midonet-cni/ip"), before);
    }

    #[tokio::test]
    async fn test_release_without_marker_is_dropped() {
        let memory = MemoryStore::new();
        let released = pool(&memory)
            .release(&tenant(), "192.168.0.2/24".parse().unwrap())
            .await
            .unwrap();
        assert!(!released);
        assert!(memory.dump("/midonet-cni").is_empty());
    }

    #[tokio::test]
    async fn test_unseed_restores_previous_block() {
        let memory = MemoryStore::new();
        let pool = pool(&memory);
        pool.seed(&tenant(), "192.168.0.0/30").await.unwrap();
        let seeded = pool.seed(&tenant(), "192.168.0.4/30").await.unwrap();
        assert_eq!(seeded.previous.as_deref(), Some("192.168.0.0/30"));

        pool.unseed(&seeded).await.unwrap();
        assert_eq!(pool.current_range(&tenant()).await.unwrap(), Some("192.168.0.0/30".parse().unwrap()));
        assert!(memory.value(&entry_key("192.168.0.6")).is_none());
        assert_eq!(pool.available(&tenant()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_partial_seed_is_reverted() {
        let memory = MemoryStore::new();
        let pool = pool(&memory);
        pool.seed(&tenant(), "192.168.0.0/30").await.unwrap();
        // .6 is written, .7 fails
        memory.fail_nth("set", 2);

        let err = pool.seed(&tenant(), "192.168.0.4/30").await.unwrap_err();

        assert!(matches!(err, PluginError::Store(_)));
        assert_eq!(pool.current_range(&tenant()).await.unwrap(), Some("192.168.0.0/30".parse().unwrap()));
        assert!(memory.value(&entry_key("192.168.0.6")).is_none());
        assert!(memory.value(&entry_key("192.168.0.7")).is_none());
        assert_eq!(pool.available(&tenant()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_uplink_pairs_walk_blocks() {
        let memory = MemoryStore::new();
        let pool = pool(&memory);

        // 172.16.0.0/29: .2/.3 held, .4 .5 .6 seeded, .7 is broadcast
        let first = pool.lease_uplink_pair().await.unwrap();
        assert_eq!(first.remote.to_string(), "172.16.0.2/29");
        assert_eq!(first.local.to_string(), "172.16.0.3/29");
        assert_eq!(pool.available(&PoolScope::RouterUplink).await.unwrap(), 3);

        let second = pool.lease_uplink_pair().await.unwrap();
        assert_eq!(second.remote.to_string(), "172.16.0.4/29");
        assert_eq!(second.local.to_string(), "172.16.0.5/29");

        let third = pool.lease_uplink_pair().await.unwrap();
        assert_eq!(third.remote.to_string(), "172.16.0.10/29");
        assert_eq!(third.local.to_string(), "172.16.0.11/29");
        assert_eq!(
            memory.value("/midonet-cni/ip/router/available/iprange").as_deref(),
            Some("172.16.0.8/29")
        );
        assert!(memory.value("/midonet-cni/router_ip").is_none());
    }

    #[tokio::test]
    async fn test_release_uplink_pair() {
        let memory = MemoryStore::new();
        let pool = pool(&memory);
        let pair = pool.lease_uplink_pair().await.unwrap();

        assert_eq!(pool.release_uplink_pair(&pair).await.unwrap(), 2);
        assert_eq!(pool.available(&PoolScope::RouterUplink).await.unwrap(), 5);
        assert_eq!(
            memory.value("/midonet-cni/ip/router/available/172.16.0.3").as_deref(),
            Some("172.16.0.3/29")
        );
    }

    #[tokio::test]
    async fn test_failed_uplink_take_puts_entries_back() {
        let memory = MemoryStore::new();
        let pool = pool(&memory);
        pool.lease_uplink_pair().await.unwrap();

        // the lock release uses compare_and_delete, so this only hits the pool entries
        memory.fail_next("delete", 1);
        assert!(pool.lease_uplink_pair().await.is_err());
        assert_eq!(pool.available(&PoolScope::RouterUplink).await.unwrap(), 3);
    }
}
