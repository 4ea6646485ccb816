//! Test utilities for unit testing provisioning and the ADD/DEL flow
//!
//! This module provides an in-memory store and MidoNet topology wired together the way
//! the plugin wires the real clients, plus fake veth and IP-service implementations.

#[cfg(test)]
use crate::config::NetConf;
#[cfg(test)]
use crate::error::PluginError;
#[cfg(test)]
use crate::ipam::IpPool;
#[cfg(test)]
use crate::ipam::region::{IpService, RegionLease, RegionRequest};
#[cfg(test)]
use crate::provisioner::Provisioner;
#[cfg(test)]
use crate::store::Keys;
#[cfg(test)]
use crate::veth::VethController;
#[cfg(test)]
use etcd_store::{KeyValueStore, MemoryStore};
#[cfg(test)]
use ipnet::Ipv4Net;
#[cfg(test)]
use midonet_client::{MockMidonetClient, Router};
#[cfg(test)]
use std::net::Ipv4Addr;
#[cfg(test)]
use std::sync::{Arc, Mutex};
#[cfg(test)]
use uuid::Uuid;

#[cfg(test)]
pub const ROUTER_CIDR: &str = "172.16.0.0/24";

/// In-memory store plus a mock MidoNet with a provider router
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct Harness {
    pub memory: MemoryStore,
    pub midonet: MockMidonetClient,
    pub provider: Uuid,
    pub host: Uuid,
}

#[cfg(test)]
impl Harness {
    pub fn new() -> Self {
        let midonet = MockMidonetClient::default();
        let provider = Uuid::new_v4();
        midonet.add_router(Router {
            id: provider,
            name: "MidoNet Provider Router".to_string(),
            tenant_id: "admin".to_string(),
            inbound_filter_id: None,
            outbound_filter_id: None,
        });
        Self {
            memory: MemoryStore::new(),
            midonet,
            provider,
            host: Uuid::new_v4(),
        }
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::new(self.memory.clone())
    }

    pub fn keys(&self) -> Keys {
        Keys::default()
    }

    pub fn pool(&self) -> IpPool {
        IpPool::new(self.store(), self.keys(), ROUTER_CIDR)
    }

    pub fn provisioner(&self, bridge_cidr: &str) -> Provisioner {
        Provisioner::new(
            Arc::new(self.midonet.clone()),
            self.pool(),
            self.provider,
            self.host,
            bridge_cidr,
        )
    }

    /// Tenant routers only; the provider router is left out
    pub fn tenant_routers(&self) -> Vec<Router> {
        self.midonet
            .routers()
            .into_iter()
            .filter(|router| router.id != self.provider)
            .collect()
    }
}

/// Network configuration with defaults applied, without host UUID file lookup
#[cfg(test)]
pub fn test_conf(extra: serde_json::Value) -> NetConf {
    let mut doc = serde_json::json!({
        "cniVersion": "0.3.1",
        "name": "midonet",
        "type": "midonet-cni",
        "midonet_host_uuid": Uuid::nil().to_string(),
        "etcd_conf": {"urls": ["http://127.0.0.1:2379"]},
    });
    if let (Some(doc), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            doc.insert(key.clone(), value.clone());
        }
    }
    let mut conf: NetConf = serde_json::from_value(doc).unwrap();
    conf.apply_defaults::<&str>(&[]).unwrap();
    conf
}

/// Veth controller that records what it was asked to wire
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct RecordingVeth {
    pub wired: Arc<Mutex<Vec<(String, Ipv4Net, Ipv4Addr)>>>,
    pub fail: bool,
}

#[cfg(test)]
impl RecordingVeth {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn wired(&self) -> Vec<(String, Ipv4Net, Ipv4Addr)> {
        self.wired.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl VethController for RecordingVeth {
    async fn wire(&self, container_id: &str, address: Ipv4Net, gateway: Ipv4Addr) -> Result<(), PluginError> {
        if self.fail {
            return Err(PluginError::Veth("vethctl create exited with 1".to_string()));
        }
        self.wired
            .lock()
            .unwrap()
            .push((container_id.to_string(), address, gateway));
        Ok(())
    }
}

/// IP service that always hands out the same lease
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct StaticIpService {
    pub lease: RegionLease,
    pub requests: Arc<Mutex<Vec<(String, RegionRequest)>>>,
}

#[cfg(test)]
impl StaticIpService {
    pub fn new(lease: &str) -> Self {
        Self {
            lease: lease.parse().unwrap(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl IpService for StaticIpService {
    async fn request_ip(&self, namespace: &str, request: &RegionRequest) -> Result<RegionLease, PluginError> {
        self.requests
            .lock()
            .unwrap()
            .push((namespace.to_string(), request.clone()));
        Ok(self.lease)
    }
}
