//! Mock MidonetClient for unit testing
//!
//! This module provides a mock implementation of MidonetClientTrait that can be used
//! in unit tests without a running MidoNet API.
//!
//! The mock keeps a consistent in-memory topology: ports need an existing device, links
//! set `peerId` on both ends, and deleting a device removes its ports and routes the way
//! the real API does. Every call is recorded, and failures can be injected per call.
//!
//! - `topology.rs` - object operations

mod topology;

use crate::error::MidonetError;
use crate::midonet_trait::MidonetClientTrait;
use crate::models::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub(crate) fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Mock MidonetClient for testing
#[derive(Debug, Clone)]
pub struct MockMidonetClient {
    pub(crate) base_url: String,
    // In-memory storage for objects
    pub(crate) tenants: Arc<Mutex<HashMap<String, Tenant>>>,
    pub(crate) chains: Arc<Mutex<HashMap<Uuid, Chain>>>,
    pub(crate) rules: Arc<Mutex<HashMap<Uuid, Rule>>>,
    pub(crate) routers: Arc<Mutex<HashMap<Uuid, Router>>>,
    pub(crate) router_ports: Arc<Mutex<HashMap<Uuid, RouterPort>>>,
    pub(crate) bridges: Arc<Mutex<HashMap<Uuid, Bridge>>>,
    pub(crate) bridge_ports: Arc<Mutex<HashMap<Uuid, BridgePort>>>,
    pub(crate) routes: Arc<Mutex<HashMap<Uuid, Route>>>,
    pub(crate) bindings: Arc<Mutex<HashMap<Uuid, HostInterfacePort>>>,
    // Call log and injected failures
    pub(crate) calls: Arc<Mutex<Vec<String>>>,
    pub(crate) failures: Arc<Mutex<HashMap<String, Failure>>>,
}

/// Injected failure: `skip` calls pass, then `times` calls fail.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Failure {
    skip: usize,
    times: usize,
}

impl Default for MockMidonetClient {
    fn default() -> Self {
        Self::new("http://midonet-api:8080/midonet-api")
    }
}

impl MockMidonetClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            tenants: Arc::new(Mutex::new(HashMap::new())),
            chains: Arc::new(Mutex::new(HashMap::new())),
            rules: Arc::new(Mutex::new(HashMap::new())),
            routers: Arc::new(Mutex::new(HashMap::new())),
            router_ports: Arc::new(Mutex::new(HashMap::new())),
            bridges: Arc::new(Mutex::new(HashMap::new())),
            bridge_ports: Arc::new(Mutex::new(HashMap::new())),
            routes: Arc::new(Mutex::new(HashMap::new())),
            bindings: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Add a router to the mock store (for test setup, e.g. the provider router)
    pub fn add_router(&self, router: Router) {
        guard(&self.routers).insert(router.id, router);
    }

    /// Make the `nth` next call of `operation` fail (1 = the very next call).
    ///
    /// Operation names match the trait methods, e.g. `create_route`.
    pub fn fail_nth_call(&self, operation: &str, nth: usize) {
        let failure = Failure {
            skip: nth.max(1) - 1,
            times: 1,
        };
        guard(&self.failures).insert(operation.to_string(), failure);
    }

    /// Make the next `times` calls of `operation` fail in a row.
    pub fn fail_calls(&self, operation: &str, times: usize) {
        let failure = Failure {
            skip: 0,
            times: times.max(1),
        };
        guard(&self.failures).insert(operation.to_string(), failure);
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<String> {
        guard(&self.calls).clone()
    }

    /// Number of calls made to `operation`
    pub fn call_count(&self, operation: &str) -> usize {
        guard(&self.calls).iter().filter(|call| call.as_str() == operation).count()
    }

    pub fn tenants(&self) -> Vec<Tenant> {
        guard(&self.tenants).values().cloned().collect()
    }

    pub fn chains(&self) -> Vec<Chain> {
        guard(&self.chains).values().cloned().collect()
    }

    pub fn rules(&self) -> Vec<Rule> {
        guard(&self.rules).values().cloned().collect()
    }

    pub fn routers(&self) -> Vec<Router> {
        guard(&self.routers).values().cloned().collect()
    }

    pub fn router_ports(&self) -> Vec<RouterPort> {
        guard(&self.router_ports).values().cloned().collect()
    }

    pub fn bridges(&self) -> Vec<Bridge> {
        guard(&self.bridges).values().cloned().collect()
    }

    pub fn bridge_ports(&self) -> Vec<BridgePort> {
        guard(&self.bridge_ports).values().cloned().collect()
    }

    pub fn routes(&self) -> Vec<Route> {
        guard(&self.routes).values().cloned().collect()
    }

    pub fn bindings(&self) -> Vec<HostInterfacePort> {
        guard(&self.bindings).values().cloned().collect()
    }

    /// Record a call and fail it if a failure was injected for this position
    pub(crate) fn enter(&self, operation: &str) -> Result<(), MidonetError> {
        guard(&self.calls).push(operation.to_string());

        let mut failures = guard(&self.failures);
        let Some(failure) = failures.get_mut(operation) else {
            return Ok(());
        };
        if failure.skip > 0 {
            failure.skip -= 1;
            return Ok(());
        }
        failure.times -= 1;
        if failure.times == 0 {
            failures.remove(operation);
        }
        Err(MidonetError::Api(format!("injected {} failure: 500", operation)))
    }
}

#[async_trait::async_trait]
impl MidonetClientTrait for MockMidonetClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), MidonetError> {
        self.enter("create_tenant")?;
        topology::create_tenant(self, tenant)
    }

    async fn delete_tenant(&self, tenant_id: &str) -> Result<(), MidonetError> {
        self.enter("delete_tenant")?;
        guard(&self.tenants)
            .remove(tenant_id)
            .map(|_| ())
            .ok_or_else(|| MidonetError::NotFound(format!("Tenant {} not found", tenant_id)))
    }

    async fn create_chain(&self, chain: &Chain) -> Result<(), MidonetError> {
        self.enter("create_chain")?;
        topology::insert_new(&self.chains, chain.id, chain.clone(), "Chain")
    }

    async fn delete_chain(&self, chain_id: Uuid) -> Result<(), MidonetError> {
        self.enter("delete_chain")?;
        topology::delete_chain(self, chain_id)
    }

    async fn list_chains(&self, tenant_id: &str) -> Result<Vec<Chain>, MidonetError> {
        self.enter("list_chains")?;
        Ok(guard(&self.chains)
            .values()
            .filter(|chain| chain.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn create_rule(&self, rule: &Rule) -> Result<(), MidonetError> {
        self.enter("create_rule")?;
        topology::require(&self.chains, rule.chain_id, "Chain")?;
        topology::insert_new(&self.rules, rule.id, rule.clone(), "Rule")
    }

    async fn delete_rule(&self, rule_id: Uuid) -> Result<(), MidonetError> {
        self.enter("delete_rule")?;
        topology::remove(&self.rules, rule_id, "Rule").map(|_| ())
    }

    async fn list_rules(&self, chain_id: Uuid) -> Result<Vec<Rule>, MidonetError> {
        self.enter("list_rules")?;
        topology::require(&self.chains, chain_id, "Chain")?;
        let mut rules: Vec<Rule> = guard(&self.rules)
            .values()
            .filter(|rule| rule.chain_id == chain_id)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.position);
        Ok(rules)
    }

    async fn create_router(&self, router: &Router) -> Result<(), MidonetError> {
        self.enter("create_router")?;
        topology::insert_new(&self.routers, router.id, router.clone(), "Router")
    }

    async fn delete_router(&self, router_id: Uuid) -> Result<(), MidonetError> {
        self.enter("delete_router")?;
        topology::delete_router(self, router_id)
    }

    async fn list_routers(&self, tenant_id: &str) -> Result<Vec<Router>, MidonetError> {
        self.enter("list_routers")?;
        Ok(guard(&self.routers)
            .values()
            .filter(|router| router.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn create_router_port(&self, port: &RouterPort) -> Result<(), MidonetError> {
        self.enter("create_router_port")?;
        topology::require(&self.routers, port.port.device_id, "Router")?;
        topology::insert_new(&self.router_ports, port.id(), port.clone(), "Port")
    }

    async fn list_router_ports(&self, router_id: Uuid) -> Result<Vec<RouterPort>, MidonetError> {
        self.enter("list_router_ports")?;
        topology::require(&self.routers, router_id, "Router")?;
        Ok(guard(&self.router_ports)
            .values()
            .filter(|port| port.port.device_id == router_id)
            .cloned()
            .collect())
    }

    async fn list_router_peer_ports(&self, router_id: Uuid) -> Result<Vec<RouterPort>, MidonetError> {
        self.enter("list_router_peer_ports")?;
        topology::require(&self.routers, router_id, "Router")?;
        Ok(topology::router_peer_ports(self, router_id))
    }

    async fn create_bridge(&self, bridge: &Bridge) -> Result<(), MidonetError> {
        self.enter("create_bridge")?;
        topology::insert_new(&self.bridges, bridge.id, bridge.clone(), "Bridge")
    }

    async fn delete_bridge(&self, bridge_id: Uuid) -> Result<(), MidonetError> {
        self.enter("delete_bridge")?;
        topology::delete_bridge(self, bridge_id)
    }

    async fn list_bridges(&self, tenant_id: &str) -> Result<Vec<Bridge>, MidonetError> {
        self.enter("list_bridges")?;
        Ok(guard(&self.bridges)
            .values()
            .filter(|bridge| bridge.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn create_bridge_port(&self, port: &BridgePort) -> Result<(), MidonetError> {
        self.enter("create_bridge_port")?;
        topology::require(&self.bridges, port.port.device_id, "Bridge")?;
        topology::insert_new(&self.bridge_ports, port.id(), port.clone(), "Port")
    }

    async fn list_bridge_ports(&self, bridge_id: Uuid) -> Result<Vec<BridgePort>, MidonetError> {
        self.enter("list_bridge_ports")?;
        topology::require(&self.bridges, bridge_id, "Bridge")?;
        Ok(guard(&self.bridge_ports)
            .values()
            .filter(|port| port.port.device_id == bridge_id)
            .cloned()
            .collect())
    }

    async fn delete_port(&self, port_id: Uuid) -> Result<(), MidonetError> {
        self.enter("delete_port")?;
        topology::delete_port(self, port_id)
    }

    async fn create_port_link(&self, link: &PortLink) -> Result<(), MidonetError> {
        self.enter("create_port_link")?;
        topology::link(self, link)
    }

    async fn delete_port_link(&self, port_id: Uuid) -> Result<(), MidonetError> {
        self.enter("delete_port_link")?;
        topology::unlink(self, port_id)
    }

    async fn create_route(&self, route: &Route) -> Result<(), MidonetError> {
        self.enter("create_route")?;
        topology::require(&self.routers, route.router_id, "Router")?;
        topology::require(&self.router_ports, route.next_hop_port, "Port")?;
        topology::insert_new(&self.routes, route.id, route.clone(), "Route")
    }

    async fn delete_route(&self, _router_id: Uuid, route_id: Uuid) -> Result<(), MidonetError> {
        self.enter("delete_route")?;
        topology::remove(&self.routes, route_id, "Route").map(|_| ())
    }

    async fn list_routes(&self, router_id: Uuid) -> Result<Vec<Route>, MidonetError> {
        self.enter("list_routes")?;
        topology::require(&self.routers, router_id, "Router")?;
        Ok(guard(&self.routes)
            .values()
            .filter(|route| route.router_id == router_id)
            .cloned()
            .collect())
    }

    async fn bind_interface(&self, binding: &HostInterfacePort) -> Result<(), MidonetError> {
        self.enter("bind_interface")?;
        topology::bind(self, binding)
    }

    async fn delete_binding(&self, binding: &HostInterfacePort) -> Result<(), MidonetError> {
        self.enter("delete_binding")?;
        let mut bindings = guard(&self.bindings);
        let bound_here = bindings
            .get(&binding.port_id)
            .is_some_and(|existing| existing.host_id == binding.host_id);
        if !bound_here {
            return Err(MidonetError::NotFound(format!(
                "Binding of port {} on host {} not found",
                binding.port_id, binding.host_id
            )));
        }
        bindings.remove(&binding.port_id);
        Ok(())
    }
}
