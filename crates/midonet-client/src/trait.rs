//! MidonetClient trait for mocking
//!
//! This trait abstracts the MidonetClient to enable mocking in unit tests.
//! The concrete MidonetClient implements this trait, and tests use the mock behind
//! the `test-util` feature.

use crate::error::MidonetError;
use crate::models::*;
use uuid::Uuid;

/// Trait for MidoNet and Keystone API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Deleting an object that does not exist returns [`MidonetError::NotFound`].
#[async_trait::async_trait]
pub trait MidonetClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    // Keystone
    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), MidonetError>;
    async fn delete_tenant(&self, tenant_id: &str) -> Result<(), MidonetError>;

    // Chains and rules
    async fn create_chain(&self, chain: &Chain) -> Result<(), MidonetError>;
    async fn delete_chain(&self, chain_id: Uuid) -> Result<(), MidonetError>;
    async fn list_chains(&self, tenant_id: &str) -> Result<Vec<Chain>, MidonetError>;
    async fn create_rule(&self, rule: &Rule) -> Result<(), MidonetError>;
    async fn delete_rule(&self, rule_id: Uuid) -> Result<(), MidonetError>;
    async fn list_rules(&self, chain_id: Uuid) -> Result<Vec<Rule>, MidonetError>;

    // Routers
    async fn create_router(&self, router: &Router) -> Result<(), MidonetError>;
    async fn delete_router(&self, router_id: Uuid) -> Result<(), MidonetError>;
    async fn list_routers(&self, tenant_id: &str) -> Result<Vec<Router>, MidonetError>;
    async fn create_router_port(&self, port: &RouterPort) -> Result<(), MidonetError>;
    async fn list_router_ports(&self, router_id: Uuid) -> Result<Vec<RouterPort>, MidonetError>;
    /// Ports on other devices linked to this router's ports
    async fn list_router_peer_ports(&self, router_id: Uuid) -> Result<Vec<RouterPort>, MidonetError>;

    // Bridges
    async fn create_bridge(&self, bridge: &Bridge) -> Result<(), MidonetError>;
    async fn delete_bridge(&self, bridge_id: Uuid) -> Result<(), MidonetError>;
    async fn list_bridges(&self, tenant_id: &str) -> Result<Vec<Bridge>, MidonetError>;
    async fn create_bridge_port(&self, port: &BridgePort) -> Result<(), MidonetError>;
    async fn list_bridge_ports(&self, bridge_id: Uuid) -> Result<Vec<BridgePort>, MidonetError>;

    // Ports and links
    async fn delete_port(&self, port_id: Uuid) -> Result<(), MidonetError>;
    async fn create_port_link(&self, link: &PortLink) -> Result<(), MidonetError>;
    async fn delete_port_link(&self, port_id: Uuid) -> Result<(), MidonetError>;

    // Routes
    async fn create_route(&self, route: &Route) -> Result<(), MidonetError>;
    async fn delete_route(&self, router_id: Uuid, route_id: Uuid) -> Result<(), MidonetError>;
    async fn list_routes(&self, router_id: Uuid) -> Result<Vec<Route>, MidonetError>;

    // Host bindings
    async fn bind_interface(&self, binding: &HostInterfacePort) -> Result<(), MidonetError>;
    async fn delete_binding(&self, binding: &HostInterfacePort) -> Result<(), MidonetError>;
}
