//! MidoNet API client
//!
//! Implements the MidoNet REST API client for virtual topology management, plus the
//! two Keystone calls used to create and remove tenants.

use crate::common::{HttpClient, MediaKind};
use crate::config::MidonetApiConf;
use crate::error::MidonetError;
use crate::midonet_trait::MidonetClientTrait;
use crate::models::*;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Timeout for every MidoNet and Keystone request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// MidoNet API client
#[derive(Debug)]
pub struct MidonetClient {
    http: HttpClient,
    keystone_url: String,
    keystone_token: String,
}

impl MidonetClient {
    /// Create a new MidoNet client
    ///
    /// # Arguments
    /// * `conf` - API URL, login credentials and Keystone admin endpoint
    pub fn new(conf: &MidonetApiConf) -> Result<Self, MidonetError> {
        if conf.url.trim().is_empty() {
            return Err(MidonetError::InvalidRequest("midonet api url can not be empty".to_string()));
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        info!("MidoNet API version {}", conf.api_version());

        Ok(Self {
            http: HttpClient::new(client, conf),
            keystone_url: conf.keystone_conf.url.trim_end_matches('/').to_string(),
            keystone_token: conf.keystone_conf.token.clone(),
        })
    }

    /// Validate credentials by logging in.
    pub async fn validate_token(&self) -> Result<(), MidonetError> {
        self.http.login().await.map(|_| ())
    }

    async fn keystone_check(response: reqwest::Response, action: &str) -> Result<(), MidonetError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(MidonetError::NotFound(format!("{}: {}", action, body)));
        }
        if status == StatusCode::CONFLICT {
            return Err(MidonetError::Conflict(format!("{}: {}", action, body)));
        }
        Err(MidonetError::Api(format!("Failed to {}: {} - {}", action, status, body)))
    }
}

#[async_trait::async_trait]
impl MidonetClientTrait for MidonetClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), MidonetError> {
        if tenant.id.is_empty() {
            return Err(MidonetError::InvalidRequest("tenant id can not be empty".to_string()));
        }
        let url = format!("{}/tenants", self.keystone_url);
        debug!("POST {} for tenant {}", url, tenant.id);

        let response = self
            .http
            .client()
            .post(&url)
            .header("X-Auth-Token", &self.keystone_token)
            .json(&serde_json::json!({ "tenant": tenant }))
            .send()
            .await?;
        Self::keystone_check(response, "create tenant").await
    }

    async fn delete_tenant(&self, tenant_id: &str) -> Result<(), MidonetError> {
        if tenant_id.is_empty() {
            return Err(MidonetError::InvalidRequest("tenant id can not be empty".to_string()));
        }
        let url = format!("{}/tenants/{}", self.keystone_url, urlencode(tenant_id));
        debug!("DELETE {}", url);

        let response = self
            .http
            .client()
            .delete(&url)
            .header("X-Auth-Token", &self.keystone_token)
            .send()
            .await?;
        Self::keystone_check(response, "delete tenant").await
    }

    async fn create_chain(&self, chain: &Chain) -> Result<(), MidonetError> {
        self.http.post("/chains", MediaKind::Chain, chain).await
    }

    async fn delete_chain(&self, chain_id: Uuid) -> Result<(), MidonetError> {
        self.http.delete(&format!("/chains/{}", chain_id), MediaKind::Chain).await
    }

    async fn list_chains(&self, tenant_id: &str) -> Result<Vec<Chain>, MidonetError> {
        self.http
            .get_list(&format!("/chains?tenant_id={}", urlencode(tenant_id)), MediaKind::Chain)
            .await
    }

    async fn create_rule(&self, rule: &Rule) -> Result<(), MidonetError> {
        self.http
            .post(&format!("/chains/{}/rules", rule.chain_id), MediaKind::Rule, rule)
            .await
    }

    async fn delete_rule(&self, rule_id: Uuid) -> Result<(), MidonetError> {
        self.http.delete(&format!("/rules/{}", rule_id), MediaKind::Rule).await
    }

    async fn list_rules(&self, chain_id: Uuid) -> Result<Vec<Rule>, MidonetError> {
        self.http
            .get_list(&format!("/chains/{}/rules", chain_id), MediaKind::Rule)
            .await
    }

    async fn create_router(&self, router: &Router) -> Result<(), MidonetError> {
        self.http.post("/routers", MediaKind::Router, router).await
    }

    async fn delete_router(&self, router_id: Uuid) -> Result<(), MidonetError> {
        self.http.delete(&format!("/routers/{}", router_id), MediaKind::Router).await
    }

    async fn list_routers(&self, tenant_id: &str) -> Result<Vec<Router>, MidonetError> {
        self.http
            .get_list(&format!("/routers?tenant_id={}", urlencode(tenant_id)), MediaKind::Router)
            .await
    }

    async fn create_router_port(&self, port: &RouterPort) -> Result<(), MidonetError> {
        self.http
            .post(&format!("/routers/{}/ports", port.port.device_id), MediaKind::Port, port)
            .await
    }

    async fn list_router_ports(&self, router_id: Uuid) -> Result<Vec<RouterPort>, MidonetError> {
        self.http
            .get_list(&format!("/routers/{}/ports", router_id), MediaKind::Port)
            .await
    }

    async fn list_router_peer_ports(&self, router_id: Uuid) -> Result<Vec<RouterPort>, MidonetError> {
        self.http
            .get_list(&format!("/routers/{}/peer_ports", router_id), MediaKind::Port)
            .await
    }

    async fn create_bridge(&self, bridge: &Bridge) -> Result<(), MidonetError> {
        self.http.post("/bridges", MediaKind::Bridge, bridge).await
    }

    async fn delete_bridge(&self, bridge_id: Uuid) -> Result<(), MidonetError> {
        self.http.delete(&format!("/bridges/{}", bridge_id), MediaKind::Bridge).await
    }

    async fn list_bridges(&self, tenant_id: &str) -> Result<Vec<Bridge>, MidonetError> {
        self.http
            .get_list(&format!("/bridges?tenant_id={}", urlencode(tenant_id)), MediaKind::Bridge)
            .await
    }

    async fn create_bridge_port(&self, port: &BridgePort) -> Result<(), MidonetError> {
        self.http
            .post(&format!("/bridges/{}/ports", port.port.device_id), MediaKind::Port, port)
            .await
    }

    async fn list_bridge_ports(&self, bridge_id: Uuid) -> Result<Vec<BridgePort>, MidonetError> {
        self.http
            .get_list(&format!("/bridges/{}/ports", bridge_id), MediaKind::Port)
            .await
    }

    async fn delete_port(&self, port_id: Uuid) -> Result<(), MidonetError> {
        self.http.delete(&format!("/ports/{}", port_id), MediaKind::Port).await
    }

    async fn create_port_link(&self, link: &PortLink) -> Result<(), MidonetError> {
        self.http
            .post(&format!("/ports/{}/link", link.port_id), MediaKind::PortLink, link)
            .await
    }

    async fn delete_port_link(&self, port_id: Uuid) -> Result<(), MidonetError> {
        self.http
            .delete(&format!("/ports/{}/link", port_id), MediaKind::PortLink)
            .await
    }

    async fn create_route(&self, route: &Route) -> Result<(), MidonetError> {
        self.http
            .post(&format!("/routers/{}/routes", route.router_id), MediaKind::Route, route)
            .await
    }

    async fn delete_route(&self, router_id: Uuid, route_id: Uuid) -> Result<(), MidonetError> {
        let path = if self.http.version() == 5 {
            format!("/routes/{}", route_id)
        } else {
            format!("/routers/{}/routes/{}", router_id, route_id)
        };
        self.http.delete(&path, MediaKind::Route).await
    }

    async fn list_routes(&self, router_id: Uuid) -> Result<Vec<Route>, MidonetError> {
        self.http
            .get_list(&format!("/routers/{}/routes", router_id), MediaKind::Route)
            .await
    }

    async fn bind_interface(&self, binding: &HostInterfacePort) -> Result<(), MidonetError> {
        if binding.interface_name.is_empty() {
            return Err(MidonetError::InvalidRequest("interface name can not be empty".to_string()));
        }
        self.http
            .post(&format!("/hosts/{}/ports", binding.host_id), MediaKind::Binding, binding)
            .await
    }

    async fn delete_binding(&self, binding: &HostInterfacePort) -> Result<(), MidonetError> {
        self.http
            .delete(
                &format!("/hosts/{}/ports/{}", binding.host_id, binding.port_id),
                MediaKind::Binding,
            )
            .await
    }
}

fn urlencode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
