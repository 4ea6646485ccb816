//! External IP-issuing service
//!
//! Region deployments do not use tenant pools: each pod address is requested from an
//! HTTP service that answers with `ip/prefix@gateway`.

use crate::error::PluginError;
use ipnet::Ipv4Net;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, error, info};

/// Timeout for a single request to the service.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Retries after the first failed request.
const MAX_RETRIES: usize = 3;

/// Body of `POST {api}midolnet/{namespace}/bindings`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionRequest {
    pub host_id: String,
    pub ctn_id: String,
    pub replica_id: String,
    pub deploy_version: String,
    pub pod_name: String,
}

impl RegionRequest {
    /// The replica id is the pod name up to its first `-`.
    pub fn new(host_id: &str, container_id: &str, pod_name: &str) -> Self {
        Self {
            host_id: host_id.to_string(),
            ctn_id: container_id.to_string(),
            replica_id: pod_name.split('-').next().unwrap_or_default().to_string(),
            deploy_version: String::new(),
            pod_name: pod_name.to_string(),
        }
    }
}

/// Address issued by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLease {
    pub address: Ipv4Net,
    pub gateway: Ipv4Addr,
}

impl std::str::FromStr for RegionLease {
    type Err = PluginError;

    /// `ip/prefix@gateway`
    fn from_str(raw: &str) -> Result<Self, PluginError> {
        let invalid = |reason: String| PluginError::Region(format!("invalid ip {:?}: {}", raw, reason));
        let (address, gateway) = raw
            .trim()
            .split_once('@')
            .ok_or_else(|| invalid("expected ip/prefix@gateway".to_string()))?;
        Ok(Self {
            address: address.parse().map_err(|e: ipnet::AddrParseError| invalid(e.to_string()))?,
            gateway: gateway
                .parse()
                .map_err(|e: std::net::AddrParseError| invalid(e.to_string()))?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RegionResponse {
    #[serde(default)]
    ip: String,
}

/// Source of pod addresses outside the coordination store.
#[async_trait::async_trait]
pub trait IpService: Send + Sync {
    /// Ask for an address for a pod of `namespace`.
    async fn request_ip(&self, namespace: &str, request: &RegionRequest) -> Result<RegionLease, PluginError>;
}

/// HTTP client for the region network API.
#[derive(Debug)]
pub struct RegionClient {
    client: Client,
    api: String,
    token: String,
}

impl RegionClient {
    /// Create a new region client
    ///
    /// # Arguments
    /// * `api` - base URL, used as a prefix of `midolnet/{namespace}/bindings`
    /// * `token` - value sent as `Authorization: Token <token>`
    pub fn new(api: &str, token: &str) -> Result<Self, PluginError> {
        if api.trim().is_empty() {
            return Err(PluginError::Config("ipam.region_net_api is required".to_string()));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PluginError::Region(e.to_string()))?;

        let mut api = api.trim().to_string();
        if !api.ends_with('/') {
            api.push('/');
        }
        Ok(Self {
            client,
            api,
            token: token.to_string(),
        })
    }

    fn url(&self, namespace: &str) -> String {
        format!("{}midolnet/{}/bindings", self.api, urlencoding::encode(namespace))
    }

    async fn post_once(&self, url: &str, request: &RegionRequest) -> Result<String, String> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Token {}", self.token))
            .json(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("{} - {}", status, body));
        }
        let body: RegionResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(body.ip)
    }
}

#[async_trait::async_trait]
impl IpService for RegionClient {
    async fn request_ip(&self, namespace: &str, request: &RegionRequest) -> Result<RegionLease, PluginError> {
        let url = self.url(namespace);
        debug!("POST {} for container {}", url, request.ctn_id);

        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            match self.post_once(&url, request).await {
                Ok(ip) => {
                    info!("IP service issued {} for pod {}", ip, request.pod_name);
                    return ip.parse();
                }
                Err(e) => {
                    error!("IP service request {} of {} failed: {}", attempt + 1, MAX_RETRIES + 1, e);
                    last_error = e;
                }
            }
        }
        Err(PluginError::Region(last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lease() {
        let lease: RegionLease = "10.1.2.3/16@10.1.0.1".parse().unwrap();
        assert_eq!(lease.address.to_string(), "10.1.2.3/16");
        assert_eq!(lease.gateway, Ipv4Addr::new(10, 1, 0, 1));
    }

    #[test]
    fn test_parse_lease_rejects_bad_format() {
        assert!(matches!("10.1.2.3/16".parse::<RegionLease>(), Err(PluginError::Region(_))));
        assert!(matches!("10.1.2.3@10.1.0.1".parse::<RegionLease>(), Err(PluginError::Region(_))));
        assert!(matches!("".parse::<RegionLease>(), Err(PluginError::Region(_))));
    }

    #[test]
    fn test_request_body() {
        let request = RegionRequest::new("host-1", "abc", "web-5d8f-x2");
        assert_eq!(request.replica_id, "web");
        assert_eq!(request.deploy_version, "");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["ctn_id"], "abc");
        assert_eq!(json["pod_name"], "web-5d8f-x2");
    }

    #[test]
    fn test_url() {
        let client = RegionClient::new("http://region:8888/v2", "t").unwrap();
        assert_eq!(client.url("ns1"), "http://region:8888/v2/midolnet/ns1/bindings");
        assert!(matches!(RegionClient::new(" ", "t"), Err(PluginError::Config(_))));
    }
}
