//! CNI Result types
//!
//! One canonical result is built and cached; [`CniResult::render`] turns it into the
//! document shape the requested `cniVersion` expects (legacy `ip4` for 0.1/0.2,
//! `ips`/`routes` for everything later).

use crate::config::RouteEntry;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Versions this plugin answers VERSION with.
pub const SUPPORTED_VERSIONS: &[&str] = &["0.1.0", "0.2.0", "0.3.0", "0.3.1", "0.4.0", "1.0.0"];

/// Result returned by ADD operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    /// CNI specification version
    pub cni_version: String,

    /// IP addresses assigned
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpConfig>,

    /// Routes configured
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,

    /// DNS configuration
    #[serde(default)]
    pub dns: DnsResult,
}

impl CniResult {
    pub fn new(cni_version: &str) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            ips: Vec::new(),
            routes: Vec::new(),
            dns: DnsResult::default(),
        }
    }

    /// Result for a single IPv4 address plus the configured static routes.
    pub fn for_address(cni_version: &str, address: Ipv4Net, gateway: Ipv4Addr, routes: &[RouteEntry]) -> Self {
        let mut result = Self::new(cni_version).with_ip(address, gateway);
        for route in routes {
            if let Some(dst) = route.destination() {
                result = result.with_route(dst, Some(route.gw));
            }
        }
        result
    }

    /// Add an IP configuration to the result
    pub fn with_ip(mut self, address: Ipv4Net, gateway: Ipv4Addr) -> Self {
        self.ips.push(IpConfig {
            version: "4".to_string(),
            address: address.to_string(),
            gateway: Some(gateway.to_string()),
        });
        self
    }

    /// Add a route to the result
    ///
    /// # Arguments
    /// * `dst` - Destination network in CIDR notation (e.g., "10.10.0.0/16")
    /// * `gw` - Optional gateway IP address
    pub fn with_route(mut self, dst: String, gw: Option<Ipv4Addr>) -> Self {
        self.routes.push(RouteConfig {
            dst,
            gw: gw.map(|gw| gw.to_string()),
        });
        self
    }

    /// Copy of this result for another requested version.
    pub fn with_version(&self, cni_version: &str) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            ..self.clone()
        }
    }

    fn is_legacy(&self) -> bool {
        self.cni_version.is_empty() || self.cni_version.starts_with("0.1.") || self.cni_version.starts_with("0.2.")
    }

    /// Output document for stdout.
    pub fn render(&self) -> serde_json::Value {
        if !self.is_legacy() {
            return serde_json::to_value(self).unwrap_or_default();
        }

        let ip4 = self.ips.first().map(|ip| LegacyIpConfig {
            ip: ip.address.clone(),
            gateway: ip.gateway.clone(),
            routes: self.routes.clone(),
        });
        serde_json::to_value(LegacyResult {
            cni_version: self.cni_version.clone(),
            ip4,
            dns: self.dns.clone(),
        })
        .unwrap_or_default()
    }
}

/// IP address configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfig {
    /// Always "4"
    pub version: String,

    /// IP address in CIDR notation
    pub address: String,

    /// Gateway IP address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// Route configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Destination network in CIDR notation
    pub dst: String,

    /// Gateway IP address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gw: Option<String>,
}

/// DNS configuration result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// 0.1.x / 0.2.x result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct LegacyResult {
    cni_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip4: Option<LegacyIpConfig>,
    dns: DnsResult,
}

#[derive(Debug, Clone, Serialize)]
struct LegacyIpConfig {
    ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    routes: Vec<RouteConfig>,
}

/// Result returned by VERSION operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResult {
    /// Current CNI version
    pub cni_version: String,

    /// List of supported CNI versions
    pub supported_versions: Vec<String>,
}

impl VersionResult {
    pub fn new(cni_version: &str) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(ToString::to_string).collect(),
        }
    }
}
