//! Typed store records
//!
//! Every value the plugin keeps in the store passes through [`Record`]. Plain-text
//! records (leases, uplinks, the active bridge id) keep the string formats other
//! tooling reads; the rest are JSON documents.

use crate::cidr;
use crate::config::RouteEntry;
use crate::error::PluginError;
use crate::result::CniResult;
use ipnet::Ipv4Net;
use midonet_client::{Bridge, HostInterfacePort, PortLink, Router, Rule, Tenant};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// A value stored under a single key.
pub trait Record: Sized {
    /// Render the stored form. `key` is only used for error reporting.
    fn encode(&self, key: &str) -> Result<String, PluginError>;

    /// Parse the stored form read from `key`.
    fn decode(key: &str, raw: &str) -> Result<Self, PluginError>;
}

fn to_json<T: Serialize>(key: &str, value: &T) -> Result<String, PluginError> {
    serde_json::to_string(value).map_err(|e| PluginError::decode(key, e))
}

fn from_json<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, PluginError> {
    serde_json::from_str(raw).map_err(|e| PluginError::decode(key, e))
}

/// Parse an `ip/prefix` value.
pub fn parse_entry(key: &str, raw: &str) -> Result<Ipv4Net, PluginError> {
    raw.trim()
        .parse::<Ipv4Net>()
        .map_err(|e| PluginError::decode(key, format!("{:?} is not ip/prefix: {}", raw, e)))
}

/// Address leased to a container, stored as `ip/prefix`.
///
/// The gateway is not stored; it is always the block base + 254.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub container_id: String,
    pub address: Ipv4Net,
    pub gateway: Ipv4Addr,
}

impl LeaseRecord {
    pub fn new(container_id: &str, address: Ipv4Net) -> Self {
        Self {
            container_id: container_id.to_string(),
            address,
            gateway: cidr::gateway(&address.trunc()),
        }
    }
}

impl Record for LeaseRecord {
    fn encode(&self, _key: &str) -> Result<String, PluginError> {
        Ok(self.address.to_string())
    }

    fn decode(key: &str, raw: &str) -> Result<Self, PluginError> {
        let container = key.rsplit('/').next().unwrap_or(key);
        Ok(Self::new(container, parse_entry(key, raw)?))
    }
}

/// Uplink addresses of a tenant router, stored as `local:remote`.
///
/// `remote` sits on the provider router, `local` on the tenant router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkPair {
    pub local: Ipv4Net,
    pub remote: Ipv4Net,
}

impl Record for UplinkPair {
    fn encode(&self, _key: &str) -> Result<String, PluginError> {
        Ok(format!("{}:{}", self.local, self.remote))
    }

    fn decode(key: &str, raw: &str) -> Result<Self, PluginError> {
        let (local, remote) = raw
            .split_once(':')
            .ok_or_else(|| PluginError::decode(key, format!("{:?} is not local:remote", raw)))?;
        Ok(Self {
            local: parse_entry(key, local)?,
            remote: parse_entry(key, remote)?,
        })
    }
}

/// Plain UUID, used for the active bridge.
impl Record for Uuid {
    fn encode(&self, _key: &str) -> Result<String, PluginError> {
        Ok(self.to_string())
    }

    fn decode(key: &str, raw: &str) -> Result<Self, PluginError> {
        Uuid::parse_str(raw.trim()).map_err(|e| PluginError::decode(key, e))
    }
}

impl Record for Tenant {
    fn encode(&self, key: &str) -> Result<String, PluginError> {
        to_json(key, self)
    }

    fn decode(key: &str, raw: &str) -> Result<Self, PluginError> {
        from_json(key, raw)
    }
}

impl Record for Router {
    fn encode(&self, key: &str) -> Result<String, PluginError> {
        to_json(key, self)
    }

    fn decode(key: &str, raw: &str) -> Result<Self, PluginError> {
        from_json(key, raw)
    }
}

impl Record for Bridge {
    fn encode(&self, key: &str) -> Result<String, PluginError> {
        to_json(key, self)
    }

    fn decode(key: &str, raw: &str) -> Result<Self, PluginError> {
        from_json(key, raw)
    }
}

impl Record for PortLink {
    fn encode(&self, key: &str) -> Result<String, PluginError> {
        to_json(key, self)
    }

    fn decode(key: &str, raw: &str) -> Result<Self, PluginError> {
        from_json(key, raw)
    }
}

/// The default rule set of a tenant router.
impl Record for Vec<Rule> {
    fn encode(&self, key: &str) -> Result<String, PluginError> {
        to_json(key, self)
    }

    fn decode(key: &str, raw: &str) -> Result<Self, PluginError> {
        from_json(key, raw)
    }
}

/// Binding of a container interface to a bridge port: `{hostId, portId, interfaceName}`.
impl Record for HostInterfacePort {
    fn encode(&self, key: &str) -> Result<String, PluginError> {
        to_json(key, self)
    }

    fn decode(key: &str, raw: &str) -> Result<Self, PluginError> {
        from_json(key, raw)
    }
}

/// Cached ADD result.
impl Record for CniResult {
    fn encode(&self, key: &str) -> Result<String, PluginError> {
        to_json(key, self)
    }

    fn decode(key: &str, raw: &str) -> Result<Self, PluginError> {
        from_json(key, raw)
    }
}

/// Routes handed to every pod, kept at `config/route`.
impl Record for Vec<RouteEntry> {
    fn encode(&self, key: &str) -> Result<String, PluginError> {
        to_json(key, self)
    }

    fn decode(key: &str, raw: &str) -> Result<Self, PluginError> {
        from_json(key, raw)
    }
}
