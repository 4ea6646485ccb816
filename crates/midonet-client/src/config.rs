//! MidoNet API connection settings

use serde::{Deserialize, Serialize};

/// `midonet_api` block of the plugin configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MidonetApiConf {
    pub url: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub project_id: String,
    /// Shared provider router every tenant router uplinks to.
    #[serde(default)]
    pub provider_router_id: String,
    /// API version; `0` means `1`.
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub keystone_conf: KeystoneConf,
}

impl MidonetApiConf {
    /// API version with the `0` default applied
    pub fn api_version(&self) -> u32 {
        if self.version == 0 { 1 } else { self.version }
    }
}

/// Keystone admin endpoint used for tenant management.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeystoneConf {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
}
