//! Plugin error types.
//!
//! Every failure that reaches the CNI runtime is a [`PluginError`]; it carries its
//! own CNI error code and renders as the `{cniVersion, code, msg, details}` document.

use crate::cidr::CidrError;
use etcd_store::StoreError;
use midonet_client::MidonetError;
use std::error::Error as _;
use thiserror::Error;

/// CNI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CniErrorCode {
    /// 4: Invalid necessary environment variables
    InvalidEnvironmentVariables = 4,

    /// 5: I/O failure
    IoFailure = 5,

    /// 6: Failed to decode content
    DecodingFailure = 6,

    /// 7: Invalid network config
    InvalidNetworkConfig = 7,

    /// 11: Try again later
    TryAgainLater = 11,

    // Plugin-specific errors (100+)
    /// 100: Coordination store failure
    StoreFailure = 100,

    /// 101: MidoNet API failure
    MidonetFailure = 101,

    /// 102: IPAM failure
    IpamFailure = 102,

    /// 103: Veth controller failure
    VethFailure = 103,

    /// 104: External IP service failure
    RegionFailure = 104,
}

/// Errors that can occur in the plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Coordination store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// MidoNet or Keystone API error
    #[error("MidoNet error: {0}")]
    Midonet(#[from] MidonetError),

    /// Bad CIDR in configuration or in the store
    #[error(transparent)]
    Cidr(#[from] CidrError),

    /// A stored record or the stdin document could not be decoded
    #[error("malformed record at {key}: {reason}")]
    Decode { key: String, reason: String },

    /// Pool directory or its `iprange` marker is missing
    #[error("address pool {0} is not initialized")]
    PoolUninitialized(String),

    /// Pool stayed empty after a new block was added
    #[error("address pool {0} is exhausted")]
    PoolExhausted(String),

    /// Fewer addresses than requested could be taken from a pool
    #[error("address pool {scope} returned {got} of {wanted} addresses")]
    ShortRead { scope: String, wanted: usize, got: usize },

    /// Invalid network configuration
    #[error("invalid network config: {0}")]
    Config(String),

    /// Malformed `CNI_ARGS`
    #[error("ARGS: {0}")]
    Args(String),

    /// Missing or invalid CNI environment variable
    #[error("{0}")]
    Env(String),

    /// The tenant network was torn down while a container was being attached
    #[error("network of tenant {0} was removed concurrently")]
    TenantRemoved(String),

    /// Host-side wiring failed
    #[error("veth controller failed: {0}")]
    Veth(String),

    /// External IP service failed
    #[error("IP service error: {0}")]
    Region(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Shorthand for a decode failure at `key`.
    pub fn decode(key: &str, reason: impl ToString) -> Self {
        Self::Decode {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True when the error is a missing store key.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Store(e) => e.is_not_found(),
            Self::Midonet(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// CNI error code for this error
    pub fn code(&self) -> CniErrorCode {
        match self {
            Self::Store(e) if e.is_timeout() => CniErrorCode::TryAgainLater,
            Self::Store(StoreError::Http(_)) => CniErrorCode::TryAgainLater,
            Self::Store(_) => CniErrorCode::StoreFailure,
            Self::Midonet(_) => CniErrorCode::MidonetFailure,
            Self::Cidr(_) | Self::Config(_) => CniErrorCode::InvalidNetworkConfig,
            Self::Decode { .. } => CniErrorCode::DecodingFailure,
            Self::PoolUninitialized(_) | Self::PoolExhausted(_) => CniErrorCode::IpamFailure,
            Self::ShortRead { .. } | Self::TenantRemoved(_) => CniErrorCode::TryAgainLater,
            Self::Args(_) | Self::Env(_) => CniErrorCode::InvalidEnvironmentVariables,
            Self::Veth(_) => CniErrorCode::VethFailure,
            Self::Region(_) => CniErrorCode::RegionFailure,
            Self::Io(_) => CniErrorCode::IoFailure,
        }
    }

    /// CNI error document
    pub fn to_cni_json(&self, cni_version: &str) -> serde_json::Value {
        serde_json::json!({
            "cniVersion": cni_version,
            "code": self.code() as u32,
            "msg": self.to_string(),
            "details": self.source().map(ToString::to_string).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(CniErrorCode::InvalidEnvironmentVariables as u32, 4);
        assert_eq!(CniErrorCode::TryAgainLater as u32, 11);
        assert_eq!(CniErrorCode::StoreFailure as u32, 100);
    }

    #[test]
    fn test_codes_per_variant() {
        assert_eq!(PluginError::Env("CNI_COMMAND not set".into()).code(), CniErrorCode::InvalidEnvironmentVariables);
        assert_eq!(PluginError::decode("stdin", "eof").code(), CniErrorCode::DecodingFailure);
        assert_eq!(
            PluginError::Cidr(CidrError::NotNetwork("10.0.0.1/8".into())).code(),
            CniErrorCode::InvalidNetworkConfig
        );
        assert_eq!(PluginError::PoolExhausted("ns1".into()).code(), CniErrorCode::IpamFailure);
        assert_eq!(PluginError::TenantRemoved("ns1".into()).code(), CniErrorCode::TryAgainLater);
        assert_eq!(
            PluginError::Store(StoreError::AlreadyExists("/k".into())).code(),
            CniErrorCode::StoreFailure
        );
        assert_eq!(
            PluginError::Midonet(MidonetError::NotFound("router".into())).code(),
            CniErrorCode::MidonetFailure
        );
    }

    #[test]
    fn test_cni_json_shape() {
        let err = PluginError::Store(StoreError::NotFound("/midonet-cni/x".into()));
        let doc = err.to_cni_json("0.3.1");
        assert_eq!(doc["cniVersion"], "0.3.1");
        assert_eq!(doc["code"], 100);
        assert_eq!(doc["msg"], "store error: key not found: /midonet-cni/x");
        assert_eq!(doc["details"], "key not found: /midonet-cni/x");
        assert!(err.is_not_found());
    }
}
