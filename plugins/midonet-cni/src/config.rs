//! Network configuration and CNI invocation environment
//!
//! The runtime passes the network configuration on stdin and the invocation details in
//! `CNI_*` environment variables. Both are parsed and validated here; defaults for the
//! optional fields are applied by [`NetConf::parse`].

use crate::cidr;
use crate::error::PluginError;
use etcd_store::EtcdConf;
use midonet_client::MidonetApiConf;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::warn;

/// Uplink pool used when none (or a too small one) is configured.
pub const DEFAULT_ROUTER_CIDR: &str = "172.16.0.0/24";
/// First tenant block used when none (or a too small one) is configured.
pub const DEFAULT_BRIDGE_CIDR: &str = "192.168.0.0/24";
pub const DEFAULT_MTU: u32 = 1454;
pub const DEFAULT_NAMESPACE: &str = "/midonet-cni";
pub const DEFAULT_LOG_PATH: &str = "/var/log/midonet-cni";
pub const DEFAULT_CNI_VERSION: &str = "0.2.0";

const MIN_ROUTER_ADDRESSES: u64 = 5;
const MIN_BRIDGE_ADDRESSES: u64 = 4;

/// Files the MidoNet agent writes its host id to, in lookup order.
pub const HOST_UUID_FILES: [&str; 2] = [
    "/etc/midolman/host_uuid.properties",
    "/etc/midonet_host_id.properties",
];

/// Network configuration read from stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConf {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_path: String,
    #[serde(default)]
    pub midonet_host_uuid: String,
    #[serde(default)]
    pub midonet_router_cidr: String,
    #[serde(default)]
    pub midonet_bridge_cidr: String,
    #[serde(default)]
    pub ipam: IpamConf,
    #[serde(default)]
    pub mtu: u32,
    #[serde(default = "default_veth_ctrl")]
    pub veth_ctrl_type: String,
    #[serde(default)]
    pub midonet_api: MidonetApiConf,
    #[serde(default)]
    pub etcd_conf: EtcdConf,
    /// Store namespace all keys live under.
    #[serde(default)]
    pub namespace: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_veth_ctrl() -> String {
    "shell".to_string()
}

/// Where addresses come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpamType {
    /// Tenant pools in the coordination store, with MidoNet topology.
    #[default]
    Etcd,
    /// External IP-issuing service.
    #[serde(alias = "reginapi")]
    Region,
}

/// `ipam` block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpamConf {
    #[serde(rename = "type", default)]
    pub ipam_type: IpamType,
    #[serde(default)]
    pub region_net_api: String,
    #[serde(default)]
    pub region_token: String,
    /// Extra routes reported to the pod.
    #[serde(default)]
    pub route: Vec<RouteEntry>,
}

/// Static route in `net`/`netmask` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub net: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gw: Ipv4Addr,
}

impl RouteEntry {
    /// `net/len` destination, or `None` for a non-contiguous mask.
    pub fn destination(&self) -> Option<String> {
        let mask = u32::from(self.netmask);
        let len = mask.leading_ones();
        if mask.checked_shl(len).unwrap_or(0) != 0 {
            return None;
        }
        Some(format!("{}/{}", self.net, len))
    }
}

impl NetConf {
    /// Decode stdin and apply defaults.
    pub fn parse(input: &str) -> Result<Self, PluginError> {
        let mut conf: Self = serde_json::from_str(input).map_err(|e| PluginError::decode("stdin", e))?;
        conf.apply_defaults(&HOST_UUID_FILES)?;
        Ok(conf)
    }

    /// Fill in defaults and validate. `host_uuid_files` is searched when no host
    /// UUID is configured.
    pub fn apply_defaults<P: AsRef<Path>>(&mut self, host_uuid_files: &[P]) -> Result<(), PluginError> {
        if self.etcd_conf.urls.iter().all(|url| url.trim().is_empty()) {
            return Err(PluginError::Config("etcd_conf.urls is required".to_string()));
        }

        self.midonet_router_cidr = sized_or_default(
            "midonet_router_cidr",
            &self.midonet_router_cidr,
            DEFAULT_ROUTER_CIDR,
            MIN_ROUTER_ADDRESSES,
        );
        self.midonet_bridge_cidr = sized_or_default(
            "midonet_bridge_cidr",
            &self.midonet_bridge_cidr,
            DEFAULT_BRIDGE_CIDR,
            MIN_BRIDGE_ADDRESSES,
        );

        if self.mtu == 0 {
            self.mtu = DEFAULT_MTU;
        }
        if self.cni_version.trim().is_empty() {
            self.cni_version = DEFAULT_CNI_VERSION.to_string();
        }
        if self.namespace.trim().is_empty() {
            self.namespace = DEFAULT_NAMESPACE.to_string();
        }
        if self.log_path.trim().is_empty() {
            self.log_path = DEFAULT_LOG_PATH.to_string();
        }
        if self.veth_ctrl_type.trim().is_empty() {
            self.veth_ctrl_type = default_veth_ctrl();
        }
        if self.midonet_host_uuid.trim().is_empty() {
            if let Some(uuid) = host_uuid_files.iter().find_map(|path| read_host_uuid(path.as_ref())) {
                self.midonet_host_uuid = uuid;
            }
        }
        Ok(())
    }

    pub fn ipam_type(&self) -> IpamType {
        self.ipam.ipam_type
    }
}

fn sized_or_default(field: &str, value: &str, default: &str, min: u64) -> String {
    if value.trim().is_empty() {
        return default.to_string();
    }
    match cidr::parse_network(value) {
        Ok(net) if cidr::range_length(&net) >= min => net.to_string(),
        Ok(_) => {
            warn!("{} {} holds fewer than {} addresses, using {}", field, value, min, default);
            default.to_string()
        }
        Err(e) => {
            warn!("{} is unusable ({}), using {}", field, e, default);
            default.to_string()
        }
    }
}

/// `host_uuid=<uuid>` properties file
fn read_host_uuid(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .find_map(|line| line.split_once('='))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Kubernetes fields of `CNI_ARGS`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct K8sArgs {
    pub ip: Option<Ipv4Addr>,
    pub pod_name: String,
    pub pod_namespace: String,
    pub infra_container_id: String,
    pub ignore_unknown: bool,
}

impl K8sArgs {
    /// Parse `K=V;K=V`. Unknown keys are rejected unless `IgnoreUnknown` is true.
    pub fn parse(raw: &str) -> Result<Self, PluginError> {
        let mut args = Self::default();
        if raw.trim().is_empty() {
            return Ok(args);
        }

        let mut pairs = Vec::new();
        for pair in raw.split(';') {
            let parts: Vec<&str> = pair.split('=').collect();
            if parts.len() != 2 {
                return Err(PluginError::Args(format!("invalid pair {:?}", pair)));
            }
            pairs.push((parts[0], parts[1]));
        }

        if let Some((_, value)) = pairs.iter().find(|(key, _)| *key == "IgnoreUnknown") {
            args.ignore_unknown = parse_bool(value)?;
        }

        for (key, value) in pairs {
            match key {
                "IgnoreUnknown" => {}
                "IP" => {
                    let ip = value
                        .parse()
                        .map_err(|e| PluginError::Args(format!("invalid IP {:?}: {}", value, e)))?;
                    args.ip = Some(ip);
                }
                "K8S_POD_NAME" => args.pod_name = value.to_string(),
                "K8S_POD_NAMESPACE" => args.pod_namespace = value.to_string(),
                "K8S_POD_INFRA_CONTAINER_ID" => args.infra_container_id = value.to_string(),
                _ if args.ignore_unknown => {}
                _ => return Err(PluginError::Args(format!("unknown args [{}={}]", key, value))),
            }
        }
        Ok(args)
    }
}

fn parse_bool(value: &str) -> Result<bool, PluginError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(PluginError::Args(format!("boolean unmarshal error: invalid input {}", value))),
    }
}

/// CNI command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    Del,
    Version,
}

impl std::str::FromStr for Command {
    type Err = PluginError;

    fn from_str(raw: &str) -> Result<Self, PluginError> {
        match raw {
            "ADD" => Ok(Self::Add),
            "DEL" => Ok(Self::Del),
            "VERSION" => Ok(Self::Version),
            _ => {
                // keep untrusted input short in logs
                let safe: String = raw
                    .chars()
                    .take(32)
                    .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                    .collect();
                Err(PluginError::Env(format!("unknown CNI_COMMAND: {}", safe)))
            }
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Add => "ADD",
            Self::Del => "DEL",
            Self::Version => "VERSION",
        })
    }
}

/// `CNI_*` environment of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CniEnv {
    pub command: Command,
    pub container_id: String,
    pub netns: String,
    pub ifname: String,
    pub args: K8sArgs,
}

impl CniEnv {
    pub fn from_env() -> Result<Self, PluginError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PluginError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let command: Command = lookup("CNI_COMMAND")
            .ok_or_else(|| PluginError::Env("CNI_COMMAND not set".to_string()))?
            .parse()?;
        let container_id = lookup("CNI_CONTAINERID").unwrap_or_default();
        if container_id.is_empty() && command != Command::Version {
            return Err(PluginError::Env("CNI_CONTAINERID not set".to_string()));
        }

        Ok(Self {
            command,
            container_id,
            netns: lookup("CNI_NETNS").unwrap_or_default(),
            ifname: lookup("CNI_IFNAME").unwrap_or_default(),
            args: K8sArgs::parse(&lookup("CNI_ARGS").unwrap_or_default())?,
        })
    }

    /// Idempotence key: the pod infra container id, else `CNI_CONTAINERID`.
    pub fn key(&self) -> &str {
        if self.args.infra_container_id.is_empty() {
            &self.container_id
        } else {
            &self.args.infra_container_id
        }
    }

    /// Host-side interface: `vif` + the first 12 characters of the container id.
    pub fn host_ifname(&self) -> String {
        format!("vif{}", self.container_id.chars().take(12).collect::<String>())
    }
}
