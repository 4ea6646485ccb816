//! MidoNet API models
//!
//! These models match the MidoNet REST API DTOs (camelCase JSON). Identifiers are
//! generated by the caller before the create request so that a failed call can be
//! compensated without reading anything back.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Keystone project. The Kubernetes namespace is used as both id and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub name: String,
    pub enabled: bool,
    pub id: String,
    #[serde(default)]
    pub description: String,
}

impl Tenant {
    /// Enabled tenant named after a namespace
    pub fn for_namespace(namespace: &str) -> Self {
        Self {
            name: namespace.to_string(),
            enabled: true,
            id: namespace.to_string(),
            description: String::new(),
        }
    }
}

/// Token returned by `POST /login`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

/// Virtual L2 switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bridge {
    pub id: Uuid,
    pub name: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound_filter_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_filter_id: Option<Uuid>,
}

/// Virtual L3 router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    pub id: Uuid,
    pub name: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound_filter_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_filter_id: Option<Uuid>,
}

/// Rule chain used as a router filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    pub id: Uuid,
    pub name: String,
    pub tenant_id: String,
}

/// Rule type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Accept,
    Snat,
    RevSnat,
    Dnat,
    RevDnat,
    Drop,
    Jump,
    #[serde(other)]
    Other,
}

/// NAT target range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatTarget {
    pub address_from: Ipv4Addr,
    pub address_to: Ipv4Addr,
    pub port_from: u16,
    pub port_to: u16,
}

/// Chain rule. Only the fields the plugin sets are modelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub chain_id: Uuid,
    #[serde(default)]
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_action: Option<String>,
    #[serde(default)]
    pub match_return_flow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub in_ports: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub out_ports: Vec<Uuid>,
    #[serde(default)]
    pub nat_targets: Vec<NatTarget>,
}

impl Rule {
    /// Rule of `rule_type` at `position` in `chain_id`, with no conditions
    pub fn new(rule_type: RuleType, chain_id: Uuid, position: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_type,
            chain_id,
            position,
            flow_action: None,
            match_return_flow: false,
            fragment_policy: None,
            in_ports: Vec::new(),
            out_ports: Vec::new(),
            nat_targets: Vec::new(),
        }
    }
}

/// Static route on a router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: Uuid,
    pub router_id: Uuid,
    pub src_network_addr: Ipv4Addr,
    pub src_network_length: u8,
    pub dst_network_addr: Ipv4Addr,
    pub dst_network_length: u8,
    pub next_hop_port: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop_gateway: Option<Ipv4Addr>,
    #[serde(rename = "type", default = "default_route_type")]
    pub route_type: String,
    #[serde(default = "default_route_weight")]
    pub weight: u32,
}

fn default_route_type() -> String {
    "Normal".to_string()
}

fn default_route_weight() -> u32 {
    100
}

impl Route {
    /// `Normal` route from anywhere to `dst/dst_len` out of `next_hop_port`
    pub fn normal(router_id: Uuid, dst: Ipv4Addr, dst_len: u8, next_hop_port: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            router_id,
            src_network_addr: Ipv4Addr::UNSPECIFIED,
            src_network_length: 0,
            dst_network_addr: dst,
            dst_network_length: dst_len,
            next_hop_port,
            next_hop_gateway: None,
            route_type: default_route_type(),
            weight: default_route_weight(),
        }
    }
}

/// Fields shared by router and bridge ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub id: Uuid,
    pub device_id: Uuid,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub port_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_name: Option<String>,
}

impl Port {
    /// Fresh port on `device_id`
    pub fn on_device(device_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            port_type: None,
            peer_id: None,
            host_id: None,
            interface_name: None,
        }
    }
}

/// Router port with an L3 address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterPort {
    #[serde(flatten)]
    pub port: Port,
    pub network_address: Ipv4Addr,
    pub network_length: u8,
    pub port_address: Ipv4Addr,
}

impl RouterPort {
    /// Port on `router_id` addressed `address` inside `network/length`
    pub fn new(router_id: Uuid, network: Ipv4Addr, length: u8, address: Ipv4Addr) -> Self {
        Self {
            port: Port::on_device(router_id),
            network_address: network,
            network_length: length,
            port_address: address,
        }
    }

    pub fn id(&self) -> Uuid {
        self.port.id
    }
}

/// Bridge port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgePort {
    #[serde(flatten)]
    pub port: Port,
}

impl BridgePort {
    pub fn new(bridge_id: Uuid) -> Self {
        Self {
            port: Port::on_device(bridge_id),
        }
    }

    pub fn id(&self) -> Uuid {
        self.port.id
    }
}

/// Interior link between two ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortLink {
    pub port_id: Uuid,
    pub peer_id: Uuid,
}

/// Binding of a virtual port to a host interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInterfacePort {
    pub host_id: Uuid,
    pub interface_name: String,
    pub port_id: Uuid,
}
