//! Topology operations for MockMidonetClient
//!
//! Handles object existence checks, port links and cascading deletes

use super::{MockMidonetClient, guard};
use crate::error::MidonetError;
use crate::models::*;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

pub fn create_tenant(client: &MockMidonetClient, tenant: &Tenant) -> Result<(), MidonetError> {
    if tenant.id.is_empty() {
        return Err(MidonetError::InvalidRequest("tenant id can not be empty".to_string()));
    }
    let mut tenants = guard(&client.tenants);
    if tenants.contains_key(&tenant.id) {
        return Err(MidonetError::Conflict(format!("Tenant {} already exists", tenant.id)));
    }
    tenants.insert(tenant.id.clone(), tenant.clone());
    Ok(())
}

pub fn insert_new<T>(map: &Mutex<HashMap<Uuid, T>>, id: Uuid, value: T, kind: &str) -> Result<(), MidonetError> {
    let mut map = guard(map);
    if map.contains_key(&id) {
        return Err(MidonetError::Conflict(format!("{} {} already exists", kind, id)));
    }
    map.insert(id, value);
    Ok(())
}

pub fn require<T>(map: &Mutex<HashMap<Uuid, T>>, id: Uuid, kind: &str) -> Result<(), MidonetError> {
    if guard(map).contains_key(&id) {
        Ok(())
    } else {
        Err(MidonetError::NotFound(format!("{} {} not found", kind, id)))
    }
}

pub fn remove<T>(map: &Mutex<HashMap<Uuid, T>>, id: Uuid, kind: &str) -> Result<T, MidonetError> {
    guard(map)
        .remove(&id)
        .ok_or_else(|| MidonetError::NotFound(format!("{} {} not found", kind, id)))
}

fn find_port(client: &MockMidonetClient, id: Uuid) -> Option<Port> {
    if let Some(port) = guard(&client.router_ports).get(&id) {
        return Some(port.port.clone());
    }
    guard(&client.bridge_ports).get(&id).map(|port| port.port.clone())
}

fn set_peer(client: &MockMidonetClient, id: Uuid, peer: Option<Uuid>) {
    if let Some(port) = guard(&client.router_ports).get_mut(&id) {
        port.port.peer_id = peer;
        return;
    }
    if let Some(port) = guard(&client.bridge_ports).get_mut(&id) {
        port.port.peer_id = peer;
    }
}

pub fn link(client: &MockMidonetClient, link: &PortLink) -> Result<(), MidonetError> {
    let port = find_port(client, link.port_id)
        .ok_or_else(|| MidonetError::NotFound(format!("Port {} not found", link.port_id)))?;
    let peer = find_port(client, link.peer_id)
        .ok_or_else(|| MidonetError::NotFound(format!("Port {} not found", link.peer_id)))?;
    if port.peer_id.is_some() || peer.peer_id.is_some() {
        return Err(MidonetError::Api(format!(
            "Port {} or {} is already linked: 400",
            link.port_id, link.peer_id
        )));
    }

    set_peer(client, link.port_id, Some(link.peer_id));
    set_peer(client, link.peer_id, Some(link.port_id));
    Ok(())
}

pub fn unlink(client: &MockMidonetClient, port_id: Uuid) -> Result<(), MidonetError> {
    let port = find_port(client, port_id)
        .ok_or_else(|| MidonetError::NotFound(format!("Port {} not found", port_id)))?;
    if let Some(peer) = port.peer_id {
        set_peer(client, peer, None);
        set_peer(client, port_id, None);
    }
    Ok(())
}

pub fn delete_port(client: &MockMidonetClient, port_id: Uuid) -> Result<(), MidonetError> {
    let removed = guard(&client.router_ports).remove(&port_id).map(|port| port.port);
    let removed = match removed {
        Some(port) => port,
        None => guard(&client.bridge_ports)
            .remove(&port_id)
            .map(|port| port.port)
            .ok_or_else(|| MidonetError::NotFound(format!("Port {} not found", port_id)))?,
    };

    if let Some(peer) = removed.peer_id {
        set_peer(client, peer, None);
    }
    guard(&client.routes).retain(|_, route| route.next_hop_port != port_id);
    guard(&client.bindings).remove(&port_id);
    Ok(())
}

pub fn router_peer_ports(client: &MockMidonetClient, router_id: Uuid) -> Vec<RouterPort> {
    let peers: Vec<Uuid> = guard(&client.router_ports)
        .values()
        .filter(|port| port.port.device_id == router_id)
        .filter_map(|port| port.port.peer_id)
        .collect();
    let ports = guard(&client.router_ports);
    peers.iter().filter_map(|id| ports.get(id).cloned()).collect()
}

pub fn delete_router(client: &MockMidonetClient, router_id: Uuid) -> Result<(), MidonetError> {
    remove(&client.routers, router_id, "Router")?;

    let ports: Vec<Uuid> = guard(&client.router_ports)
        .values()
        .filter(|port| port.port.device_id == router_id)
        .map(|port| port.id())
        .collect();
    for port in ports {
        delete_port(client, port)?;
    }
    guard(&client.routes).retain(|_, route| route.router_id != router_id);
    Ok(())
}

pub fn delete_bridge(client: &MockMidonetClient, bridge_id: Uuid) -> Result<(), MidonetError> {
    remove(&client.bridges, bridge_id, "Bridge")?;

    let ports: Vec<Uuid> = guard(&client.bridge_ports)
        .values()
        .filter(|port| port.port.device_id == bridge_id)
        .map(|port| port.id())
        .collect();
    for port in ports {
        delete_port(client, port)?;
    }
    Ok(())
}

pub fn delete_chain(client: &MockMidonetClient, chain_id: Uuid) -> Result<(), MidonetError> {
    remove(&client.chains, chain_id, "Chain")?;
    guard(&client.rules).retain(|_, rule| rule.chain_id != chain_id);
    Ok(())
}

pub fn bind(client: &MockMidonetClient, binding: &HostInterfacePort) -> Result<(), MidonetError> {
    if find_port(client, binding.port_id).is_none() {
        return Err(MidonetError::NotFound(format!("Port {} not found", binding.port_id)));
    }
    let mut bindings = guard(&client.bindings);
    if bindings.contains_key(&binding.port_id) {
        return Err(MidonetError::Conflict(format!("Port {} is already bound", binding.port_id)));
    }
    bindings.insert(binding.port_id, binding.clone());
    Ok(())
}
