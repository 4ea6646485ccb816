//! Undo stacks for multi-step provisioning
//!
//! Every remote object or store write that succeeds pushes the action that removes it
//! again. On failure the stack unwinds newest first; compensation errors are logged
//! and never replace the error that caused the rollback.

use crate::error::PluginError;
use crate::ipam::{IpPool, Seeded};
use crate::records::UplinkPair;
use crate::store;
use midonet_client::{HostInterfacePort, MidonetClientTrait, MidonetError};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Compensating action for one completed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Undo {
    DeleteTenant(String),
    DeleteChain(Uuid),
    DeleteRule(Uuid),
    DeleteRouter(Uuid),
    DeleteBridge(Uuid),
    DeletePort(Uuid),
    /// Remove the link of this port
    Unlink(Uuid),
    DeleteRoute { router_id: Uuid, route_id: Uuid },
    ReleaseUplink(UplinkPair),
    RestorePool(Seeded),
    DeleteKey(String),
    Unbind(HostInterfacePort),
}

impl std::fmt::Display for Undo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeleteTenant(id) => write!(f, "delete tenant {}", id),
            Self::DeleteChain(id) => write!(f, "delete chain {}", id),
            Self::DeleteRule(id) => write!(f, "delete rule {}", id),
            Self::DeleteRouter(id) => write!(f, "delete router {}", id),
            Self::DeleteBridge(id) => write!(f, "delete bridge {}", id),
            Self::DeletePort(id) => write!(f, "delete port {}", id),
            Self::Unlink(id) => write!(f, "unlink port {}", id),
            Self::DeleteRoute { route_id, .. } => write!(f, "delete route {}", route_id),
            Self::ReleaseUplink(pair) => write!(f, "release uplink {}:{}", pair.local, pair.remote),
            Self::RestorePool(seeded) => write!(f, "restore {} pool", seeded.scope),
            Self::DeleteKey(key) => write!(f, "delete key {}", key),
            Self::Unbind(binding) => write!(f, "unbind port {}", binding.port_id),
        }
    }
}

/// Undo stack for one provisioning run.
pub struct Saga {
    name: String,
    midonet: Arc<dyn MidonetClientTrait>,
    pool: IpPool,
    undo: Vec<Undo>,
}

impl std::fmt::Debug for Saga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Saga")
            .field("name", &self.name)
            .field("undo", &self.undo)
            .finish_non_exhaustive()
    }
}

impl Saga {
    /// Start an empty saga
    ///
    /// # Arguments
    /// * `name` - used in log lines
    /// * `midonet` - client the remote compensations run against
    /// * `pool` - allocator the IP compensations run against
    pub fn new(name: impl Into<String>, midonet: Arc<dyn MidonetClientTrait>, pool: IpPool) -> Self {
        Self {
            name: name.into(),
            midonet,
            pool,
            undo: Vec::new(),
        }
    }

    /// Record a completed step.
    pub fn push(&mut self, undo: Undo) {
        debug!("[{}] recorded undo: {}", self.name, undo);
        self.undo.push(undo);
    }

    /// Separate saga for a group of steps that rolls back on its own.
    pub fn child(&self, name: &str) -> Saga {
        Saga::new(format!("{}/{}", self.name, name), Arc::clone(&self.midonet), self.pool.clone())
    }

    /// Take over the steps of a finished child.
    pub fn absorb(&mut self, child: Saga) {
        self.undo.extend(child.undo);
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Everything succeeded; forget the undo stack.
    pub fn commit(self) {
        debug!("[{}] committed {} steps", self.name, self.undo.len());
    }

    /// Unwind newest first. Returns the number of compensations that failed.
    pub async fn rollback(mut self) -> usize {
        info!("[{}] rolling back {} steps", self.name, self.undo.len());
        let mut failed = 0;
        while let Some(undo) = self.undo.pop() {
            match self.apply(&undo).await {
                Ok(()) => debug!("[{}] {}", self.name, undo),
                Err(e) if e.is_not_found() => debug!("[{}] {}: already gone", self.name, undo),
                Err(e) => {
                    warn!("[{}] rollback step '{}' failed: {}", self.name, undo, e);
                    failed += 1;
                }
            }
        }
        failed
    }

    /// Roll back and hand `error` on to the caller.
    pub async fn abort<T>(self, error: PluginError) -> Result<T, PluginError> {
        warn!("[{}] failed: {}", self.name, error);
        self.rollback().await;
        Err(error)
    }

    async fn apply(&self, undo: &Undo) -> Result<(), PluginError> {
        let midonet = self.midonet.as_ref();
        match undo {
            Undo::DeleteTenant(id) => Ok(midonet.delete_tenant(id).await?),
            Undo::DeleteChain(id) => Ok(midonet.delete_chain(*id).await?),
            Undo::DeleteRule(id) => Ok(midonet.delete_rule(*id).await?),
            Undo::DeleteRouter(id) => Ok(midonet.delete_router(*id).await?),
            Undo::DeleteBridge(id) => Ok(midonet.delete_bridge(*id).await?),
            Undo::DeletePort(id) => Ok(midonet.delete_port(*id).await?),
            Undo::Unlink(id) => Ok(midonet.delete_port_link(*id).await?),
            Undo::DeleteRoute { router_id, route_id } => Ok(midonet.delete_route(*router_id, *route_id).await?),
            Undo::ReleaseUplink(pair) => {
                self.pool.release_uplink_pair(pair).await?;
                Ok(())
            }
            Undo::RestorePool(seeded) => self.pool.unseed(seeded).await,
            Undo::DeleteKey(key) => store::remove(self.pool.store().as_ref(), key).await,
            Undo::Unbind(binding) => Ok(midonet.delete_binding(binding).await?),
        }
    }
}

/// Run a remote call and record its undo when it succeeds.
pub async fn step<F>(saga: &mut Saga, undo: Undo, call: F) -> Result<(), PluginError>
where
    F: std::future::Future<Output = Result<(), MidonetError>>,
{
    call.await?;
    saga.push(undo);
    Ok(())
}
