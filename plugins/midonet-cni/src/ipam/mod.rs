//! Address pools
//!
//! A pool is a store directory of free addresses plus an `iprange` marker naming the
//! block that currently seeds it. Leasing deletes an entry; whoever's delete succeeds
//! owns the address. When a pool runs dry the caller seeds the next block of the same
//! size, and entries left over from older blocks are abandoned in place.
//!
//! Two kinds of pool exist:
//! - one per tenant, feeding pod addresses on the tenant's bridges
//! - one shared uplink pool, handing out address pairs for tenant router uplinks

pub mod region;

use crate::cidr::{self, CidrError, CidrRange};
use crate::error::PluginError;
use crate::records::{LeaseRecord, UplinkPair, parse_entry};
use crate::store::{self, Keys};
use etcd_store::{KeyValueStore, Node, SHORT_LOCK_TTL, StoreError};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the marker key inside a pool directory.
pub const MARKER: &str = "iprange";

/// A pool keeps at least this many entries; below it the pool counts as exhausted.
pub(crate) const MIN_ENTRIES: usize = 2;

/// Which pool an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolScope {
    Tenant(String),
    RouterUplink,
}

impl PoolScope {
    pub fn dir(&self, keys: &Keys) -> String {
        match self {
            Self::Tenant(tenant) => keys.tenant_pool(tenant),
            Self::RouterUplink => keys.router_pool(),
        }
    }

    /// `iprange` key naming the current block.
    pub fn marker(&self, keys: &Keys) -> String {
        format!("{}/{}", self.dir(keys), MARKER)
    }

    /// Free-entry key of `addr`.
    pub fn entry(&self, keys: &Keys, addr: Ipv4Addr) -> String {
        format!("{}/{}", self.dir(keys), addr)
    }

    /// Lock serializing seeding and releases on this pool.
    pub fn lock_key(&self, keys: &Keys) -> String {
        match self {
            Self::Tenant(tenant) => keys.bridge_create_lock(tenant),
            Self::RouterUplink => keys.router_ip_lock(),
        }
    }

    fn min_addresses(&self) -> u64 {
        match self {
            Self::Tenant(_) => 4,
            // two discarded, two held back
            Self::RouterUplink => 4,
        }
    }
}

impl std::fmt::Display for PoolScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tenant(tenant) => write!(f, "tenant {}", tenant),
            Self::RouterUplink => f.write_str("router uplink"),
        }
    }
}

/// Outcome of a tenant lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lease {
    Leased(LeaseRecord),
    /// Fewer than two current entries remain; a new block is needed.
    Exhausted,
}

/// What a seed wrote, enough to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seeded {
    pub scope: PoolScope,
    /// Marker value before the seed, if any.
    pub previous: Option<String>,
    /// Addresses written as free entries.
    pub entries: Vec<Ipv4Addr>,
    /// Addresses returned to the caller instead of being written.
    pub held: Vec<Ipv4Net>,
}

/// Current state of a pool directory.
#[derive(Debug, Clone)]
struct Snapshot {
    marker: Ipv4Net,
    /// Entries inside the marker block, in address order.
    current: Vec<Node>,
}

/// IP pool allocator over the coordination store.
#[derive(Clone)]
pub struct IpPool {
    store: Arc<dyn KeyValueStore>,
    keys: Keys,
    router_cidr: String,
}

impl std::fmt::Debug for IpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpPool")
            .field("keys", &self.keys)
            .field("router_cidr", &self.router_cidr)
            .finish_non_exhaustive()
    }
}

impl IpPool {
    /// Create a pool allocator
    ///
    /// # Arguments
    /// * `store` - coordination store
    /// * `keys` - key layout of the plugin namespace
    /// * `router_cidr` - block the uplink pool starts from
    pub fn new(store: Arc<dyn KeyValueStore>, keys: Keys, router_cidr: impl Into<String>) -> Self {
        Self {
            store,
            keys,
            router_cidr: router_cidr.into(),
        }
    }

    /// Key layout the pool writes under.
    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Fill `scope` from `cidr` and make it the current block.
    ///
    /// The first two addresses are never handed out. Tenant pools also skip every
    /// `.254` address (the bridge gateway), and blocks larger than four addresses skip
    /// their broadcast address. The uplink pool holds back the next two addresses and
    /// returns them in [`Seeded::held`] instead of writing them.
    pub async fn seed(&self, scope: &PoolScope, cidr: &str) -> Result<Seeded, PluginError> {
        let net = cidr::parse_network(cidr)?;
        let len = cidr::range_length(&net);
        if len < scope.min_addresses() {
            return Err(CidrError::TooSmall {
                cidr: cidr.to_string(),
                len,
                min: scope.min_addresses(),
            }
            .into());
        }

        let marker_key = scope.marker(&self.keys);
        let previous = match self.store.get(&marker_key).await {
            Ok(node) => Some(node.value().to_string()),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        // the marker goes first so readers never see entries without their block
        self.store.create_or_update(&marker_key, &net.to_string()).await?;

        let broadcast = (len > 4).then(|| net.broadcast());
        let mut candidates = CidrRange::from_net(net)
            .skip(2)
            .filter(|addr| Some(*addr) != broadcast)
            .filter(|addr| !(matches!(scope, PoolScope::Tenant(_)) && is_gateway_octet(*addr)));

        let held: Vec<Ipv4Net> = match scope {
            PoolScope::Tenant(_) => Vec::new(),
            PoolScope::RouterUplink => candidates.by_ref().take(2).map(|addr| cidr::with_prefix(addr, &net)).collect(),
        };

        let mut seeded = Seeded {
            scope: scope.clone(),
            previous,
            entries: Vec::new(),
            held,
        };
        for addr in candidates {
            let value = cidr::with_prefix(addr, &net).to_string();
            if let Err(e) = self.store.set(&scope.entry(&self.keys, addr), &value).await {
                if let Err(revert) = self.unseed(&seeded).await {
                    warn!("Failed to revert partial seed of {} pool: {}", scope, revert);
                }
                return Err(e.into());
            }
            seeded.entries.push(addr);
        }

        info!("Seeded {} pool from {} with {} addresses", scope, net, seeded.entries.len());
        Ok(seeded)
    }

    /// Undo a seed: drop its entries and put the previous marker back.
    pub async fn unseed(&self, seeded: &Seeded) -> Result<(), PluginError> {
        for addr in &seeded.entries {
            store::remove(self.store.as_ref(), &seeded.scope.entry(&self.keys, *addr)).await?;
        }
        let marker_key = seeded.scope.marker(&self.keys);
        match &seeded.previous {
            Some(previous) => {
                self.store.set(&marker_key, previous).await?;
            }
            None => store::remove(self.store.as_ref(), &marker_key).await?,
        }
        debug!("Reverted seed of {} pool", seeded.scope);
        Ok(())
    }

    async fn snapshot(&self, scope: &PoolScope) -> Result<Option<Snapshot>, PluginError> {
        let dir = scope.dir(&self.keys);
        let nodes = match self.store.list(&dir).await {
            Ok(nodes) => nodes,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some(marker_node) = nodes.iter().find(|node| !node.dir && node.name() == MARKER) else {
            return Ok(None);
        };
        let marker = cidr::parse_network(marker_node.value())
            .map_err(|e| PluginError::decode(&marker_node.key, e))?;

        let mut current: Vec<(Ipv4Addr, Node)> = nodes
            .into_iter()
            .filter(|node| !node.dir && node.name() != MARKER)
            .filter_map(|node| match parse_entry(&node.key, node.value()) {
                Ok(entry) if entry.trunc() == marker => Some((entry.addr(), node)),
                Ok(_) => None,
                Err(e) => {
                    warn!("Skipping pool entry: {}", e);
                    None
                }
            })
            .collect();
        current.sort_by_key(|(addr, _)| *addr);

        Ok(Some(Snapshot {
            marker,
            current: current.into_iter().map(|(_, node)| node).collect(),
        }))
    }

    /// Entries of the current block left in `scope`.
    pub async fn available(&self, scope: &PoolScope) -> Result<usize, PluginError> {
        Ok(self.snapshot(scope).await?.map_or(0, |snapshot| snapshot.current.len()))
    }

    /// Block currently seeding `scope`.
    pub async fn current_range(&self, scope: &PoolScope) -> Result<Option<Ipv4Net>, PluginError> {
        Ok(self.snapshot(scope).await?.map(|snapshot| snapshot.marker))
    }

    /// Lease an address for `container` from the tenant pool.
    ///
    /// Leasing twice for the same container returns the same address.
    pub async fn lease(&self, tenant: &str, container: &str) -> Result<Lease, PluginError> {
        let lease_key = self.keys.lease(tenant, container);
        if let Some(existing) = store::read::<LeaseRecord>(self.store.as_ref(), &lease_key).await? {
            debug!("Container {} already holds {}", container, existing.address);
            return Ok(Lease::Leased(existing));
        }

        let scope = PoolScope::Tenant(tenant.to_string());
        let snapshot = self
            .snapshot(&scope)
            .await?
            .ok_or_else(|| PluginError::PoolUninitialized(scope.to_string()))?;
        if snapshot.current.len() < MIN_ENTRIES {
            info!("Pool of {} is down to {} entries", scope, snapshot.current.len());
            return Ok(Lease::Exhausted);
        }

        for node in snapshot.current {
            match self.store.delete(&node.key).await {
                Ok(_) => {}
                // a concurrent lease took it
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
            let address = parse_entry(&node.key, node.value())?;
            if is_gateway_octet(address.addr()) {
                warn!("Dropped gateway address {} from {}", address, scope);
                continue;
            }

            let record = LeaseRecord::new(container, address);
            if let Err(e) = store::write(self.store.as_ref(), &lease_key, &record).await {
                if let Err(put_back) = self.store.set(&node.key, node.value()).await {
                    warn!("Failed to return {} to {}: {}", address, scope, put_back);
                }
                return Err(e);
            }
            info!("Leased {} to container {} (gateway {})", address, container, record.gateway);
            return Ok(Lease::Leased(record));
        }

        Ok(Lease::Exhausted)
    }

    /// Take an uplink address pair, seeding the uplink pool when needed.
    pub async fn lease_uplink_pair(&self) -> Result<UplinkPair, PluginError> {
        let lock = self.keys.router_ip_lock();
        store::with_lock(&self.store, &lock, SHORT_LOCK_TTL, self.take_uplink_pair()).await
    }

    async fn take_uplink_pair(&self) -> Result<UplinkPair, PluginError> {
        let scope = PoolScope::RouterUplink;
        let snapshot = match self.snapshot(&scope).await? {
            Some(snapshot) => snapshot,
            None => {
                info!("Initializing uplink pool from {}", self.router_cidr);
                let seeded = self.seed(&scope, &self.router_cidr).await?;
                return pair_from(&scope, &seeded.held);
            }
        };

        if snapshot.current.len() < MIN_ENTRIES {
            let next = cidr::next_cidr(&snapshot.marker.to_string())?;
            info!("Uplink pool {} exhausted, moving to {}", snapshot.marker, next);
            let seeded = self.seed(&scope, &next).await?;
            return pair_from(&scope, &seeded.held);
        }

        let mut taken: Vec<Node> = Vec::new();
        for node in snapshot.current {
            match self.store.delete(&node.key).await {
                Ok(_) => taken.push(node),
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => {
                    self.put_back(&taken).await;
                    return Err(e.into());
                }
            }
            if taken.len() == 2 {
                break;
            }
        }

        let held: Result<Vec<Ipv4Net>, PluginError> =
            taken.iter().map(|node| parse_entry(&node.key, node.value())).collect();
        match held {
            Ok(held) if held.len() == 2 => pair_from(&scope, &held),
            Ok(held) => {
                self.put_back(&taken).await;
                Err(PluginError::ShortRead {
                    scope: scope.to_string(),
                    wanted: 2,
                    got: held.len(),
                })
            }
            Err(e) => {
                self.put_back(&taken).await;
                Err(e)
            }
        }
    }

    async fn put_back(&self, nodes: &[Node]) {
        for node in nodes {
            if let Err(e) = self.store.set(&node.key, node.value()).await {
                warn!("Failed to return {} to its pool: {}", node.key, e);
            }
        }
    }

    /// Return `address` to `scope`.
    ///
    /// Addresses from a block other than the current one are dropped. Returns whether
    /// the address went back into the pool.
    pub async fn release(&self, scope: &PoolScope, address: Ipv4Net) -> Result<bool, PluginError> {
        let released = self.release_all(scope, &[address]).await?;
        Ok(released == 1)
    }

    /// Return both uplink addresses under a single lock acquisition.
    pub async fn release_uplink_pair(&self, pair: &UplinkPair) -> Result<usize, PluginError> {
        self.release_all(&PoolScope::RouterUplink, &[pair.remote, pair.local]).await
    }

    async fn release_all(&self, scope: &PoolScope, addresses: &[Ipv4Net]) -> Result<usize, PluginError> {
        let marker_key = scope.marker(&self.keys);
        let marker = match self.store.get(&marker_key).await {
            Ok(node) => cidr::parse_network(node.value()).map_err(|e| PluginError::decode(&marker_key, e))?,
            Err(StoreError::NotFound(_)) => {
                info!("Pool of {} has no range, dropping {} addresses", scope, addresses.len());
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let returning: Vec<Ipv4Net> = addresses
            .iter()
            .copied()
            .filter(|address| {
                let current = address.trunc() == marker;
                if !current {
                    info!("{} is outside the current range {} of {}, dropping it", address, marker, scope);
                }
                current
            })
            .collect();
        if returning.is_empty() {
            return Ok(0);
        }

        let lock = scope.lock_key(&self.keys);
        store::with_lock(&self.store, &lock, SHORT_LOCK_TTL, async {
            for address in &returning {
                self.store
                    .set(&scope.entry(&self.keys, address.addr()), &address.to_string())
                    .await?;
                debug!("Released {} to {}", address, scope);
            }
            Ok::<usize, PluginError>(returning.len())
        })
        .await
    }
}

/// Tenant gateways end in `.254`; such addresses never go to pods.
fn is_gateway_octet(addr: Ipv4Addr) -> bool {
    addr.octets()[3] == 254
}

/// First address is the provider-side (remote) end, second the tenant-side (local).
fn pair_from(scope: &PoolScope, held: &[Ipv4Net]) -> Result<UplinkPair, PluginError> {
    match held {
        [remote, local, ..] => Ok(UplinkPair {
            local: *local,
            remote: *remote,
        }),
        _ => Err(PluginError::ShortRead {
            scope: scope.to_string(),
            wanted: 2,
            got: held.len(),
        }),
    }
}

#[cfg(test)]
mod ipam_test;
