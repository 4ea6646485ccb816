//! IPv4 CIDR arithmetic
//!
//! Pools are seeded from whole blocks, so every CIDR handled here must be a network
//! address (`192.168.0.0/24`, never `192.168.0.7/24`).

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Offset of the bridge gateway inside every tenant block.
pub const GATEWAY_OFFSET: u32 = 254;

/// Errors raised while parsing or stepping a CIDR.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CidrError {
    #[error("invalid cidr {cidr}: {reason}")]
    Parse { cidr: String, reason: String },

    #[error("invalid cidr {0}: not a network address")]
    NotNetwork(String),

    #[error("no block follows {0}")]
    Overflow(String),

    #[error("ip range {cidr} has {len} addresses, at least {min} are required")]
    TooSmall { cidr: String, len: u64, min: u64 },
}

/// Parse `cidr` and require it to be the network address of its block.
pub fn parse_network(cidr: &str) -> Result<Ipv4Net, CidrError> {
    let net: Ipv4Net = cidr.trim().parse().map_err(|e: ipnet::AddrParseError| CidrError::Parse {
        cidr: cidr.to_string(),
        reason: e.to_string(),
    })?;
    if net.addr() != net.network() {
        return Err(CidrError::NotNetwork(cidr.to_string()));
    }
    Ok(net)
}

/// Number of addresses in the block, network and broadcast included.
pub fn range_length(net: &Ipv4Net) -> u64 {
    1u64 << (32 - u32::from(net.prefix_len()))
}

/// The block of the same size directly after `cidr`.
///
/// `172.16.0.0/24` gives `172.16.1.0/24`, `192.168.0.0/30` gives `192.168.0.4/30`.
pub fn next_cidr(cidr: &str) -> Result<String, CidrError> {
    let net = parse_network(cidr)?;
    let next = u64::from(u32::from(net.network())) + range_length(&net);
    let base = u32::try_from(next).map_err(|_| CidrError::Overflow(cidr.to_string()))?;
    let next = Ipv4Net::new(Ipv4Addr::from(base), net.prefix_len()).map_err(|e| CidrError::Parse {
        cidr: cidr.to_string(),
        reason: e.to_string(),
    })?;
    Ok(next.to_string())
}

/// Gateway of a tenant block: network base + 254.
pub fn gateway(net: &Ipv4Net) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(net.network()).wrapping_add(GATEWAY_OFFSET))
}

/// `ip/prefix` form used for pool entries and lease records.
pub fn with_prefix(addr: Ipv4Addr, net: &Ipv4Net) -> Ipv4Net {
    // prefix_len comes from a valid net, so this cannot fail
    Ipv4Net::new(addr, net.prefix_len()).unwrap_or(*net)
}

/// Iterator over every address of a block, network address first.
#[derive(Debug, Clone)]
pub struct CidrRange {
    net: Ipv4Net,
    offset: u64,
    len: u64,
}

impl CidrRange {
    pub fn new(cidr: &str) -> Result<Self, CidrError> {
        Ok(Self::from_net(parse_network(cidr)?))
    }

    pub fn from_net(net: Ipv4Net) -> Self {
        Self {
            net,
            offset: 0,
            len: range_length(&net),
        }
    }

    pub fn net(&self) -> Ipv4Net {
        self.net
    }

    /// Addresses left to yield.
    pub fn remaining(&self) -> u64 {
        self.len - self.offset
    }
}

impl Iterator for CidrRange {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        if self.offset >= self.len {
            return None;
        }
        let base = u64::from(u32::from(self.net.network()));
        let addr = u32::try_from(base + self.offset).ok()?;
        self.offset += 1;
        Some(Ipv4Addr::from(addr))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}
