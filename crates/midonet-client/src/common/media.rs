//! Vendor media types
//!
//! MidoNet versions its DTOs through the `Content-Type` header. API v1 and v5 differ
//! for routers, bridges and ports; every other type is shared.

/// Kind of object carried by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Router,
    Bridge,
    Port,
    PortLink,
    Chain,
    Rule,
    Route,
    Binding,
}

impl MediaKind {
    /// Media type for this kind under API `version`. Anything but 1 uses the v5 map.
    pub fn media_type(self, version: u32) -> &'static str {
        match (self, version) {
            (Self::Router, 1) => "application/vnd.org.midonet.Router-v2+json",
            (Self::Router, _) => "application/vnd.org.midonet.Router-v3+json",
            (Self::Bridge, 1) => "application/vnd.org.midonet.Bridge-v1+json",
            (Self::Bridge, _) => "application/vnd.org.midonet.Bridge-v4+json",
            (Self::Port, 1) => "application/vnd.org.midonet.Port-v2+json",
            (Self::Port, _) => "application/vnd.org.midonet.Port-v3+json",
            (Self::PortLink, _) => "application/vnd.org.midonet.PortLink-v1+json",
            (Self::Chain, _) => "application/vnd.org.midonet.Chain-v1+json",
            (Self::Rule, _) => "application/vnd.org.midonet.Rule-v2+json",
            (Self::Route, _) => "application/vnd.org.midonet.Route-v1+json",
            (Self::Binding, _) => "application/vnd.org.midonet.HostInterfacePort-v1+json",
        }
    }
}
