//! MidoNet REST API Client
//!
//! A Rust client library for the MidoNet virtual topology API and the Keystone
//! tenant endpoints it depends on. Provides type-safe models for routers, bridges,
//! chains, rules, routes, ports, links and host bindings.
//!
//! # Example
//!
//! ```no_run
//! use midonet_client::{Bridge, MidonetApiConf, MidonetClient, MidonetClientTrait};
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conf = MidonetApiConf {
//!     url: "http://midonet-api:8080/midonet-api".to_string(),
//!     user_name: "admin".to_string(),
//!     password: "secret".to_string(),
//!     project_id: "admin".to_string(),
//!     ..Default::default()
//! };
//! let client = MidonetClient::new(&conf)?;
//!
//! let bridge = Bridge {
//!     id: Uuid::new_v4(),
//!     name: "default bridge0".to_string(),
//!     tenant_id: "default".to_string(),
//!     inbound_filter_id: None,
//!     outbound_filter_id: None,
//! };
//! client.create_bridge(&bridge).await?;
//! let bridges = client.list_bridges("default").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod config;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod midonet_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::MidonetClient;
pub use common::{HttpClient, MediaKind};
pub use config::{KeystoneConf, MidonetApiConf};
pub use error::MidonetError;
pub use models::*;
pub use midonet_trait::MidonetClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockMidonetClient;
