//! Sentinel-aware topology resolution and connection management.
//!
//! ## Modules
//!
//! - [`config`] - Client configuration and its builder
//! - [`server`] - The [`RedisServer`] value type
//! - [`resolver`] - Master and replica discovery
//! - [`factory`] - Opening, naming and pooling node connections
//! - [`connection`] - The sentinel connection facade

mod client;
pub mod config;
pub mod connection;
pub mod factory;
mod handle;
mod pool;
pub mod resolver;
pub mod server;

pub use client::SentinelClient;
pub use config::{
    LogicalMasterName, SentinelConfig, SentinelConfigBuilder, SentinelEndpoint,
    SentinelEndpointSet,
};
pub use connection::{SentinelCommands, SentinelConnection};
pub use factory::ConnectionFactory;
pub use handle::ConnectionHandle;
pub use resolver::TopologyResolver;
pub use server::{RedisServer, Role};
