//! # Muxis Sentinel
//!
//! Redis Sentinel support for Rust: discovers the current master and the
//! replicas of a logical master name through a set of sentinels, hands out
//! named and pooled connections to those nodes, and reports every failure
//! through one normalized [`Error`] type.
//!
//! ## Features
//!
//! - `test-utils` - In-process fake sentinels and data nodes ([`testing`])
//!
//! ## Example
//!
//! ```no_run
//! use muxis_sentinel::{SentinelClient, SentinelConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SentinelConfig::builder()
//!         .master("mymaster")
//!         .sentinels("127.0.0.1:26379")
//!         .client_name("my-service")
//!         .build()?;
//!     let client = SentinelClient::new(config);
//!
//!     let mut master = client.master_connection().await?;
//!     master.ping().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub(crate) mod core;
pub mod error;
pub mod normalize;
pub mod proto;
pub mod sentinel;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use crate::core::command::Cmd;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::proto::frame::Frame;
pub use crate::sentinel::{
    ConnectionFactory, ConnectionHandle, LogicalMasterName, RedisServer, Role, SentinelClient,
    SentinelCommands, SentinelConfig, SentinelConfigBuilder, SentinelConnection,
    SentinelEndpoint, SentinelEndpointSet, TopologyResolver,
};
