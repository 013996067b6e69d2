//! Core connection handling.
//!
//! ## Modules
//!
//! - [`connection`] - A single RESP connection with per-request timeouts
//! - [`command`] - Command builders and reply conversions

/// Command construction helpers.
pub mod command;
/// Low-level connection management.
pub mod connection;
