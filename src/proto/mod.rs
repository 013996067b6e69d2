//! RESP (Redis Serialization Protocol) support.
//!
//! Sentinels and data nodes both speak RESP2, so one codec serves every
//! connection this crate opens.
//!
//! ## Modules
//!
//! - [`codec`] - Encoder and decoder for RESP frames
//! - [`error`] - Low-level wire errors, before normalization
//! - [`frame`] - Frame types representing RESP data structures

pub mod codec;
/// Low-level error types.
pub mod error;
pub mod frame;
