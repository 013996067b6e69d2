//! RESP encoder and decoder.

mod decoder;
mod encoder;

pub use decoder::{Decoder, MAX_NESTING_DEPTH};
pub use encoder::Encoder;
