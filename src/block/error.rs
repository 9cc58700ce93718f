//! Error types emitted by the block layer.
//!
//! Protocol-level failures are never surfaced as errors here; the engine
//! answers them with synthesized responses (see
//! [`engine`](crate::block::engine)). Only construction-time validation is
//! fallible.

use thiserror::Error;

/// Rejected block-size values.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum BlockSizeError {
    /// The value is not on the power-of-two block lattice.
    #[error("invalid block size {value}: must be a power of two in 16..=1024")]
    Invalid { value: usize },
}
