//! Blockwise-transfer session engine.
//!
//! This module collects the domain types of the block layer. Each
//! sub-module focuses on a single concept to keep the code small and easy
//! to audit while still providing a cohesive API at the crate root: the
//! block-option primitives, the per-payload fragment and transfer state,
//! the session store keyed by exchange identity, and the engine exposing
//! the direction-specific entry points.

pub mod config;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod key;
pub mod options;
pub mod store;
pub mod transfer;

pub use config::BlockConfig;
pub use engine::{BlockEngine, content_format_error, incomplete_response};
pub use error::BlockSizeError;
pub use fragment::PayloadFragment;
pub use key::ExchangeKey;
pub use options::{BlockOptions, BlockSize};
pub use store::SessionStore;
pub use transfer::TransferState;
