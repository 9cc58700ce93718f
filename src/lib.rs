//! Public API for the `blockwise` library.
//!
//! This crate provides the blockwise-transfer layer of a CoAP-style
//! request/response stack: transparent fragmentation of oversized outgoing
//! payloads into bounded-size blocks, reassembly of incoming fragmented
//! payloads, and the per-exchange session state machine that drives the
//! Block1/Block2 option exchange across multiple message round-trips.
//!
//! The layer owns no wire format and no transport. It consumes and rewrites
//! the message objects defined in [`message`], and signals the surrounding
//! pipeline through the transaction's `block_transfer` flag whenever a
//! payload must not yet be delivered upstream.

pub mod block;
pub mod message;

pub use block::{
    BlockConfig,
    BlockEngine,
    BlockOptions,
    BlockSize,
    BlockSizeError,
    ExchangeKey,
    PayloadFragment,
    SessionStore,
    TransferState,
    content_format_error,
    incomplete_response,
};
pub use message::{ContentFormat, Message, MessageType, ResponseCode, Token, Transaction};
