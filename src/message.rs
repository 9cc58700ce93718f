//! Collaborating message model consumed by the block layer.
//!
//! The engine does not define a wire format; it rewrites fields on message
//! objects supplied by the surrounding transport stack. This module holds
//! the minimal contract those objects must satisfy: peer addressing, the
//! exchange token, payload and content format, the Block1/Block2 option
//! triples with their declared-size companions, and the response codes that
//! drive the block state machine.

use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use derive_more::{Display, From, Into};

use crate::block::BlockOptions;

/// Opaque token identifying one request/response exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Token(Bytes);

impl Token {
    /// Wrap raw token bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self { Self(bytes.into()) }

    /// Borrow the token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }
}

/// Content-format identifier carried alongside a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, From, Into)]
#[display("{_0}")]
pub struct ContentFormat(u16);

impl ContentFormat {
    /// Wrap a numeric content-format registry value.
    #[must_use]
    pub const fn new(value: u16) -> Self { Self(value) }

    /// Return the numeric registry value.
    #[must_use]
    pub const fn get(self) -> u16 { self.0 }
}

/// Message types as defined by the protocol layer.
///
/// The block layer only assigns these on synthesized responses; `Reset`
/// signals an aborted exchange on the content-format error path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MessageType {
    #[default]
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

/// Response codes consumed by the block state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    /// 2.05 Content.
    Content,
    /// 2.31 Continue.
    Continue,
    /// 4.08 Request Entity Incomplete.
    RequestEntityIncomplete,
    /// 4.15 Unsupported Content-Format.
    UnsupportedContentFormat,
}

impl ResponseCode {
    /// Numeric code value (`class << 5 | detail`).
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Content => 0x45,
            Self::Continue => 0x5F,
            Self::RequestEntityIncomplete => 0x88,
            Self::UnsupportedContentFormat => 0x8F,
        }
    }
}

/// A single protocol message, request or response.
///
/// Block-related fields are plain optionals; handlers assign the final value
/// directly instead of the delete-then-set dance a mutable shared object
/// would require. Clearing `mid` on a follow-up request tells the transport
/// layer to renumber it.
#[derive(Clone, Debug, Default)]
pub struct Message {
    pub source: Option<SocketAddr>,
    pub destination: Option<SocketAddr>,
    pub token: Token,
    pub mid: Option<u16>,
    pub mtype: MessageType,
    pub code: Option<ResponseCode>,
    pub payload: Option<Bytes>,
    pub content_format: Option<ContentFormat>,
    pub block1: Option<BlockOptions>,
    pub block2: Option<BlockOptions>,
    pub size1: Option<usize>,
    pub size2: Option<usize>,
}

impl Message {
    /// Confirmable request addressed to `destination`.
    #[must_use]
    pub fn request(destination: SocketAddr, token: Token) -> Self {
        Self {
            destination: Some(destination),
            token,
            ..Self::default()
        }
    }

    /// Acknowledgement-type response addressed to `destination`.
    #[must_use]
    pub fn response(destination: SocketAddr, token: Token) -> Self {
        Self {
            destination: Some(destination),
            token,
            mtype: MessageType::Acknowledgement,
            ..Self::default()
        }
    }

    /// Payload length in bytes, zero when absent.
    #[must_use]
    pub fn payload_len(&self) -> usize { self.payload.as_ref().map_or(0, Bytes::len) }
}

/// One request/response round-trip owned by the transaction layer.
///
/// `block_transfer` tells the surrounding pipeline "do not deliver upstream
/// yet, more blocks pending". `transfer_duration` carries the elapsed time
/// of a completed reassembly for instrumentation.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub request: Message,
    pub response: Option<Message>,
    pub block_transfer: bool,
    pub transfer_duration: Option<Duration>,
}

impl Transaction {
    /// Transaction for a request with no response yet.
    #[must_use]
    pub fn new(request: Message) -> Self {
        Self {
            request,
            response: None,
            block_transfer: false,
            transfer_duration: None,
        }
    }

    /// Transaction carrying a received response.
    #[must_use]
    pub fn with_response(request: Message, response: Message) -> Self {
        Self {
            request,
            response: Some(response),
            block_transfer: false,
            transfer_duration: None,
        }
    }
}
