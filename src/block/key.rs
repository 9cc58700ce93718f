//! Exchange identity used to key the session tables.

use std::net::SocketAddr;

use crate::message::{Message, Token};

/// Identity of one in-flight exchange: peer address plus protocol token.
///
/// A structured composite key rather than a hash of a formatted string, so
/// distinct `(host, port, token)` tuples can never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExchangeKey {
    peer: SocketAddr,
    token: Token,
}

impl ExchangeKey {
    /// Key for the exchange identified by `peer` and `token`.
    #[must_use]
    pub fn new(peer: SocketAddr, token: Token) -> Self { Self { peer, token } }

    /// Peer address of the exchange.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr { self.peer }

    /// Token of the exchange.
    #[must_use]
    pub const fn token(&self) -> &Token { &self.token }

    /// Key for an inbound message, derived from its source address.
    pub(crate) fn from_source(message: &Message) -> Option<Self> {
        message
            .source
            .map(|peer| Self::new(peer, message.token.clone()))
    }

    /// Key for an outbound message, derived from its destination address.
    pub(crate) fn from_destination(message: &Message) -> Option<Self> {
        message
            .destination
            .map(|peer| Self::new(peer, message.token.clone()))
    }
}
