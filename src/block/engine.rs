//! Direction-specific entry points driving the block state machine.
//!
//! [`BlockEngine`] hides the blockwise exchange from both servers and
//! clients: outgoing oversized payloads are sliced into session state and
//! the in-flight message rewritten to carry only the current fragment,
//! while incoming fragments accumulate until a transfer completes and the
//! reassembled payload can propagate upstream. Incomplete transfers are
//! answered within this layer (2.31 Continue, or an error code on
//! mismatch) and flagged with `block_transfer` so the surrounding pipeline
//! holds delivery. Every entry point sweeps expired sessions first.

use std::pin::pin;

use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use super::{
    config::BlockConfig,
    fragment::PayloadFragment,
    key::ExchangeKey,
    options::BlockOptions,
    store::SessionStore,
    transfer::TransferState,
};
use crate::message::{Message, MessageType, ResponseCode, Transaction};

/// Orchestrator for blockwise transfers in all four protocol directions.
#[derive(Debug, Default)]
pub struct BlockEngine {
    config: BlockConfig,
    pub(crate) store: SessionStore,
}

impl BlockEngine {
    /// Create an engine with its own session store.
    #[must_use]
    pub fn new(config: BlockConfig) -> Self {
        Self {
            config,
            store: SessionStore::new(),
        }
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &BlockConfig { &self.config }

    /// Handle block options on an incoming request (server side).
    ///
    /// GET carries Block2, naming the response block the client wants;
    /// PUT and POST carry Block1, a fragment of the request body.
    pub async fn on_incoming_request(&self, mut transaction: Transaction) -> Transaction {
        self.store.sweep_expired().await;
        transaction.block_transfer = false;
        let Some(key) = ExchangeKey::from_source(&transaction.request) else {
            debug!("incoming request without source address; skipping block handling");
            return transaction;
        };

        if let Some(options) = transaction.request.block2.take() {
            self.serve_response_block(transaction, key, options).await
        } else if let Some(options) = transaction.request.block1.take() {
            self.absorb_request_block(transaction, key, options)
        } else {
            transaction
        }
    }

    /// Handle block options on an incoming response (client side).
    ///
    /// Block2 in the response carries a fragment of the response body;
    /// Block1 confirms receipt of a request fragment sent earlier.
    pub async fn on_incoming_response(&self, mut transaction: Transaction) -> Transaction {
        self.store.sweep_expired().await;
        transaction.block_transfer = false;
        let (key, block2, block1) = {
            let Some(response) = transaction.response.as_ref() else {
                return transaction;
            };
            let Some(key) = ExchangeKey::from_source(response) else {
                debug!("incoming response without source address; skipping block handling");
                return transaction;
            };
            (key, response.block2, response.block1)
        };

        if let Some(options) = block2 {
            self.collect_response_block(transaction, key, options)
        } else if let Some(options) = block1 {
            self.confirm_request_block(transaction, &key, options)
        } else {
            transaction
        }
    }

    /// Passthrough for empty messages, preserved so the layer pipeline is
    /// uniform.
    pub async fn on_incoming_empty(&self, _empty: &Message, transaction: Transaction) -> Transaction {
        self.store.sweep_expired().await;
        transaction
    }

    /// Handle block options on an outgoing response (server side).
    ///
    /// Fragments the response body when an earlier block request staged a
    /// session for this exchange or the payload exceeds the single-message
    /// maximum, then wakes any request handler waiting for the body.
    pub async fn on_outgoing_response(&self, mut transaction: Transaction) -> Transaction {
        self.store.sweep_expired().await;
        let Some(key) = ExchangeKey::from_source(&transaction.request) else {
            debug!("outgoing response without request source; skipping block handling");
            return transaction;
        };
        let size2_requested = transaction.request.size2 == Some(0);
        let Some(response) = transaction.response.as_mut() else {
            return transaction;
        };

        let mut staged = self.store.block2_received.lock().await;
        let oversized = response.payload_len() > self.config.max_block_size.get();
        if response.payload.is_none() || (!staged.contains_key(&key) && !oversized) {
            return transaction;
        }

        let cursor = staged
            .get(&key)
            .map_or(BlockOptions::first(self.config.max_block_size), TransferState::cursor);
        let mut state = TransferState::new(
            cursor,
            response.payload.clone(),
            response.content_format,
            Some(self.config.session_timeout),
        );
        if size2_requested || oversized {
            response.size2 = Some(state.total_size());
        }
        if let Some(fragment) = state.fragment(cursor.index()) {
            response.payload = fragment.payload().cloned();
            response.block2 = Some(fragment.options());
        } else {
            warn!(num = cursor.num, "staged response has no block at cursor");
            response.payload = None;
            response.block2 = Some(cursor);
        }
        staged.insert(key, state);
        drop(staged);
        self.store.size_announced.notify_waiters();
        transaction
    }

    /// Handle block options on an outgoing request (client side).
    ///
    /// A request already carrying Block2 asks for a specific response
    /// block; a Block1 request or oversized payload is sliced and the
    /// request rewritten to carry fragment zero.
    pub async fn on_outgoing_request(&self, mut request: Message) -> Message {
        self.store.sweep_expired().await;
        let Some(key) = ExchangeKey::from_destination(&request) else {
            debug!("outgoing request without destination address; skipping block handling");
            return request;
        };

        if let Some(options) = request.block2 {
            // Stage a payload-less session to collect the response blocks.
            self.store.block2_sent.insert(
                key,
                TransferState::new(options, None, None, Some(self.config.session_timeout)),
            );
        } else if request.block1.is_some() || request.payload_len() > self.config.max_block_size.get()
        {
            let size = request
                .block1
                .map_or(self.config.max_block_size, |options| options.size);
            let mut state = TransferState::new(
                BlockOptions::first(size),
                request.payload.clone(),
                request.content_format,
                Some(self.config.session_timeout),
            );
            if let Some(fragment) = state.fragment(0) {
                request.payload = fragment.payload().cloned();
                request.block1 = Some(fragment.options());
            }
            request.size1 = Some(state.total_size());
            self.store.block1_sent.insert(key, state);
        }
        request
    }

    /// Serve a GET block request from the staged response session,
    /// waiting while a concurrent handler is still producing the body.
    async fn serve_response_block(
        &self,
        mut transaction: Transaction,
        key: ExchangeKey,
        options: BlockOptions,
    ) -> Transaction {
        // The first request for this exchange may still be computing the
        // resource representation; wait for `on_outgoing_response` to
        // publish the body before serving. Waiters register interest while
        // holding the table lock so no announcement is lost, then re-check
        // after each wake.
        let mut staged = loop {
            let staged = self.store.block2_received.lock().await;
            let pending = staged.get(&key).is_some_and(|state| state.total_size() == 0);
            if !pending {
                break staged;
            }
            let mut announced = pin!(self.store.size_announced.notified());
            announced.as_mut().enable();
            drop(staged);
            announced.await;
        };

        if let Some(state) = staged.get_mut(&key) {
            state.set_cursor(options);
            transaction.block_transfer = true;
            let mut response = Message::response(key.peer(), transaction.request.token.clone());
            response.code = Some(ResponseCode::Content);
            if let Some(fragment) = state.fragment(options.index()) {
                response.payload = fragment.payload().cloned();
                response.block2 = Some(fragment.options());
                if transaction.request.content_format != fragment.content_format() {
                    response.content_format = fragment.content_format();
                }
            } else {
                warn!(num = options.num, "requested response block out of range");
                response.payload = None;
                response.block2 = Some(options);
            }
            response.size2 = Some(state.total_size());
            transaction.response = Some(response);
        } else {
            // Early negotiation: record the requested block options now;
            // the payload arrives via `on_outgoing_response`.
            debug!(num = options.num, "early negotiation for response blocks");
            staged.insert(
                key,
                TransferState::new(options, None, None, Some(self.config.session_timeout)),
            );
        }
        drop(staged);
        transaction
    }

    /// Accumulate a PUT/POST body fragment into the receive session.
    fn absorb_request_block(
        &self,
        mut transaction: Transaction,
        key: ExchangeKey,
        options: BlockOptions,
    ) -> Transaction {
        let request_format = transaction.request.content_format;
        let mut state = match self.store.block1_received.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                if occupied.get().content_format() != request_format {
                    // The stale session is deliberately left in place; only
                    // completion or expiry removes it.
                    warn!(
                        expected = ?occupied.get().content_format(),
                        received = ?request_format,
                        "content format changed mid-transfer",
                    );
                    drop(occupied);
                    return content_format_error(transaction);
                }
                occupied.into_ref()
            }
            Entry::Vacant(vacant) => vacant.insert(TransferState::new(
                options,
                None,
                request_format,
                Some(self.config.session_timeout),
            )),
        };

        if let Some(size1) = transaction.request.size1 {
            if size1 != state.total_size() {
                state.set_total_size(size1);
            }
        }

        state.set_fragment(
            options.index(),
            PayloadFragment::received(transaction.request.payload.clone(), request_format, options),
        );

        if state.complete() {
            transaction.request.payload = state.assembled_payload();
            transaction.transfer_duration = Some(state.duration());
            drop(state);
            self.store.block1_received.remove(&key);
            debug!("request body reassembly complete");
        } else {
            drop(state);
            transaction.block_transfer = true;
            let mut response = Message::response(key.peer(), transaction.request.token.clone());
            response.code = Some(ResponseCode::Continue);
            response.block1 = Some(options);
            transaction.response = Some(response);
        }
        transaction
    }

    /// Collect a response body fragment into the client-side session and
    /// line up the follow-up request for the next block.
    fn collect_response_block(
        &self,
        mut transaction: Transaction,
        key: ExchangeKey,
        options: BlockOptions,
    ) -> Transaction {
        let (payload, format, size2) = {
            let Some(response) = transaction.response.as_ref() else {
                return transaction;
            };
            (response.payload.clone(), response.content_format, response.size2)
        };

        let mut state = match self.store.block2_sent.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().fragment_count() > 0 {
                    if occupied.get().content_format() != format {
                        warn!(
                            expected = ?occupied.get().content_format(),
                            received = ?format,
                            "content format changed mid-transfer",
                        );
                        drop(occupied);
                        return content_format_error(transaction);
                    }
                } else {
                    // The entry staged at send time was payload-less; start
                    // the real session from the first arriving fragment.
                    occupied.insert(TransferState::new(
                        options,
                        None,
                        format,
                        Some(self.config.session_timeout),
                    ));
                }
                occupied.into_ref()
            }
            Entry::Vacant(vacant) => vacant.insert(TransferState::new(
                options,
                None,
                format,
                Some(self.config.session_timeout),
            )),
        };

        if let Some(size2) = size2 {
            if size2 != state.total_size() {
                state.set_total_size(size2);
            }
        }
        state.set_fragment(
            options.index(),
            PayloadFragment::received(payload, format, options),
        );
        state.set_cursor(options);

        if state.complete() {
            let assembled = state.assembled_payload();
            drop(state);
            self.store.block2_sent.remove(&key);
            if let Some(response) = transaction.response.as_mut() {
                response.payload = assembled;
            }
            debug!("response body reassembly complete");
        } else {
            let next = state.next_block_options();
            drop(state);
            transaction.block_transfer = true;
            transaction.request.mid = None;
            transaction.request.block2 = Some(next);
        }
        transaction
    }

    /// Record the server's confirmation of a sent request fragment and
    /// rewrite the follow-up request to carry the next one.
    fn confirm_request_block(
        &self,
        mut transaction: Transaction,
        key: &ExchangeKey,
        options: BlockOptions,
    ) -> Transaction {
        let Some(mut state) = self.store.block1_sent.get_mut(key) else {
            return transaction;
        };
        state.acknowledge(options.index());

        let next = state.next_block_options();
        transaction.request.mid = None;
        transaction.request.payload = state
            .fragment(next.index())
            .and_then(|fragment| fragment.payload().cloned());
        transaction.request.size1 = Some(state.total_size());
        if state.complete() {
            // No further blocks to send; the sent-side session itself is
            // left for the expiry sweep.
            transaction.request.block1 = None;
        } else {
            transaction.request.block1 = Some(next);
            transaction.block_transfer = true;
        }
        drop(state);
        transaction
    }
}

/// Synthesize a 4.08 Request Entity Incomplete response for `transaction`,
/// replacing any would-be reassembly for the exchange.
///
/// Part of the layer's signalling surface: the surrounding stack raises it
/// when a body is delivered upstream while blocks are still missing.
#[must_use]
pub fn incomplete_response(mut transaction: Transaction) -> Transaction {
    transaction.block_transfer = true;
    let response = Message {
        destination: transaction.request.source,
        token: transaction.request.token.clone(),
        mtype: MessageType::Acknowledgement,
        code: Some(ResponseCode::RequestEntityIncomplete),
        ..Message::default()
    };
    transaction.response = Some(response);
    transaction
}

/// Synthesize a 4.15 Unsupported Content-Format reset for `transaction`,
/// aborting the blockwise exchange at this layer.
#[must_use]
pub fn content_format_error(mut transaction: Transaction) -> Transaction {
    transaction.block_transfer = true;
    let response = Message {
        destination: transaction.request.source,
        token: transaction.request.token.clone(),
        mtype: MessageType::Reset,
        code: Some(ResponseCode::UnsupportedContentFormat),
        ..Message::default()
    };
    transaction.response = Some(response);
    transaction
}
