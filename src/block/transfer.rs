//! Reassembly/fragmentation session for one logical payload.
//!
//! `TransferState` is one entry in the session tables: an ordered fragment
//! sequence indexed by block number, a cursor driving outbound block
//! sequencing, and idle-timeout bookkeeping. Every fragment or cursor
//! access refreshes the last-access timestamp — any read counts as "still
//! in use" — and the store sweep reaps entries whose idle gap exceeds their
//! timeout. Time-sensitive operations offer explicit-clock `_at` variants
//! so tests stay deterministic.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use super::{
    fragment::PayloadFragment,
    options::{BlockOptions, BlockSize},
};
use crate::message::ContentFormat;

/// Session state for one partially transferred payload.
#[derive(Clone, Debug)]
pub struct TransferState {
    cursor: BlockOptions,
    content_format: Option<ContentFormat>,
    total_size: usize,
    fragments: Vec<PayloadFragment>,
    created_at: Instant,
    last_access: Instant,
    timeout: Option<Duration>,
}

impl TransferState {
    /// Create a session, slicing `payload` at the cursor's block size when
    /// present.
    #[must_use]
    pub fn new(
        cursor: BlockOptions,
        payload: Option<Bytes>,
        content_format: Option<ContentFormat>,
        timeout: Option<Duration>,
    ) -> Self {
        Self::new_at(cursor, payload, content_format, timeout, Instant::now())
    }

    /// Create a session with an explicit clock reading.
    #[must_use]
    pub fn new_at(
        cursor: BlockOptions,
        payload: Option<Bytes>,
        content_format: Option<ContentFormat>,
        timeout: Option<Duration>,
        now: Instant,
    ) -> Self {
        let mut state = Self {
            cursor,
            content_format,
            total_size: payload.as_ref().map_or(0, Bytes::len),
            fragments: Vec::new(),
            created_at: now,
            last_access: now,
            timeout,
        };
        if state.total_size > 0 {
            state.refill(payload.as_ref());
        }
        state
    }

    /// Re-slice the fragment sequence from `payload` at the cursor's block
    /// size. `None` bytes beyond the received prefix become placeholders.
    /// Acknowledgement flags are reset.
    fn refill(&mut self, payload: Option<&Bytes>) {
        let size = self.cursor.size.get();
        let count = self.total_size.div_ceil(size);
        self.fragments = Vec::with_capacity(count);
        for num in 0..count {
            let start = num * size;
            let end = usize::min(start + size, self.total_size);
            let part = payload
                .filter(|bytes| start < bytes.len())
                .map(|bytes| bytes.slice(start..usize::min(end, bytes.len())));
            let options = BlockOptions::new(block_num(num), num + 1 < count, self.cursor.size);
            self.fragments.push(PayloadFragment::new(part, self.content_format, options));
        }
    }

    /// Indexed fragment access; refreshes the last-access timestamp.
    pub fn fragment(&mut self, index: usize) -> Option<&PayloadFragment> {
        self.fragment_at(index, Instant::now())
    }

    /// Indexed fragment access with an explicit clock reading.
    pub fn fragment_at(&mut self, index: usize, now: Instant) -> Option<&PayloadFragment> {
        self.last_access = now;
        self.fragments.get(index)
    }

    /// Write `fragment` at `index`, growing the sequence with placeholders
    /// when the index lies beyond the known fragment count.
    ///
    /// Growth keeps out-of-order first deliveries safe when no total size
    /// was declared; writes are idempotent by index.
    pub fn set_fragment(&mut self, index: usize, fragment: PayloadFragment) {
        self.set_fragment_at(index, fragment, Instant::now());
    }

    /// Write a fragment with an explicit clock reading.
    pub fn set_fragment_at(&mut self, index: usize, fragment: PayloadFragment, now: Instant) {
        self.last_access = now;
        while self.fragments.len() <= index {
            let options = BlockOptions::new(block_num(self.fragments.len()), true, self.cursor.size);
            self.fragments.push(PayloadFragment::placeholder(options));
        }
        self.fragments[index] = fragment;
    }

    /// Mark the fragment at `index` as confirmed by the peer.
    ///
    /// Out-of-range indices are ignored; the peer confirmed a block this
    /// side never produced and the next cursor advance resolves it.
    pub fn acknowledge(&mut self, index: usize) {
        self.last_access = Instant::now();
        if let Some(fragment) = self.fragments.get_mut(index) {
            fragment.set_acked(true);
        }
    }

    /// Current block-option cursor.
    #[must_use]
    pub const fn cursor(&self) -> BlockOptions { self.cursor }

    /// Move the cursor. A changed block size renegotiates the transfer:
    /// the already-assembled payload is re-sliced at the new size,
    /// preserving received bytes at their offsets.
    pub fn set_cursor(&mut self, cursor: BlockOptions) {
        self.set_cursor_at(cursor, Instant::now());
    }

    /// Move the cursor with an explicit clock reading.
    pub fn set_cursor_at(&mut self, cursor: BlockOptions, now: Instant) {
        self.last_access = now;
        if cursor.size != self.cursor.size {
            let payload = self.assembled_payload();
            self.cursor.size = cursor.size;
            self.refill(payload.as_ref());
        }
        self.cursor.num = cursor.num;
        self.cursor.more = cursor.more;
    }

    /// Declared total payload size, zero until known.
    #[must_use]
    pub const fn total_size(&self) -> usize { self.total_size }

    /// Declare the logical payload size before its bytes arrive, producing
    /// the matching number of empty placeholder fragments.
    pub fn set_total_size(&mut self, total: usize) {
        self.last_access = Instant::now();
        self.total_size = total;
        self.refill(None);
    }

    /// Negotiated block size for this transfer.
    #[must_use]
    pub const fn block_size(&self) -> BlockSize { self.cursor.size }

    /// Content format recorded for the transfer.
    #[must_use]
    pub const fn content_format(&self) -> Option<ContentFormat> { self.content_format }

    /// Number of fragments currently tracked.
    #[must_use]
    pub fn fragment_count(&self) -> usize { self.fragments.len() }

    /// Concatenation of every received fragment in index order, `None`
    /// until any bytes have arrived.
    #[must_use]
    pub fn assembled_payload(&self) -> Option<Bytes> {
        let mut buffer = BytesMut::new();
        for fragment in &self.fragments {
            buffer.extend_from_slice(fragment.render());
        }
        if buffer.is_empty() {
            None
        } else {
            Some(buffer.freeze())
        }
    }

    /// Whether every fragment has been acknowledged.
    ///
    /// An empty sequence means the total size is still unknown and counts
    /// as incomplete. A trailing `more` flag likewise proves further blocks
    /// exist even when every stored fragment is confirmed.
    #[must_use]
    pub fn complete(&self) -> bool {
        let Some(last) = self.fragments.last() else {
            return false;
        };
        !last.options().more && self.fragments.iter().all(|f| f.acked() == Some(true))
    }

    /// Advance the cursor cyclically to the next unacknowledged fragment
    /// and return the resulting triple, with `more` taken from that
    /// fragment's own flag. Used by the sending side to pick the next block
    /// to (re)transmit.
    ///
    /// When every stored fragment is confirmed but the trailing `more` flag
    /// proves further blocks exist (no total size was declared), the cursor
    /// advances past the end to name the first unseen block.
    pub fn next_block_options(&mut self) -> BlockOptions {
        self.last_access = Instant::now();
        if self.fragments.is_empty() {
            return self.cursor;
        }
        let count = self.fragments.len();
        let mut index = self.cursor.index() % count;
        if !self.complete() {
            let mut remaining = count;
            while remaining > 0 && self.fragments[index].acked() == Some(true) {
                index = (index + 1) % count;
                remaining -= 1;
            }
            if remaining == 0 {
                self.cursor.num = block_num(count);
                self.cursor.more = true;
                return self.cursor;
            }
        }
        self.cursor.num = block_num(index);
        self.cursor.more = self.fragments[index].options().more;
        self.cursor
    }

    /// Elapsed time between creation and the most recent access.
    #[must_use]
    pub fn duration(&self) -> Duration { self.last_access.duration_since(self.created_at) }

    /// Whether the idle gap since the last access strictly exceeds the
    /// configured timeout.
    #[must_use]
    pub fn expired(&self) -> bool { self.expired_at(Instant::now()) }

    /// Expiry check with an explicit clock reading.
    #[must_use]
    pub fn expired_at(&self, now: Instant) -> bool {
        self.timeout
            .is_some_and(|timeout| now.saturating_duration_since(self.last_access) > timeout)
    }
}

/// Block numbers are bounded by payload length over the minimum block size,
/// far below `u32::MAX`; saturate rather than wrap if that ever changes.
fn block_num(index: usize) -> u32 { u32::try_from(index).unwrap_or(u32::MAX) }
