//! Session tables mapping in-flight exchanges to transfer state.
//!
//! Four independent tables, one per protocol direction. The three
//! sent/request tables are [`DashMap`]s: map-level consistency without a
//! whole-table lock, but callers must still serialise multi-step entry
//! sequences for the same exchange key. The inbound-response table is
//! different: it is subject to the early-negotiation race, where a GET
//! block request arrives while the response body for the same exchange is
//! still being produced. Its whole read-check-create-or-update sequence
//! runs under a single mutex, and a paired [`Notify`] wakes waiters once a
//! producer publishes the body (replacing the reference behaviour's timed
//! polling). Entries are exclusively owned by their table; nothing outside
//! a single call retains a reference.

use std::{collections::HashMap, time::Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use super::{key::ExchangeKey, transfer::TransferState};

/// Per-direction session tables with expiry sweeping.
#[derive(Debug, Default)]
pub struct SessionStore {
    /// Outbound request blocks, sent by this side (client, Block1).
    pub(crate) block1_sent: DashMap<ExchangeKey, TransferState>,
    /// Inbound response blocks collected by this side (client, Block2).
    pub(crate) block2_sent: DashMap<ExchangeKey, TransferState>,
    /// Inbound request blocks collected by this side (server, Block1).
    pub(crate) block1_received: DashMap<ExchangeKey, TransferState>,
    /// Outbound response blocks staged by this side (server, Block2).
    pub(crate) block2_received: Mutex<HashMap<ExchangeKey, TransferState>>,
    /// Wakes request handlers waiting for a staged body's total size.
    pub(crate) size_announced: Notify,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Remove expired sessions from all four tables.
    ///
    /// Called at the start of every engine entry point; there is no
    /// background timer, so an abandoned transfer persists until the next
    /// call sweeps it.
    pub async fn sweep_expired(&self) { self.sweep_expired_at(Instant::now()).await }

    /// Expiry sweep with an explicit clock reading.
    pub async fn sweep_expired_at(&self, now: Instant) {
        let mut evicted = 0_usize;
        for table in [&self.block1_sent, &self.block2_sent, &self.block1_received] {
            table.retain(|_, state| {
                let expired = state.expired_at(now);
                evicted += usize::from(expired);
                !expired
            });
        }
        let mut staged = self.block2_received.lock().await;
        staged.retain(|_, state| {
            let expired = state.expired_at(now);
            evicted += usize::from(expired);
            !expired
        });
        drop(staged);
        if evicted > 0 {
            debug!(evicted, "swept expired block sessions");
        }
    }

    /// Number of sessions across all four tables.
    #[must_use]
    pub async fn session_count(&self) -> usize {
        self.block1_sent.len()
            + self.block2_sent.len()
            + self.block1_received.len()
            + self.block2_received.lock().await.len()
    }
}
