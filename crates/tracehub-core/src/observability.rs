//! Backplane counters.
//!
//! Workers bump atomics; `BackplaneCounts` is the serializable snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackplaneCounts {
    /// Reports taken from the incoming queue by the relay.
    pub received: u64,
    /// Reports handed to the storage queue.
    pub relayed: u64,
    /// Reports discarded because the storage queue stayed full.
    pub dropped: u64,
    /// Reports the store persisted.
    pub persisted: u64,
    /// Reports the store rejected (dropped after logging).
    pub persist_failures: u64,
}

impl BackplaneCounts {
    /// Reports relayed but not yet processed by the store worker.
    pub fn storage_pending(&self) -> u64 {
        self.relayed
            .saturating_sub(self.persisted)
            .saturating_sub(self.persist_failures)
    }
}

#[derive(Debug, Default)]
pub struct RelayStats {
    received: AtomicU64,
    relayed: AtomicU64,
    dropped: AtomicU64,
}

impl RelayStats {
    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_relayed(&self) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the new total.
    pub(crate) fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn relayed(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct StoreWorkerStats {
    persisted: AtomicU64,
    failed: AtomicU64,
}

impl StoreWorkerStats {
    pub(crate) fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

pub fn snapshot(relay: &RelayStats, store: &StoreWorkerStats) -> BackplaneCounts {
    BackplaneCounts {
        received: relay.received(),
        relayed: relay.relayed(),
        dropped: relay.dropped(),
        persisted: store.persisted(),
        persist_failures: store.failed(),
    }
}
