//! Usage tracker
//!
//! Bytes sent since the last plan reset, persisted after every change so
//! the count survives restarts.

use serde::{Deserialize, Serialize};

use crate::constants::USAGE_FILE;
use crate::storage::PersistentStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct UsageDocument {
    bytes_sent: u64,
}

/// Byte counter; lowered only by `reset` or by returning a reservation
#[derive(Debug)]
pub struct UsageTracker {
    store: PersistentStore,
    bytes_sent: u64,
}

impl UsageTracker {
    /// Load from disk; absent or corrupt files start at 0
    pub fn load(store: PersistentStore) -> Self {
        let bytes_sent = store
            .load::<UsageDocument>(USAGE_FILE)
            .map(|doc| doc.bytes_sent)
            .unwrap_or(0);

        log::debug!("Usage tracker loaded: {} bytes sent", bytes_sent);
        Self { store, bytes_sent }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn add(&mut self, bytes: u64) {
        self.bytes_sent = self.bytes_sent.saturating_add(bytes);
        self.persist();
    }

    /// Give back bytes that were counted but never went out
    pub fn release(&mut self, bytes: u64) {
        self.bytes_sent = self.bytes_sent.saturating_sub(bytes);
        self.persist();
    }

    pub fn reset(&mut self) {
        log::info!("Resetting data usage counter ({} bytes sent this cycle)", self.bytes_sent);
        self.bytes_sent = 0;
        self.persist();
    }

    /// Write the counter; failures keep the in-memory value
    pub fn persist(&self) {
        let doc = UsageDocument {
            bytes_sent: self.bytes_sent,
        };
        if let Err(e) = self.store.save(USAGE_FILE, &doc) {
            log::warn!("Could not persist usage tracker: {}", e);
        }
    }
}
