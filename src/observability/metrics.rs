//! Counters for the revision core
//!
//! - Counters only, monotonic
//! - Relaxed atomics; readers take a [`MetricsSnapshot`]

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters shared by every connection on a data file
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    revisions_inserted: AtomicU64,
    conflicts_detected: AtomicU64,
    conflicts_resolved: AtomicU64,
    revisions_purged: AtomicU64,
    revisions_pruned: AtomicU64,
    documents_saved: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    changes_delivered: AtomicU64,
    external_changes_received: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_revisions_inserted(&self) {
        self.revisions_inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_conflicts_detected(&self) {
        self.conflicts_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_conflicts_resolved(&self) {
        self.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_revisions_purged(&self, count: u64) {
        self.revisions_purged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_revisions_pruned(&self, count: u64) {
        self.revisions_pruned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_documents_saved(&self) {
        self.documents_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_transactions_committed(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_transactions_aborted(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_changes_delivered(&self, count: u64) {
        self.changes_delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_external_changes_received(&self, count: u64) {
        self.external_changes_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            revisions_inserted: self.revisions_inserted.load(Ordering::Relaxed),
            conflicts_detected: self.conflicts_detected.load(Ordering::Relaxed),
            conflicts_resolved: self.conflicts_resolved.load(Ordering::Relaxed),
            revisions_purged: self.revisions_purged.load(Ordering::Relaxed),
            revisions_pruned: self.revisions_pruned.load(Ordering::Relaxed),
            documents_saved: self.documents_saved.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            changes_delivered: self.changes_delivered.load(Ordering::Relaxed),
            external_changes_received: self.external_changes_received.load(Ordering::Relaxed),
        }
    }

    /// Current values as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub revisions_inserted: u64,
    pub conflicts_detected: u64,
    pub conflicts_resolved: u64,
    pub revisions_purged: u64,
    pub revisions_pruned: u64,
    pub documents_saved: u64,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
    pub changes_delivered: u64,
    pub external_changes_received: u64,
}
