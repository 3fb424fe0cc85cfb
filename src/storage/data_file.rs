//! Shared data file
//!
//! - One key store and one exclusive transaction lock for all connections
//! - Weak registry of each connection's tracker for external changes
//! - The local peer identity, resolved once per file

use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use super::errors::StorageError;
use super::key_store::KeyStore;
use super::memory::MemoryKeyStore;
use super::transaction::Transaction;
use crate::errors::RevResult;
use crate::observability::{log_event, Event, MetricsRegistry};
use crate::revid::SourceId;
use crate::sequence::{Change, SharedTracker};

/// One physical file, shared by every connection that opens it.
///
/// Only one transaction may be open at a time. Each connection registers its
/// tracker so committed changes can be forwarded to the others. The local
/// peer's `SourceId` belongs to the file, so every connection expands `*` to
/// the same peer.
pub struct DataFile {
    store: Arc<dyn KeyStore>,
    transaction_lock: Mutex<()>,
    trackers: Mutex<Vec<Weak<SharedTracker>>>,
    metrics: Arc<MetricsRegistry>,
    local_source: RwLock<Option<SourceId>>,
}

impl DataFile {
    pub fn new(store: Arc<dyn KeyStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            transaction_lock: Mutex::new(()),
            trackers: Mutex::new(Vec::new()),
            metrics: Arc::new(MetricsRegistry::new()),
            local_source: RwLock::new(None),
        })
    }

    pub fn in_memory() -> Arc<Self> {
        Self::new(Arc::new(MemoryKeyStore::new()))
    }

    #[inline]
    pub fn store(&self) -> &dyn KeyStore {
        self.store.as_ref()
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// The local peer's ID, if any connection has resolved it
    pub fn local_source(&self) -> Option<SourceId> {
        *self.local_source.read().unwrap_or_else(|p| p.into_inner())
    }

    /// The local peer's ID, generated on first use and shared by every
    /// connection to this file
    pub fn resolve_local_source(&self) -> SourceId {
        let mut slot = self.local_source.write().unwrap_or_else(|p| p.into_inner());
        if let Some(id) = *slot {
            return id;
        }
        let id = SourceId::generate();
        *slot = Some(id);
        log_event(Event::LocalIdentityResolved, &[("source_id", &id.to_ascii())]);
        id
    }

    /// Register a connection's tracker for external-change delivery
    pub fn register_tracker(&self, tracker: &Arc<SharedTracker>) {
        let mut trackers = self.trackers.lock().unwrap_or_else(|p| p.into_inner());
        trackers.retain(|t| t.strong_count() > 0);
        trackers.push(Arc::downgrade(tracker));
    }

    /// Open the file's exclusive transaction on behalf of `tracker`'s
    /// connection. Blocks while another connection has one open; fails with
    /// `TRANSACTION_OPEN` if this connection already has one.
    pub fn begin_transaction(&self, tracker: Arc<SharedTracker>) -> RevResult<Transaction<'_>> {
        if tracker.use_locked(|t| t.in_transaction()) {
            return Err(StorageError::transaction_open().into());
        }
        Transaction::begin(self, tracker)
    }

    pub(crate) fn lock_transactions(&self) -> MutexGuard<'_, ()> {
        self.transaction_lock
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    /// Hand committed changes to every other live tracker. Must be called
    /// after the transaction lock is released.
    pub(crate) fn notify_committed(&self, source: &Arc<SharedTracker>, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }
        let others: Vec<Arc<SharedTracker>> = {
            let trackers = self.trackers.lock().unwrap_or_else(|p| p.into_inner());
            trackers
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|t| !Arc::ptr_eq(t, source))
                .collect()
        };
        for tracker in others {
            tracker.use_locked(|t| t.add_external_transaction(changes));
        }
    }
}
