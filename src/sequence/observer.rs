//! Observer handles
//!
//! Each handle owns its registration in the tracker and removes it on drop.

use std::sync::Arc;

use super::change::Change;
use super::lock::AccessLock;
use super::tracker::{ChangeCallback, DocChangeCallback, DocObserverId, ObserverId, SequenceTracker};
use crate::storage::Sequence;

/// A connection's tracker, shared with its transactions and observers
pub type SharedTracker = AccessLock<SequenceTracker>;

/// Collection-level observer. Its placeholder is removed on drop.
pub struct CollectionObserver {
    tracker: Arc<SharedTracker>,
    id: ObserverId,
}

impl CollectionObserver {
    /// Observe changes after `since` (or after everything committed so far).
    ///
    /// `callback` runs with the tracker locked and must not call back into it.
    pub fn new(tracker: Arc<SharedTracker>, since: Option<Sequence>, callback: Option<ChangeCallback>) -> Self {
        let id = tracker.use_locked(|t| t.add_observer(since, callback));
        Self { tracker, id }
    }

    #[inline]
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Up to `max` changes, and whether they came from another connection
    pub fn read_changes(&self, max: usize) -> (Vec<Change>, bool) {
        self.tracker.use_locked(|t| t.read_changes(self.id, max))
    }

    pub fn has_changes(&self) -> bool {
        self.tracker.use_locked(|t| t.has_changes_after(self.id))
    }

    pub fn catch_up(&self) {
        self.tracker.use_locked(|t| t.catch_up(self.id))
    }
}

impl Drop for CollectionObserver {
    fn drop(&mut self) {
        let id = self.id;
        self.tracker.use_locked(|t| t.remove_observer(id));
    }
}

/// Subscription to a single document. Removed on drop.
pub struct DocumentObserver {
    tracker: Arc<SharedTracker>,
    doc_id: String,
    id: DocObserverId,
}

impl DocumentObserver {
    /// `callback` runs with the tracker locked and must not call back into it.
    pub fn new(tracker: Arc<SharedTracker>, doc_id: &str, callback: DocChangeCallback) -> Self {
        let id = tracker.use_locked(|t| t.add_doc_observer(doc_id, callback));
        Self {
            tracker,
            doc_id: doc_id.to_string(),
            id,
        }
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }
}

impl Drop for DocumentObserver {
    fn drop(&mut self) {
        let id = self.id;
        let doc_id = &self.doc_id;
        self.tracker.use_locked(|t| t.remove_doc_observer(doc_id, id));
    }
}
