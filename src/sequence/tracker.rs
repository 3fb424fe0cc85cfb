//! Sequence tracker
//!
//! - One entry per document, ordered by sequence, moved to the end when the
//!   document changes again
//! - Collection observers are placeholders in the same list; reading moves
//!   the placeholder past what was returned
//! - Entries from other connections are added as external and delivered in
//!   their own batches
//! - Idle entries beyond `min_changes_to_keep` are trimmed once no observer
//!   needs them
//!
//! # Invariants
//!
//! - Entries of an open transaction are invisible to observers
//! - Aborting restores entries, shadows and `last_sequence` exactly

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::change::Change;
use super::list::{LinkedList, Slot};
use crate::observability::MetricsRegistry;
use crate::storage::{DocumentFlags, Sequence};

/// Identifies a collection observer's placeholder
pub type ObserverId = u64;
/// Identifies a single-document subscription
pub type DocObserverId = u64;

/// Called when changes become readable for a collection observer that had
/// drained everything before
pub type ChangeCallback = Box<dyn Fn() + Send>;
/// Called with `(doc_id, sequence)` whenever a watched document changes
pub type DocChangeCallback = Box<dyn Fn(&str, Sequence) + Send>;

#[derive(Debug)]
enum Entry {
    Change {
        change: Change,
        committed: bool,
        external: bool,
    },
    /// Read position of an observer, or the start of the open transaction (`None`)
    Placeholder(Option<ObserverId>),
}

struct Observer {
    slot: Slot,
    callback: Option<ChangeCallback>,
    /// Callback has fired and the observer has not drained yet
    notified: bool,
}

struct TransactionState {
    marker: Slot,
    /// Committed entries superseded by this transaction, restored on abort
    shadowed: HashMap<String, Slot>,
}

/// Ordered record of document changes for one connection.
///
/// Each document has at most one live entry: a new change for a document
/// moves it to the end. Observers keep a placeholder in the same list and read
/// the committed changes that follow it.
pub struct SequenceTracker {
    list: LinkedList<Entry>,
    by_doc_id: HashMap<String, Slot>,
    observers: BTreeMap<ObserverId, Observer>,
    doc_observers: HashMap<String, Vec<(DocObserverId, DocChangeCallback)>>,
    next_observer_id: u64,
    num_changes: usize,
    min_changes_to_keep: usize,
    last_sequence: Sequence,
    committed_sequence: Sequence,
    transaction: Option<TransactionState>,
    metrics: Arc<MetricsRegistry>,
}

impl SequenceTracker {
    pub fn new(min_changes_to_keep: usize) -> Self {
        Self::with_metrics(min_changes_to_keep, Arc::new(MetricsRegistry::new()))
    }

    pub fn with_metrics(min_changes_to_keep: usize, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            list: LinkedList::default(),
            by_doc_id: HashMap::new(),
            observers: BTreeMap::new(),
            doc_observers: HashMap::new(),
            next_observer_id: 1,
            num_changes: 0,
            min_changes_to_keep,
            last_sequence: 0,
            committed_sequence: 0,
            transaction: None,
            metrics,
        }
    }

    /// Start from the store's current sequence
    pub fn set_last_sequence(&mut self, sequence: Sequence) {
        self.last_sequence = self.last_sequence.max(sequence);
        if self.transaction.is_none() {
            self.committed_sequence = self.last_sequence;
        }
    }

    #[inline]
    pub fn last_sequence(&self) -> Sequence {
        self.last_sequence
    }

    #[inline]
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Number of change entries currently retained
    #[inline]
    pub fn retained_changes(&self) -> usize {
        self.num_changes
    }

    // ==================
    // Transactions
    // ==================

    pub fn begin_transaction(&mut self) {
        if self.transaction.is_some() {
            return;
        }
        let marker = self.list.push_back(Entry::Placeholder(None));
        self.transaction = Some(TransactionState {
            marker,
            shadowed: HashMap::new(),
        });
    }

    /// Close the open transaction. On commit its entries become visible and
    /// are returned, in order, for delivery to other connections. On abort they
    /// are removed and every document entry they replaced is restored.
    pub fn end_transaction(&mut self, commit: bool) -> Vec<Change> {
        let Some(tx) = self.transaction.take() else {
            return Vec::new();
        };
        let pending: Vec<Slot> = self
            .list
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Change { committed: false, .. }))
            .map(|(slot, _)| slot)
            .collect();

        let mut committed = Vec::new();
        if commit {
            for slot in tx.shadowed.into_values() {
                self.remove_entry(slot);
            }
            for slot in pending {
                if let Some(Entry::Change {
                    change, committed: c, ..
                }) = self.list.get_mut(slot)
                {
                    *c = true;
                    committed.push(change.clone());
                }
            }
            self.committed_sequence = self.last_sequence;
        } else {
            let mut shadowed = tx.shadowed;
            for slot in pending {
                let Some(Entry::Change { change, .. }) = self.remove_entry(slot) else {
                    continue;
                };
                let restored = shadowed.remove(&change.doc_id);
                let sequence = match restored {
                    Some(shadow) => {
                        self.by_doc_id.insert(change.doc_id.clone(), shadow);
                        self.sequence_at(shadow)
                    }
                    None => {
                        self.by_doc_id.remove(&change.doc_id);
                        0
                    }
                };
                self.notify_doc_observers(&change.doc_id, sequence);
            }
            self.last_sequence = self.committed_sequence;
        }
        self.list.remove(tx.marker);

        if commit {
            self.notify_observers();
        }
        self.remove_obsolete_entries();
        committed
    }

    // ==================
    // Recording changes
    // ==================

    pub fn document_changed(
        &mut self,
        doc_id: &str,
        rev_id: &str,
        sequence: Sequence,
        body_size: usize,
        flags: DocumentFlags,
    ) {
        self.last_sequence = self.last_sequence.max(sequence);
        let change = Change::new(doc_id, rev_id, sequence, body_size, flags);
        self.record_internal(change);
    }

    /// Record that a document no longer exists at all
    pub fn document_purged(&mut self, doc_id: &str) {
        let change = Change::new(doc_id, "", self.last_sequence, 0, DocumentFlags::PURGED);
        self.record_internal(change);
    }

    fn record_internal(&mut self, change: Change) {
        let doc_id = change.doc_id.clone();
        let sequence = change.sequence;
        if self.transaction.is_some() || !self.observers.is_empty() {
            self.add_entry(change, false);
        }
        if self.transaction.is_none() {
            self.committed_sequence = self.last_sequence;
            self.notify_observers();
            self.remove_obsolete_entries();
        }
        self.notify_doc_observers(&doc_id, sequence);
    }

    /// Merge changes another connection just committed to the same file.
    ///
    /// They are inserted as committed history ahead of any transaction this
    /// tracker has open.
    pub fn add_external_transaction(&mut self, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }
        let record = self.transaction.is_some() || !self.observers.is_empty();
        for change in changes {
            self.last_sequence = self.last_sequence.max(change.sequence);
            self.committed_sequence = self.committed_sequence.max(change.sequence);
            if record {
                self.add_entry(change.clone(), true);
            }
            self.notify_doc_observers(&change.doc_id, change.sequence);
        }
        self.metrics.add_external_changes_received(changes.len() as u64);
        self.notify_observers();
        self.remove_obsolete_entries();
    }

    fn add_entry(&mut self, change: Change, external: bool) {
        let committed = external || self.transaction.is_none();
        let doc_id = change.doc_id.clone();
        let anchor = match (&self.transaction, external) {
            (Some(tx), true) => Some(tx.marker),
            _ => None,
        };
        let slot = self.list.insert_before(
            anchor,
            Entry::Change {
                change,
                committed,
                external,
            },
        );
        self.num_changes += 1;

        let previous = self.by_doc_id.get(&doc_id).copied();
        let previous_committed = previous.map(|s| self.is_committed(s));
        match (previous, previous_committed, self.transaction.as_mut()) {
            (None, _, _) => {
                self.by_doc_id.insert(doc_id, slot);
            }
            (Some(old), Some(true), Some(tx)) if !committed => {
                // Keep the committed entry in place until the transaction ends
                tx.shadowed.insert(doc_id.clone(), old);
                self.by_doc_id.insert(doc_id, slot);
            }
            (Some(_), Some(false), Some(tx)) if committed => {
                // External change under our own uncommitted one: it becomes
                // the entry an abort falls back to
                if let Some(shadow) = tx.shadowed.insert(doc_id, slot) {
                    self.remove_entry(shadow);
                }
            }
            (Some(old), _, _) => {
                self.remove_entry(old);
                self.by_doc_id.insert(doc_id, slot);
            }
        }
    }

    fn remove_entry(&mut self, slot: Slot) -> Option<Entry> {
        let entry = self.list.remove(slot)?;
        if matches!(entry, Entry::Change { .. }) {
            self.num_changes -= 1;
        }
        Some(entry)
    }

    fn is_committed(&self, slot: Slot) -> bool {
        matches!(self.list.get(slot), Some(Entry::Change { committed: true, .. }))
    }

    fn sequence_at(&self, slot: Slot) -> Sequence {
        match self.list.get(slot) {
            Some(Entry::Change { change, .. }) => change.sequence,
            _ => 0,
        }
    }

    /// Drop already-read entries from the front once more than
    /// `min_changes_to_keep` are retained
    fn remove_obsolete_entries(&mut self) {
        if self.transaction.is_some() {
            return;
        }
        while self.num_changes > self.min_changes_to_keep {
            let Some(head) = self.list.head() else {
                break;
            };
            let doc_id = match self.list.get(head) {
                Some(Entry::Change { change, .. }) => change.doc_id.clone(),
                _ => break,
            };
            if self.by_doc_id.get(&doc_id) == Some(&head) {
                self.by_doc_id.remove(&doc_id);
            }
            self.remove_entry(head);
        }
    }

    // ==================
    // Collection observers
    // ==================

    /// Add an observer positioned after every committed change with a sequence
    /// up to `since`, or after everything committed so far if `since` is `None`.
    pub fn add_observer(&mut self, since: Option<Sequence>, callback: Option<ChangeCallback>) -> ObserverId {
        let id = self.next_observer_id;
        self.next_observer_id += 1;

        let end = self.transaction.as_ref().map(|tx| tx.marker);
        let anchor = match since {
            None => end,
            Some(since) => self
                .list
                .iter()
                .take_while(|(slot, _)| Some(*slot) != end)
                .find(|(_, e)| {
                    matches!(e, Entry::Change { change, committed: true, .. } if change.sequence > since)
                })
                .map(|(slot, _)| slot)
                .or(end),
        };
        let slot = self.list.insert_before(anchor, Entry::Placeholder(Some(id)));
        self.observers.insert(
            id,
            Observer {
                slot,
                callback,
                notified: false,
            },
        );
        id
    }

    pub fn remove_observer(&mut self, id: ObserverId) {
        if let Some(observer) = self.observers.remove(&id) {
            self.list.remove(observer.slot);
            self.remove_obsolete_entries();
        }
    }

    /// Read up to `max` committed changes after the observer's position and
    /// advance it. Internal and external changes are never mixed in one call;
    /// the flag says which kind was returned. An empty result re-arms the
    /// observer's callback.
    pub fn read_changes(&mut self, id: ObserverId, max: usize) -> (Vec<Change>, bool) {
        let Some(start) = self.observers.get(&id).map(|o| o.slot) else {
            return (Vec::new(), false);
        };
        let mut changes = Vec::new();
        let mut kind = None;
        let mut last_read = None;
        let mut cursor = self.list.next(start);
        while let Some(slot) = cursor {
            if changes.len() >= max {
                break;
            }
            match self.list.get(slot) {
                Some(Entry::Change {
                    change,
                    committed: true,
                    external,
                }) => {
                    if kind.is_some_and(|k| k != *external) {
                        break;
                    }
                    kind = Some(*external);
                    changes.push(change.clone());
                    last_read = Some(slot);
                }
                Some(Entry::Placeholder(Some(_))) => {}
                _ => break,
            }
            cursor = self.list.next(slot);
        }

        if let Some(last) = last_read {
            self.list.move_after(start, Some(last));
        }
        if changes.is_empty() {
            if let Some(observer) = self.observers.get_mut(&id) {
                observer.notified = false;
            }
        }
        self.metrics.add_changes_delivered(changes.len() as u64);
        self.remove_obsolete_entries();
        (changes, kind.unwrap_or(false))
    }

    /// Skip everything currently readable
    pub fn catch_up(&mut self, id: ObserverId) {
        let end = self.transaction.as_ref().map(|tx| tx.marker);
        if let Some(observer) = self.observers.get_mut(&id) {
            observer.notified = false;
            let slot = observer.slot;
            self.list.move_before(slot, end);
        }
        self.remove_obsolete_entries();
    }

    pub fn has_changes_after(&self, id: ObserverId) -> bool {
        self.observers
            .get(&id)
            .is_some_and(|o| self.has_visible_change_after(o.slot))
    }

    fn has_visible_change_after(&self, slot: Slot) -> bool {
        let mut cursor = self.list.next(slot);
        while let Some(s) = cursor {
            match self.list.get(s) {
                Some(Entry::Change { committed, .. }) => return *committed,
                Some(Entry::Placeholder(Some(_))) => {}
                _ => return false,
            }
            cursor = self.list.next(s);
        }
        false
    }

    fn notify_observers(&mut self) {
        let ready: Vec<ObserverId> = self
            .observers
            .iter()
            .filter(|(_, o)| !o.notified && self.has_visible_change_after(o.slot))
            .map(|(id, _)| *id)
            .collect();
        for id in ready {
            if let Some(observer) = self.observers.get_mut(&id) {
                observer.notified = true;
                if let Some(callback) = &observer.callback {
                    callback();
                }
            }
        }
    }

    // ==================
    // Document observers
    // ==================

    pub fn add_doc_observer(&mut self, doc_id: &str, callback: DocChangeCallback) -> DocObserverId {
        let id = self.next_observer_id;
        self.next_observer_id += 1;
        self.doc_observers
            .entry(doc_id.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    pub fn remove_doc_observer(&mut self, doc_id: &str, id: DocObserverId) {
        if let Some(list) = self.doc_observers.get_mut(doc_id) {
            list.retain(|(observer, _)| *observer != id);
            if list.is_empty() {
                self.doc_observers.remove(doc_id);
            }
        }
    }

    fn notify_doc_observers(&self, doc_id: &str, sequence: Sequence) {
        if let Some(list) = self.doc_observers.get(doc_id) {
            for (_, callback) in list {
                callback(doc_id, sequence);
            }
        }
    }

    // ==================
    // Inspection
    // ==================

    /// Committed changes with a sequence above `since`, in list order
    pub fn changes_since(&self, since: Sequence) -> Vec<Change> {
        self.list
            .iter()
            .filter_map(|(_, e)| match e {
                Entry::Change {
                    change,
                    committed: true,
                    ..
                } if change.sequence > since => Some(change.clone()),
                _ => None,
            })
            .collect()
    }

    /// Debug rendering of the list: `doc@seq` per change (`'` if external),
    /// `*` per observer, `|` at the start of the open transaction
    pub fn dump(&self) -> String {
        let parts: Vec<String> = self
            .list
            .iter()
            .map(|(_, e)| match e {
                Entry::Change {
                    change, external, ..
                } => format!(
                    "{}@{}{}",
                    change.doc_id,
                    change.sequence,
                    if *external { "'" } else { "" }
                ),
                Entry::Placeholder(Some(_)) => "*".to_string(),
                Entry::Placeholder(None) => "|".to_string(),
            })
            .collect();
        format!("[{}]", parts.join(", "))
    }
}
