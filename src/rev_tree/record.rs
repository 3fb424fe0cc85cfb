//! Revision tree persistence
//!
//! - Current body in `Record.body`, encoded tree in `Record.extra`, current
//!   binary revision ID in `Record.version`
//! - `save` recomputes document flags and reports whether a new sequence was
//!   taken

use super::codec;
use super::tree::RevTree;
use crate::errors::{RevError, RevResult};
use crate::observability::{log_event, Event};
use crate::revid::TreeRevId;
use crate::storage::{DocumentFlags, Record, RecordUpdate, Sequence, Transaction};

/// Outcome of persisting a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Nothing changed
    NoSave,
    /// Metadata changed (remote heads, flags) without a new revision
    NoNewSequence,
    /// A new revision was saved under a new sequence
    NewSequence,
    /// The stored record moved on since it was read
    Conflict,
    /// The last revision was purged and the record deleted
    Purged,
}

/// A document's revision tree bound to its stored record
#[derive(Debug, Clone)]
pub struct RevTreeRecord {
    doc_id: String,
    tree: RevTree,
    flags: DocumentFlags,
    sequence: Sequence,
}

impl RevTreeRecord {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            tree: RevTree::new(),
            flags: DocumentFlags::NONE,
            sequence: 0,
        }
    }

    /// Decode a stored record. A record that was never saved yields an empty tree.
    pub fn from_record(record: &Record) -> RevResult<Self> {
        let tree = if record.exists() {
            if record.extra.is_empty() {
                return Err(RevError::corrupt(format!(
                    "record {} has no revision tree",
                    record.key
                )));
            }
            codec::decode(&record.extra, &record.body, record.sequence).map_err(|e| {
                log_event(Event::RecordCorrupt, &[("doc_id", &record.key), ("error", &e.to_string())]);
                e
            })?
        } else {
            RevTree::new()
        };
        Ok(Self {
            doc_id: record.key.clone(),
            tree,
            flags: record.flags,
            sequence: record.sequence,
        })
    }

    #[inline]
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    #[inline]
    pub fn tree(&self) -> &RevTree {
        &self.tree
    }

    #[inline]
    pub fn tree_mut(&mut self) -> &mut RevTree {
        &mut self.tree
    }

    #[inline]
    pub fn flags(&self) -> DocumentFlags {
        self.flags
    }

    /// Sequence of the last load or save, 0 if never saved
    #[inline]
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn exists(&self) -> bool {
        self.sequence > 0
    }

    pub fn current_rev_id(&self) -> Option<&TreeRevId> {
        self.tree.current_rev().map(|r| r.rev_id())
    }

    /// Summary flags derived from the tree
    pub fn compute_flags(&self) -> DocumentFlags {
        let deleted = self.tree.current_rev().is_some_and(|r| r.is_deleted());
        let attachments = self.tree.revs().any(|r| r.has_attachments());
        self.flags
            .with(DocumentFlags::DELETED, deleted)
            .with(DocumentFlags::CONFLICTED, self.tree.has_conflict())
            .with(DocumentFlags::HAS_ATTACHMENTS, attachments)
    }

    /// Write the tree back to the store
    pub fn save(&mut self, tx: &mut Transaction<'_>) -> RevResult<SaveResult> {
        if self.tree.is_empty() {
            if !self.exists() {
                return Ok(SaveResult::NoSave);
            }
            if !tx.del(&self.doc_id, self.sequence)? {
                log_event(Event::DocumentSaveConflict, &[("doc_id", &self.doc_id)]);
                return Ok(SaveResult::Conflict);
            }
            self.sequence = 0;
            self.flags = DocumentFlags::NONE;
            return Ok(SaveResult::Purged);
        }
        if !self.tree.changed() && self.exists() {
            return Ok(SaveResult::NoSave);
        }

        let new_sequence = self.tree.has_new_revisions() || !self.exists();
        self.tree.remove_non_leaf_bodies();
        let flags = self.compute_flags();
        let current = self
            .tree
            .current_rev()
            .ok_or_else(|| RevError::not_found("current revision"))?;
        let update = RecordUpdate {
            key: self.doc_id.clone(),
            version: current.rev_id().to_binary(),
            flags,
            body: current.body().unwrap_or_default().to_vec(),
            extra: codec::encode(&self.tree),
            expected_sequence: self.sequence,
            update_sequence: new_sequence,
        };

        let sequence = tx.set(&update)?;
        if sequence == 0 {
            log_event(Event::DocumentSaveConflict, &[("doc_id", &self.doc_id)]);
            return Ok(SaveResult::Conflict);
        }
        self.sequence = sequence;
        self.flags = flags;
        self.tree.saved(sequence);
        Ok(if new_sequence {
            SaveResult::NewSequence
        } else {
            SaveResult::NoNewSequence
        })
    }
}
