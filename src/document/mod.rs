//! Documents
//!
//! A collection stores every document with one of two revision models,
//! chosen once from its `VersioningConfig`:
//!
//! - `TreeDocument`: a revision tree with digest-named revisions
//! - `VectorDocument`: one version vector per known remote
//!
//! `Document` is the closed union of the two. Operations that only make
//! sense for one model panic when called on the other, since that is a
//! caller bug; data-dependent failures are returned as `RevError` values.
//!
//! Mutations assume the caller holds the file's transaction. Documents are
//! not shared between threads.

mod context;
pub mod delta;
mod factory;
mod request;
mod tree_document;
mod vector_document;

pub use context::DocumentContext;
pub use factory::{DocumentFactory, DocumentMeta};
pub use request::PutRequest;
pub use tree_document::TreeDocument;
pub use vector_document::VectorDocument;

use crate::errors::RevResult;
use crate::rev_tree::{RevFlags, SaveResult};
use crate::revid::{RemoteId, RevId};
use crate::storage::{DocumentFlags, Sequence, Transaction};

/// The revision a document currently has selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedRevision {
    pub rev_id: RevId,
    pub flags: RevFlags,
    /// Sequence the revision was saved under, 0 if unsaved
    pub sequence: Sequence,
    pub body: Option<Vec<u8>>,
    /// Remote slot holding the revision (vector documents only)
    pub remote: Option<RemoteId>,
}

impl SelectedRevision {
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(RevFlags::DELETED)
    }

    pub fn is_leaf(&self) -> bool {
        self.flags.contains(RevFlags::LEAF)
    }

    pub fn is_conflict(&self) -> bool {
        self.flags.contains(RevFlags::IS_CONFLICT)
    }
}

/// A document of either revision model
pub enum Document {
    Tree(TreeDocument),
    Vector(VectorDocument),
}

macro_rules! dispatch {
    ($self:expr, $doc:ident => $call:expr) => {
        match $self {
            Document::Tree($doc) => $call,
            Document::Vector($doc) => $call,
        }
    };
}

impl Document {
    pub fn doc_id(&self) -> &str {
        dispatch!(self, d => d.doc_id())
    }

    /// Whether the document has a current revision
    pub fn exists(&self) -> bool {
        dispatch!(self, d => d.exists())
    }

    pub fn flags(&self) -> DocumentFlags {
        dispatch!(self, d => d.flags())
    }

    /// ID of the current revision
    pub fn rev_id(&self) -> Option<RevId> {
        dispatch!(self, d => d.rev_id())
    }

    pub fn sequence(&self) -> Sequence {
        dispatch!(self, d => d.sequence())
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Document::Tree(_))
    }

    pub fn as_tree(&self) -> Option<&TreeDocument> {
        match self {
            Document::Tree(doc) => Some(doc),
            Document::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&VectorDocument> {
        match self {
            Document::Vector(doc) => Some(doc),
            Document::Tree(_) => None,
        }
    }

    // ==================
    // Selection
    // ==================

    pub fn selected(&self) -> Option<SelectedRevision> {
        dispatch!(self, d => d.selected())
    }

    pub fn select_revision(&mut self, rev_id: &RevId, with_body: bool) -> bool {
        dispatch!(self, d => d.select_revision(rev_id, with_body))
    }

    pub fn select_current_revision(&mut self) -> bool {
        dispatch!(self, d => d.select_current_revision())
    }

    pub fn select_next_revision(&mut self) -> bool {
        dispatch!(self, d => d.select_next_revision())
    }

    pub fn select_next_leaf_revision(&mut self, include_deleted: bool) -> bool {
        dispatch!(self, d => d.select_next_leaf_revision(include_deleted))
    }

    /// Tree documents only
    pub fn select_parent_revision(&mut self) -> bool {
        match self {
            Document::Tree(doc) => doc.select_parent_revision(),
            Document::Vector(_) => unsupported("select_parent_revision"),
        }
    }

    /// Tree documents only
    pub fn select_common_ancestor_revision(&mut self, a: &RevId, b: &RevId) -> bool {
        match self {
            Document::Tree(doc) => doc.select_common_ancestor_revision(a, b),
            Document::Vector(_) => unsupported("select_common_ancestor_revision"),
        }
    }

    /// Vector documents only
    pub fn select_remote(&mut self, remote: RemoteId) -> bool {
        match self {
            Document::Vector(doc) => doc.select_remote(remote),
            Document::Tree(_) => unsupported("select_remote"),
        }
    }

    /// History of the selected revision: comma-separated tree IDs, or the
    /// version vector
    pub fn get_revision_history(&self, max_count: usize, stop_at: &[RevId]) -> String {
        dispatch!(self, d => d.get_revision_history(max_count, stop_at))
    }

    // ==================
    // Insertion
    // ==================

    pub fn put_new_revision(&mut self, rq: &PutRequest, tx: &mut Transaction<'_>) -> RevResult<bool> {
        dispatch!(self, d => d.put_new_revision(rq, tx))
    }

    pub fn put_existing_revision(&mut self, rq: &PutRequest, tx: &mut Transaction<'_>) -> RevResult<usize> {
        dispatch!(self, d => d.put_existing_revision(rq, tx))
    }

    /// Dispatch on `rq.existing_revision`. Returns whether a revision was
    /// added.
    pub fn put(&mut self, rq: &PutRequest, tx: &mut Transaction<'_>) -> RevResult<bool> {
        if rq.existing_revision {
            Ok(self.put_existing_revision(rq, tx)? > 0)
        } else {
            self.put_new_revision(rq, tx)
        }
    }

    pub fn resolve_conflict(
        &mut self,
        winner: &RevId,
        loser: &RevId,
        merged_body: Option<Vec<u8>>,
        merged_flags: DocumentFlags,
        prune_loser: bool,
    ) -> RevResult<()> {
        dispatch!(self, d => d.resolve_conflict(winner, loser, merged_body, merged_flags, prune_loser))
    }

    pub fn purge_revision(&mut self, rev_id: &RevId) -> RevResult<usize> {
        dispatch!(self, d => d.purge_revision(rev_id))
    }

    pub fn save(&mut self, tx: &mut Transaction<'_>) -> RevResult<SaveResult> {
        dispatch!(self, d => d.save(tx))
    }

    // ==================
    // Remote ancestors
    // ==================

    /// Latest revision known to be on `remote`
    pub fn remote_ancestor(&self, remote: RemoteId) -> Option<RevId> {
        dispatch!(self, d => d.remote_ancestor(remote))
    }

    pub fn set_remote_ancestor(&mut self, remote: RemoteId, rev_id: &RevId) -> RevResult<()> {
        dispatch!(self, d => d.set_remote_ancestor(remote, rev_id))
    }
}

#[cold]
fn unsupported(operation: &str) -> ! {
    panic!("UnsupportedOperation: {} does not apply to this document's revision model", operation)
}
