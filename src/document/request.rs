//! Revision insertion requests

use crate::revid::{RemoteId, RevId};

/// Parameters for adding a revision to a document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutRequest {
    pub doc_id: String,
    /// JSON body, or a JSON merge-patch when `delta_source_rev_id` is set
    pub body: Vec<u8>,
    /// Revision IDs, newest first. For a new revision this is at most the
    /// parent; for an existing one it starts with the revision itself.
    pub history: Vec<String>,
    pub deletion: bool,
    pub has_attachments: bool,
    /// Inserting a revision made elsewhere rather than creating one
    pub existing_revision: bool,
    pub allow_conflict: bool,
    /// Remote the revision came from; `LOCAL` for local edits
    pub remote_db_id: RemoteId,
    /// Overrides the configured prune depth for this save
    pub max_rev_tree_depth: Option<u32>,
    pub delta_source_rev_id: Option<RevId>,
    /// Save the document in the caller's transaction
    pub save: bool,
}

impl PutRequest {
    /// A local edit on top of `parent` (or a first revision)
    pub fn new_revision(doc_id: impl Into<String>, body: impl Into<Vec<u8>>, parent: Option<&RevId>) -> Self {
        Self {
            doc_id: doc_id.into(),
            body: body.into(),
            history: parent.map(|p| vec![p.expanded()]).unwrap_or_default(),
            save: true,
            ..Self::default()
        }
    }

    /// A revision received from `remote`, with its history newest first
    pub fn existing<S: AsRef<str>>(
        doc_id: impl Into<String>,
        body: impl Into<Vec<u8>>,
        history: &[S],
        remote: RemoteId,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            body: body.into(),
            history: history.iter().map(|s| s.as_ref().to_string()).collect(),
            existing_revision: true,
            remote_db_id: remote,
            save: true,
            ..Self::default()
        }
    }

    pub fn deleted(mut self) -> Self {
        self.deletion = true;
        self
    }

    pub fn with_attachments(mut self) -> Self {
        self.has_attachments = true;
        self
    }

    pub fn allowing_conflict(mut self) -> Self {
        self.allow_conflict = true;
        self
    }

    pub fn with_delta_source(mut self, rev_id: RevId) -> Self {
        self.delta_source_rev_id = Some(rev_id);
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_rev_tree_depth = Some(depth);
        self
    }

    pub fn without_save(mut self) -> Self {
        self.save = false;
        self
    }
}
