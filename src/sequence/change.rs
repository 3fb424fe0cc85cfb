//! Tracker entries

use serde::{Deserialize, Serialize};

use crate::storage::{DocumentFlags, Sequence};

/// One document mutation as seen by observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub doc_id: String,
    /// ASCII ID of the new current revision; empty for a purge
    pub rev_id: String,
    pub sequence: Sequence,
    pub body_size: usize,
    pub flags: DocumentFlags,
}

impl Change {
    pub fn new(
        doc_id: impl Into<String>,
        rev_id: impl Into<String>,
        sequence: Sequence,
        body_size: usize,
        flags: DocumentFlags,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev_id: rev_id.into(),
            sequence,
            body_size,
            flags,
        }
    }

    pub fn is_purge(&self) -> bool {
        self.flags.contains(DocumentFlags::PURGED)
    }
}
