//! One revision of a vector document

use crate::revid::{RevId, SourceId};
use crate::storage::DocumentFlags;
use crate::version_vector::VersionVector;

/// The one revision a vector document keeps per remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub vector: VersionVector,
    pub body: Vec<u8>,
    /// `DELETED`, `HAS_ATTACHMENTS` and, for remote entries, `CONFLICTED`
    pub flags: DocumentFlags,
}

impl Revision {
    pub fn new(vector: VersionVector, body: Vec<u8>, flags: DocumentFlags) -> Self {
        Self { vector, body, flags }
    }

    /// ID of the revision: its vector's current version
    pub fn rev_id(&self) -> Option<RevId> {
        self.vector.current_version().map(RevId::Version)
    }

    /// Expanded ASCII form of the whole vector
    pub fn rev_id_ascii(&self, my_id: Option<SourceId>) -> String {
        self.vector.to_ascii(my_id)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(DocumentFlags::DELETED)
    }

    pub fn is_conflicted(&self) -> bool {
        self.flags.contains(DocumentFlags::CONFLICTED)
    }

    pub fn has_attachments(&self) -> bool {
        self.flags.contains(DocumentFlags::HAS_ATTACHMENTS)
    }

    /// Whether `rev_id` names this revision
    pub fn matches(&self, rev_id: &RevId) -> bool {
        match (rev_id, self.vector.current_version()) {
            (RevId::Version(v), Some(current)) => *v == current,
            _ => false,
        }
    }
}
