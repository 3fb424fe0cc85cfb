//! Revision tree nodes
//!
//! `RevFlags` mixes persisted flags with `NEW`, which only lives until the
//! next save.

use std::fmt;

use crate::revid::TreeRevId;
use crate::storage::Sequence;

/// Position of a revision inside its tree's arena.
///
/// Valid until the next mutation of the tree (which may re-sort it).
pub type RevIndex = usize;

/// Per-revision flag set
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RevFlags(u8);

impl RevFlags {
    pub const NONE: RevFlags = RevFlags(0);
    /// Revision is a tombstone
    pub const DELETED: RevFlags = RevFlags(0x01);
    /// Revision has no children
    pub const LEAF: RevFlags = RevFlags(0x02);
    /// Not yet saved
    pub const NEW: RevFlags = RevFlags(0x04);
    /// Body references attachments
    pub const HAS_ATTACHMENTS: RevFlags = RevFlags(0x08);
    /// Body survives `remove_non_leaf_bodies`
    pub const KEEP_BODY: RevFlags = RevFlags(0x10);
    /// Branch is an unresolved conflict with the current revision
    pub const IS_CONFLICT: RevFlags = RevFlags(0x20);
    /// Tombstone that closes a conflicting branch
    pub const CLOSED: RevFlags = RevFlags(0x40);
    /// Marked for removal by the next compaction
    pub const PURGE: RevFlags = RevFlags(0x80);

    /// Flags a caller may set on an inserted revision
    pub const INSERTABLE: RevFlags = RevFlags(0x01 | 0x08 | 0x10 | 0x40);
    /// Flags written to storage
    pub const PERSISTENT: RevFlags = RevFlags(0x01 | 0x02 | 0x08 | 0x10 | 0x20 | 0x40);

    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[inline]
    pub fn bits(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn contains(&self, other: RevFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn intersects(&self, other: RevFlags) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: RevFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: RevFlags) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn intersection(self, other: RevFlags) -> RevFlags {
        RevFlags(self.0 & other.0)
    }
}

impl std::ops::BitOr for RevFlags {
    type Output = RevFlags;

    fn bitor(self, rhs: RevFlags) -> RevFlags {
        RevFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for RevFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(RevFlags, &str); 8] = [
            (RevFlags::DELETED, "deleted"),
            (RevFlags::LEAF, "leaf"),
            (RevFlags::NEW, "new"),
            (RevFlags::HAS_ATTACHMENTS, "attachments"),
            (RevFlags::KEEP_BODY, "keep_body"),
            (RevFlags::IS_CONFLICT, "conflict"),
            (RevFlags::CLOSED, "closed"),
            (RevFlags::PURGE, "purge"),
        ];
        let names: Vec<_> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "RevFlags({})", names.join("|"))
    }
}

/// One node of a revision tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rev {
    pub(crate) rev_id: TreeRevId,
    pub(crate) parent: Option<RevIndex>,
    pub(crate) flags: RevFlags,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) sequence: Sequence,
}

impl Rev {
    #[inline]
    pub fn rev_id(&self) -> &TreeRevId {
        &self.rev_id
    }

    #[inline]
    pub fn parent(&self) -> Option<RevIndex> {
        self.parent
    }

    #[inline]
    pub fn flags(&self) -> RevFlags {
        self.flags
    }

    #[inline]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Sequence of the save that created this revision (0 until saved)
    #[inline]
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn is_leaf(&self) -> bool {
        self.flags.contains(RevFlags::LEAF)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(RevFlags::DELETED)
    }

    pub fn is_conflict(&self) -> bool {
        self.flags.contains(RevFlags::IS_CONFLICT)
    }

    pub fn is_closed(&self) -> bool {
        self.flags.contains(RevFlags::CLOSED)
    }

    pub fn is_new(&self) -> bool {
        self.flags.contains(RevFlags::NEW)
    }

    pub fn has_attachments(&self) -> bool {
        self.flags.contains(RevFlags::HAS_ATTACHMENTS)
    }

    /// A live leaf: counts toward conflicts
    pub fn is_active(&self) -> bool {
        self.is_leaf() && !self.is_deleted()
    }

    /// Winner ordering: `Less` sorts first.
    ///
    /// Leaves first, then live revisions, then non-conflicting ones, then the
    /// higher revision ID.
    pub(crate) fn priority_cmp(&self, other: &Rev) -> std::cmp::Ordering {
        other
            .is_leaf()
            .cmp(&self.is_leaf())
            .then_with(|| self.is_deleted().cmp(&other.is_deleted()))
            .then_with(|| self.is_conflict().cmp(&other.is_conflict()))
            .then_with(|| other.rev_id.cmp(&self.rev_id))
    }
}
