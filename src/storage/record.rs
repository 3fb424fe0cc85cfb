//! Key-store record types
//!
//! A record is what the storage engine knows about one document:
//!
//! ```text
//! key       document ID
//! version   binary ID of the current revision
//! flags     DocumentFlags summary (deleted, conflicted, ...)
//! sequence  assigned by the store on every save, 0 = never saved
//! body      body of the current revision
//! extra     encoded revision metadata (tree or remote vectors)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a record in its store's change order
pub type Sequence = u64;

/// Summary flags stored with every record
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DocumentFlags(u8);

impl DocumentFlags {
    pub const NONE: DocumentFlags = DocumentFlags(0);
    /// Current revision is a tombstone
    pub const DELETED: DocumentFlags = DocumentFlags(0x01);
    /// Document has unresolved conflicts
    pub const CONFLICTED: DocumentFlags = DocumentFlags(0x02);
    /// Some revision references attachments
    pub const HAS_ATTACHMENTS: DocumentFlags = DocumentFlags(0x04);
    /// Pushed to a remote since the last local change
    pub const SYNCED: DocumentFlags = DocumentFlags(0x08);
    /// Change-tracker marker for a purged document; never stored
    pub const PURGED: DocumentFlags = DocumentFlags(0x20);

    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[inline]
    pub fn bits(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn contains(&self, other: DocumentFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: DocumentFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: DocumentFlags) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn intersection(self, other: DocumentFlags) -> DocumentFlags {
        DocumentFlags(self.0 & other.0)
    }

    /// `self` with `other` set or cleared
    pub fn with(mut self, other: DocumentFlags, on: bool) -> Self {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
        self
    }
}

impl std::ops::BitOr for DocumentFlags {
    type Output = DocumentFlags;

    fn bitor(self, rhs: DocumentFlags) -> DocumentFlags {
        DocumentFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for DocumentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentFlags({:#04x})", self.0)
    }
}

/// A stored document record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub key: String,
    pub version: Vec<u8>,
    pub flags: DocumentFlags,
    pub sequence: Sequence,
    pub body: Vec<u8>,
    pub extra: Vec<u8>,
}

impl Record {
    /// An unsaved record for `key`
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Whether the record has ever been saved
    #[inline]
    pub fn exists(&self) -> bool {
        self.sequence > 0
    }
}

/// Write request for `KeyStore::set`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub key: String,
    pub version: Vec<u8>,
    pub flags: DocumentFlags,
    pub body: Vec<u8>,
    pub extra: Vec<u8>,
    /// Sequence the caller last read; the write fails if the stored record has moved on
    pub expected_sequence: Sequence,
    /// Keep the existing sequence instead of assigning a new one
    pub update_sequence: bool,
}

impl RecordUpdate {
    pub fn new(key: impl Into<String>, expected_sequence: Sequence) -> Self {
        Self {
            key: key.into(),
            version: Vec::new(),
            flags: DocumentFlags::NONE,
            body: Vec::new(),
            extra: Vec::new(),
            expected_sequence,
            update_sequence: true,
        }
    }
}
