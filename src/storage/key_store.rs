//! Key store contract

use super::errors::StorageResult;
use super::record::{DocumentFlags, Record, RecordUpdate, Sequence};

/// Filters for `KeyStore::enumerate`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerateOptions {
    /// Only records whose sequence is greater than this
    pub since: Sequence,
    pub include_deleted: bool,
    pub only_conflicts: bool,
    /// Only records carrying attachment references
    pub only_attachments: bool,
}

impl EnumerateOptions {
    pub(crate) fn matches(&self, record: &Record) -> bool {
        record.sequence > self.since
            && (self.include_deleted || !record.flags.contains(DocumentFlags::DELETED))
            && (!self.only_conflicts || record.flags.contains(DocumentFlags::CONFLICTED))
            && (!self.only_attachments || record.flags.contains(DocumentFlags::HAS_ATTACHMENTS))
    }
}

/// Key/value engine holding one collection's document records.
///
/// Sequences are assigned by the store, increase monotonically, and are only
/// final once the enclosing transaction commits. Mutations must happen between
/// `begin_transaction` and `commit_transaction`/`abort_transaction`.
pub trait KeyStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<Record>>;

    fn get_by_sequence(&self, sequence: Sequence) -> StorageResult<Option<Record>>;

    /// Write a record. Returns the record's sequence, or 0 if
    /// `update.expected_sequence` no longer matches the stored record.
    fn set(&self, update: &RecordUpdate) -> StorageResult<Sequence>;

    /// Delete a record. With a non-zero `expected_sequence` the delete only
    /// happens if the stored record still has it.
    fn del(&self, key: &str, expected_sequence: Sequence) -> StorageResult<bool>;

    /// Records matching `options`, in sequence order
    fn enumerate(&self, options: &EnumerateOptions) -> StorageResult<Vec<Record>>;

    fn last_sequence(&self) -> Sequence;

    fn begin_transaction(&self) -> StorageResult<()>;

    fn commit_transaction(&self) -> StorageResult<()>;

    fn abort_transaction(&self);
}
