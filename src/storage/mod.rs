//! Storage collaborator
//!
//! The revision core persists each document as one record in a key store.
//! This module defines that contract and an in-memory implementation:
//!
//! - `KeyStore`: get/set/del/enumerate with store-assigned sequences
//! - `MemoryKeyStore`: undo-logged in-memory store
//! - `DataFile`: the physical file shared by connections, one exclusive
//!   transaction at a time
//! - `Transaction`: commits records and tracker entries together
//!
//! # Invariants
//!
//! - Sequences increase monotonically per store and are final only on commit
//! - An aborted transaction leaves records, sequences and trackers untouched
//! - Other connections learn about a commit only after the file is released

mod checksum;
mod data_file;
mod errors;
mod key_store;
mod memory;
mod record;
mod transaction;

pub(crate) use checksum::{append_checksum, strip_checksum};
pub use data_file::DataFile;
pub use errors::{Severity, StorageError, StorageErrorCode, StorageResult};
pub use key_store::{EnumerateOptions, KeyStore};
pub use memory::MemoryKeyStore;
pub use record::{DocumentFlags, Record, RecordUpdate, Sequence};
pub use transaction::Transaction;
