//! Change tracking and notification
//!
//! This module provides:
//! - `SequenceTracker`: ordered document changes with transaction rollback
//! - Collection and document observer handles
//! - `AccessLock`, the closure-only lock every tracker is shared through
//!
//! Entries become visible to observers only when their transaction commits.
//! Changes committed by other connections on the same file arrive through
//! `add_external_transaction` and are flagged as external.

mod change;
mod list;
mod lock;
mod observer;
mod tracker;

pub use change::Change;
pub use lock::AccessLock;
pub use observer::{CollectionObserver, DocumentObserver, SharedTracker};
pub use tracker::{ChangeCallback, DocChangeCallback, DocObserverId, ObserverId, SequenceTracker};
