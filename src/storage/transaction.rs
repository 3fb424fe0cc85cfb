//! Write transactions
//!
//! - Commit order: store, tracker, lock release, then other connections
//! - Dropping an uncommitted transaction aborts it
//! - A connection holds at most one transaction at a time

use std::sync::{Arc, MutexGuard};

use super::data_file::DataFile;
use super::errors::StorageResult;
use super::key_store::KeyStore;
use super::record::{DocumentFlags, RecordUpdate, Sequence};
use crate::errors::RevResult;
use crate::observability::{log_event, Event};
use crate::sequence::SharedTracker;

/// The file's exclusive write transaction.
///
/// Record writes and tracker entries made through it become visible together
/// on `commit`. Dropping it without committing aborts.
pub struct Transaction<'a> {
    file: &'a DataFile,
    guard: Option<MutexGuard<'a, ()>>,
    tracker: Arc<SharedTracker>,
    active: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn begin(file: &'a DataFile, tracker: Arc<SharedTracker>) -> RevResult<Self> {
        let guard = file.lock_transactions();
        file.store().begin_transaction()?;
        let last_sequence = file.store().last_sequence();
        tracker.use_locked(|t| {
            t.set_last_sequence(last_sequence);
            t.begin_transaction();
        });
        Ok(Self {
            file,
            guard: Some(guard),
            tracker,
            active: true,
        })
    }

    #[inline]
    pub fn store(&self) -> &dyn KeyStore {
        self.file.store()
    }

    pub fn set(&mut self, update: &RecordUpdate) -> StorageResult<Sequence> {
        self.file.store().set(update)
    }

    pub fn del(&mut self, key: &str, expected_sequence: Sequence) -> StorageResult<bool> {
        self.file.store().del(key, expected_sequence)
    }

    pub fn document_changed(&mut self, doc_id: &str, rev_id: &str, sequence: Sequence, body_size: usize, flags: DocumentFlags) {
        self.tracker
            .use_locked(|t| t.document_changed(doc_id, rev_id, sequence, body_size, flags));
    }

    pub fn document_purged(&mut self, doc_id: &str) {
        self.tracker.use_locked(|t| t.document_purged(doc_id));
    }

    /// Commit the store, publish the tracker entries, release the file, then
    /// forward the changes to the other connections.
    pub fn commit(mut self) -> RevResult<()> {
        if let Err(e) = self.file.store().commit_transaction() {
            self.abort_inner();
            return Err(e.into());
        }
        self.active = false;
        let changes = self.tracker.use_locked(|t| t.end_transaction(true));
        self.guard.take();

        self.file.metrics().increment_transactions_committed();
        log_event(
            Event::TransactionCommitted,
            &[("changes", &changes.len().to_string())],
        );
        self.file.notify_committed(&self.tracker, &changes);
        Ok(())
    }

    pub fn abort(mut self) {
        self.abort_inner();
    }

    fn abort_inner(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.file.store().abort_transaction();
        self.tracker.use_locked(|t| t.end_transaction(false));
        self.guard.take();
        self.file.metrics().increment_transactions_aborted();
        log_event(Event::TransactionAborted, &[]);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.abort_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{AccessLock, CollectionObserver, SequenceTracker};
    use crate::storage::DataFile;

    fn tracker() -> Arc<SharedTracker> {
        Arc::new(AccessLock::new(SequenceTracker::new(100)))
    }

    #[test]
    fn test_commit_persists_and_publishes() {
        let file = DataFile::in_memory();
        let mine = tracker();
        let theirs = tracker();
        file.register_tracker(&mine);
        file.register_tracker(&theirs);
        let observer = CollectionObserver::new(Arc::clone(&theirs), None, None);

        let mut tx = file.begin_transaction(Arc::clone(&mine)).unwrap();
        let seq = tx.set(&RecordUpdate::new("doc1", 0)).unwrap();
        tx.document_changed("doc1", "1-aa", seq, 0, DocumentFlags::NONE);
        tx.commit().unwrap();

        assert!(file.store().get("doc1").unwrap().is_some());
        let (changes, external) = observer.read_changes(10);
        assert_eq!(changes.len(), 1);
        assert!(external);
        assert_eq!(file.metrics().snapshot().transactions_committed, 1);
    }

    #[test]
    fn test_second_begin_on_same_connection_fails() {
        let file = DataFile::in_memory();
        let mine = tracker();
        let tx = file.begin_transaction(Arc::clone(&mine)).unwrap();
        let err = file.begin_transaction(Arc::clone(&mine)).err().unwrap();
        assert_eq!(err.code(), "AERO_STORAGE_TRANSACTION_OPEN");
        assert!(!err.is_fatal());
        tx.commit().unwrap();

        assert!(file.begin_transaction(mine).is_ok());
    }

    #[test]
    fn test_other_connection_waits_for_commit() {
        let file = DataFile::in_memory();
        let mine = tracker();
        let theirs = tracker();
        let mut tx = file.begin_transaction(Arc::clone(&mine)).unwrap();
        tx.set(&RecordUpdate::new("doc1", 0)).unwrap();

        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                let tx = file.begin_transaction(Arc::clone(&theirs)).unwrap();
                let seen = tx.store().get("doc1").unwrap().is_some();
                tx.abort();
                seen
            });
            tx.commit().unwrap();
            assert!(waiter.join().unwrap());
        });
    }

    #[test]
    fn test_drop_aborts() {
        let file = DataFile::in_memory();
        let mine = tracker();
        {
            let mut tx = file.begin_transaction(Arc::clone(&mine)).unwrap();
            let seq = tx.set(&RecordUpdate::new("doc1", 0)).unwrap();
            tx.document_changed("doc1", "1-aa", seq, 0, DocumentFlags::NONE);
        }
        assert!(file.store().get("doc1").unwrap().is_none());
        assert_eq!(mine.use_locked(|t| t.last_sequence()), 0);
        assert!(!mine.use_locked(|t| t.in_transaction()));
        assert_eq!(file.metrics().snapshot().transactions_aborted, 1);
    }
}
