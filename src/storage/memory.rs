//! In-memory key store
//!
//! - Records indexed by key and by sequence
//! - An undo log per transaction restores the prior state on abort

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::errors::{StorageError, StorageResult};
#[cfg(test)]
use super::errors::StorageErrorCode;
use super::key_store::{EnumerateOptions, KeyStore};
use super::record::{Record, RecordUpdate, Sequence};

/// In-memory `KeyStore`.
///
/// Each transaction keeps an undo log of the records it replaced, so an abort
/// restores the exact prior state including the sequence counter.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    by_key: BTreeMap<String, Record>,
    by_sequence: BTreeMap<Sequence, String>,
    last_sequence: Sequence,
    undo: Option<UndoLog>,
}

#[derive(Debug)]
struct UndoLog {
    last_sequence: Sequence,
    replaced: Vec<(String, Option<Record>)>,
}

impl State {
    fn undo_log(&mut self, operation: &str) -> StorageResult<&mut UndoLog> {
        self.undo
            .as_mut()
            .ok_or_else(|| StorageError::no_transaction(operation))
    }

    fn put(&mut self, record: Record) {
        if let Some(old) = self.by_key.get(&record.key) {
            self.by_sequence.remove(&old.sequence);
        }
        self.by_sequence.insert(record.sequence, record.key.clone());
        self.by_key.insert(record.key.clone(), record);
    }

    fn remove(&mut self, key: &str) -> Option<Record> {
        let old = self.by_key.remove(key)?;
        self.by_sequence.remove(&old.sequence);
        Some(old)
    }
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, key: &str) -> StorageResult<Option<Record>> {
        Ok(self.state().by_key.get(key).cloned())
    }

    fn get_by_sequence(&self, sequence: Sequence) -> StorageResult<Option<Record>> {
        let state = self.state();
        let Some(key) = state.by_sequence.get(&sequence) else {
            return Ok(None);
        };
        match state.by_key.get(key) {
            Some(record) if record.sequence == sequence => Ok(Some(record.clone())),
            _ => Err(StorageError::data_corruption(
                key,
                format!("sequence {} points at a stale record", sequence),
            )),
        }
    }

    fn set(&self, update: &RecordUpdate) -> StorageResult<Sequence> {
        let mut state = self.state();
        state.undo_log("set")?;
        let existing = state.by_key.get(&update.key).cloned();
        let current_sequence = existing.as_ref().map_or(0, |r| r.sequence);
        if current_sequence != update.expected_sequence {
            return Ok(0);
        }
        let sequence = if update.update_sequence || existing.is_none() {
            state.last_sequence + 1
        } else {
            current_sequence
        };
        state.last_sequence = state.last_sequence.max(sequence);
        state.undo_log("set")?.replaced.push((update.key.clone(), existing));
        state.put(Record {
            key: update.key.clone(),
            version: update.version.clone(),
            flags: update.flags,
            sequence,
            body: update.body.clone(),
            extra: update.extra.clone(),
        });
        Ok(sequence)
    }

    fn del(&self, key: &str, expected_sequence: Sequence) -> StorageResult<bool> {
        let mut state = self.state();
        state.undo_log("del")?;
        let matches = match state.by_key.get(key) {
            Some(record) => expected_sequence == 0 || record.sequence == expected_sequence,
            None => false,
        };
        if !matches {
            return Ok(false);
        }
        let old = state.remove(key);
        state.undo_log("del")?.replaced.push((key.to_string(), old));
        Ok(true)
    }

    fn enumerate(&self, options: &EnumerateOptions) -> StorageResult<Vec<Record>> {
        let state = self.state();
        Ok(state
            .by_sequence
            .range(options.since + 1..)
            .filter_map(|(_, key)| state.by_key.get(key))
            .filter(|record| options.matches(record))
            .cloned()
            .collect())
    }

    fn last_sequence(&self) -> Sequence {
        self.state().last_sequence
    }

    fn begin_transaction(&self) -> StorageResult<()> {
        let mut state = self.state();
        if state.undo.is_some() {
            return Err(StorageError::transaction_open());
        }
        state.undo = Some(UndoLog {
            last_sequence: state.last_sequence,
            replaced: Vec::new(),
        });
        Ok(())
    }

    fn commit_transaction(&self) -> StorageResult<()> {
        self.state()
            .undo
            .take()
            .map(|_| ())
            .ok_or_else(|| StorageError::no_transaction("commit"))
    }

    fn abort_transaction(&self) {
        let mut state = self.state();
        let Some(log) = state.undo.take() else {
            return;
        };
        for (key, previous) in log.replaced.into_iter().rev() {
            state.remove(&key);
            if let Some(record) = previous {
                state.put(record);
            }
        }
        state.last_sequence = log.last_sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(key: &str, expected: Sequence, body: &[u8]) -> RecordUpdate {
        RecordUpdate {
            body: body.to_vec(),
            ..RecordUpdate::new(key, expected)
        }
    }

    #[test]
    fn test_set_requires_transaction() {
        let store = MemoryKeyStore::new();
        let err = store.set(&update("a", 0, b"x")).unwrap_err();
        assert!(err.message().contains("set"));
    }

    #[test]
    fn test_sequences_increase() {
        let store = MemoryKeyStore::new();
        store.begin_transaction().unwrap();
        assert_eq!(store.set(&update("a", 0, b"1")).unwrap(), 1);
        assert_eq!(store.set(&update("b", 0, b"1")).unwrap(), 2);
        assert_eq!(store.set(&update("a", 1, b"2")).unwrap(), 3);
        store.commit_transaction().unwrap();

        assert!(store.get_by_sequence(1).unwrap().is_none());
        assert_eq!(store.get_by_sequence(3).unwrap().unwrap().body, b"2");
        assert_eq!(store.last_sequence(), 3);
    }

    #[test]
    fn test_stale_expected_sequence_returns_zero() {
        let store = MemoryKeyStore::new();
        store.begin_transaction().unwrap();
        store.set(&update("a", 0, b"1")).unwrap();
        assert_eq!(store.set(&update("a", 0, b"2")).unwrap(), 0);
        assert_eq!(store.get("a").unwrap().unwrap().body, b"1");
        store.commit_transaction().unwrap();
    }

    #[test]
    fn test_nested_transaction_is_rejected() {
        let store = MemoryKeyStore::new();
        store.begin_transaction().unwrap();
        let err = store.begin_transaction().unwrap_err();
        assert_eq!(err.code(), StorageErrorCode::TransactionOpen);
        store.abort_transaction();
        assert!(store.begin_transaction().is_ok());
    }

    #[test]
    fn test_abort_restores_prior_state() {
        let store = MemoryKeyStore::new();
        store.begin_transaction().unwrap();
        store.set(&update("a", 0, b"1")).unwrap();
        store.commit_transaction().unwrap();

        store.begin_transaction().unwrap();
        store.set(&update("a", 1, b"2")).unwrap();
        store.set(&update("b", 0, b"1")).unwrap();
        assert!(store.del("a", 0).unwrap());
        store.abort_transaction();

        let a = store.get("a").unwrap().unwrap();
        assert_eq!(a.body, b"1");
        assert_eq!(a.sequence, 1);
        assert!(store.get("b").unwrap().is_none());
        assert_eq!(store.last_sequence(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_enumerate_filters() {
        use crate::storage::DocumentFlags;

        let store = MemoryKeyStore::new();
        store.begin_transaction().unwrap();
        store.set(&update("plain", 0, b"1")).unwrap();
        store
            .set(&RecordUpdate {
                flags: DocumentFlags::HAS_ATTACHMENTS,
                ..update("blob", 0, b"1")
            })
            .unwrap();
        store
            .set(&RecordUpdate {
                flags: DocumentFlags::DELETED,
                ..update("gone", 0, b"")
            })
            .unwrap();
        store.commit_transaction().unwrap();

        let all = store.enumerate(&EnumerateOptions::default()).unwrap();
        assert_eq!(all.len(), 2);

        let blobs = store
            .enumerate(&EnumerateOptions {
                only_attachments: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].key, "blob");

        let since = store
            .enumerate(&EnumerateOptions {
                since: 1,
                include_deleted: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(since.len(), 2);
    }
}
