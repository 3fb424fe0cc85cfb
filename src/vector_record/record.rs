//! Vector record persistence
//!
//! - Local revision in `Record.version` and `Record.body`
//! - Remote revisions as JSON in `Record.extra`
//! - Document flags union the local flags with `CONFLICTED` and
//!   `HAS_ATTACHMENTS` from any remote slot

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::revision::Revision;
use crate::errors::{RevError, RevResult};
use crate::observability::{log_event, Event};
use crate::rev_tree::SaveResult;
use crate::revid::{RemoteId, RevId};
use crate::storage::{DocumentFlags, Record, RecordUpdate, Sequence, Transaction};
use crate::version_vector::VersionVector;

const LOCAL_FLAGS: DocumentFlags = DocumentFlags::from_bits(0x01 | 0x04);

/// Persisted form of `Record.extra`
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredExtra {
    #[serde(default)]
    local_flags: DocumentFlags,
    #[serde(default)]
    remotes: Vec<StoredRemote>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRemote {
    remote: RemoteId,
    version: String,
    flags: DocumentFlags,
    #[serde(default)]
    body: String,
}

/// A vector document's stored state: the local revision plus the latest
/// revision known from each remote.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    doc_id: String,
    revisions: BTreeMap<RemoteId, Revision>,
    sequence: Sequence,
    changed: bool,
    local_changed: bool,
}

impl VectorRecord {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            revisions: BTreeMap::new(),
            sequence: 0,
            changed: false,
            local_changed: false,
        }
    }

    /// Decode a stored record. A record that was never saved yields no revisions.
    pub fn from_record(record: &Record) -> RevResult<Self> {
        let mut this = Self::new(record.key.clone());
        if !record.exists() {
            return Ok(this);
        }
        this.sequence = record.sequence;
        let corrupt = |e: RevError| {
            log_event(Event::RecordCorrupt, &[("doc_id", &record.key), ("error", &e.to_string())]);
            e
        };

        let extra: StoredExtra = if record.extra.is_empty() {
            StoredExtra::default()
        } else {
            serde_json::from_slice(&record.extra).map_err(|e| corrupt(e.into()))?
        };
        let local = VersionVector::from_binary(&record.version).map_err(|e| corrupt(RevError::corrupt(e.to_string())))?;
        this.revisions.insert(
            RemoteId::LOCAL,
            Revision::new(local, record.body.clone(), extra.local_flags),
        );
        for stored in extra.remotes {
            let vector = VersionVector::parse(&stored.version, None)
                .map_err(|e| corrupt(RevError::corrupt(e.to_string())))?;
            let body = STANDARD
                .decode(stored.body.as_bytes())
                .map_err(|e| corrupt(RevError::corrupt(format!("invalid remote body: {}", e))))?;
            this.revisions
                .insert(stored.remote, Revision::new(vector, body, stored.flags));
        }
        Ok(this)
    }

    #[inline]
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    #[inline]
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn exists(&self) -> bool {
        self.sequence > 0
    }

    #[inline]
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn current_revision(&self) -> Option<&Revision> {
        self.revisions.get(&RemoteId::LOCAL)
    }

    pub fn remote_revision(&self, remote: RemoteId) -> Option<&Revision> {
        self.revisions.get(&remote)
    }

    /// Local revision first, then remotes in ID order
    pub fn revisions(&self) -> impl Iterator<Item = (RemoteId, &Revision)> {
        self.revisions.iter().map(|(r, rev)| (*r, rev))
    }

    /// The first slot after `remote` holding a revision
    pub fn next_remote(&self, remote: RemoteId) -> Option<RemoteId> {
        self.revisions
            .range(RemoteId::new(remote.as_u32().saturating_add(1))..)
            .next()
            .map(|(r, _)| *r)
            .filter(|r| *r != remote)
    }

    /// Slot holding the revision named by `rev_id`, local first
    pub fn find(&self, rev_id: &RevId) -> Option<RemoteId> {
        self.revisions
            .iter()
            .find(|(_, rev)| rev.matches(rev_id))
            .map(|(r, _)| *r)
    }

    pub fn set_current_revision(&mut self, revision: Revision) {
        self.set_remote_revision(RemoteId::LOCAL, Some(revision));
    }

    /// Replace (or clear) the revision stored for `remote`
    pub fn set_remote_revision(&mut self, remote: RemoteId, revision: Option<Revision>) {
        let revision = revision.map(|mut rev| {
            if remote.is_local() {
                rev.flags = rev.flags.intersection(LOCAL_FLAGS);
            }
            rev
        });
        if self.revisions.get(&remote) == revision.as_ref() {
            return;
        }
        match revision {
            Some(rev) => self.revisions.insert(remote, rev),
            None => self.revisions.remove(&remote),
        };
        if remote.is_local() {
            self.local_changed = true;
        }
        self.changed = true;
    }

    /// Set or clear flags on a stored revision
    pub fn update_flags(&mut self, remote: RemoteId, flag: DocumentFlags, on: bool) {
        if let Some(rev) = self.revisions.get_mut(&remote) {
            let flags = rev.flags.with(flag, on);
            if flags != rev.flags {
                rev.flags = flags;
                self.changed = true;
            }
        }
    }

    /// Drop every revision
    pub fn purge_all(&mut self) -> usize {
        let count = self.revisions.len();
        if count > 0 {
            self.revisions.clear();
            self.changed = true;
            self.local_changed = true;
        }
        count
    }

    pub fn has_conflict(&self) -> bool {
        self.revisions.values().any(Revision::is_conflicted)
    }

    /// Local flags plus `CONFLICTED` / `HAS_ATTACHMENTS` from any remote
    pub fn compute_flags(&self) -> DocumentFlags {
        let local = self
            .current_revision()
            .map_or(DocumentFlags::NONE, |r| r.flags.intersection(LOCAL_FLAGS));
        let attachments = self.revisions.values().any(Revision::has_attachments);
        local
            .with(DocumentFlags::CONFLICTED, self.has_conflict())
            .with(DocumentFlags::HAS_ATTACHMENTS, attachments)
    }

    pub fn save(&mut self, tx: &mut Transaction<'_>) -> RevResult<SaveResult> {
        if !self.changed {
            return Ok(SaveResult::NoSave);
        }
        if self.current_revision().is_none() {
            if !self.exists() {
                self.changed = false;
                return Ok(SaveResult::NoSave);
            }
            if !tx.del(&self.doc_id, self.sequence)? {
                log_event(Event::DocumentSaveConflict, &[("doc_id", &self.doc_id)]);
                return Ok(SaveResult::Conflict);
            }
            self.sequence = 0;
            self.changed = false;
            self.local_changed = false;
            return Ok(SaveResult::Purged);
        }
        let local = self
            .current_revision()
            .ok_or_else(|| RevError::not_found("local revision"))?;

        let extra = StoredExtra {
            local_flags: local.flags,
            remotes: self
                .revisions
                .iter()
                .filter(|(remote, _)| !remote.is_local())
                .map(|(remote, rev)| StoredRemote {
                    remote: *remote,
                    version: rev.vector.to_ascii(None),
                    flags: rev.flags,
                    body: STANDARD.encode(&rev.body),
                })
                .collect(),
        };
        let new_sequence = self.local_changed || !self.exists();
        let update = RecordUpdate {
            key: self.doc_id.clone(),
            version: local.vector.to_binary(),
            flags: self.compute_flags(),
            body: local.body.clone(),
            extra: serde_json::to_vec(&extra)?,
            expected_sequence: self.sequence,
            update_sequence: new_sequence,
        };

        let sequence = tx.set(&update)?;
        if sequence == 0 {
            log_event(Event::DocumentSaveConflict, &[("doc_id", &self.doc_id)]);
            return Ok(SaveResult::Conflict);
        }
        self.sequence = sequence;
        self.changed = false;
        self.local_changed = false;
        Ok(if new_sequence {
            SaveResult::NewSequence
        } else {
            SaveResult::NoNewSequence
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{AccessLock, SequenceTracker};
    use crate::storage::DataFile;
    use std::sync::Arc;

    const PEER_A: &str = "AAECAwQFBgcICQoLDA0ODw";

    fn vector(ascii: &str) -> VersionVector {
        VersionVector::parse(ascii, None).unwrap()
    }

    fn tracker() -> Arc<crate::sequence::SharedTracker> {
        Arc::new(AccessLock::new(SequenceTracker::new(100)))
    }

    #[test]
    fn test_save_and_reload_with_remotes() {
        let file = DataFile::in_memory();
        let mut record = VectorRecord::new("doc1");
        record.set_current_revision(Revision::new(vector("*@5"), b"{\"v\":1}".to_vec(), DocumentFlags::NONE));
        record.set_remote_revision(
            RemoteId::new(1),
            Some(Revision::new(
                vector(&format!("{}@5,*@3", PEER_A)),
                b"{\"v\":2}".to_vec(),
                DocumentFlags::CONFLICTED | DocumentFlags::HAS_ATTACHMENTS,
            )),
        );

        let mut tx = file.begin_transaction(tracker()).unwrap();
        assert_eq!(record.save(&mut tx).unwrap(), SaveResult::NewSequence);
        tx.commit().unwrap();

        let stored = file.store().get("doc1").unwrap().unwrap();
        assert!(stored.flags.contains(DocumentFlags::CONFLICTED | DocumentFlags::HAS_ATTACHMENTS));
        let loaded = VectorRecord::from_record(&stored).unwrap();
        assert_eq!(loaded.current_revision().unwrap().vector, vector("*@5"));
        let remote = loaded.remote_revision(RemoteId::new(1)).unwrap();
        assert_eq!(remote.body, b"{\"v\":2}");
        assert!(remote.is_conflicted());
        assert_eq!(loaded.next_remote(RemoteId::LOCAL), Some(RemoteId::new(1)));
        assert_eq!(loaded.next_remote(RemoteId::new(1)), None);
    }

    #[test]
    fn test_remote_only_change_keeps_sequence() {
        let file = DataFile::in_memory();
        let mut record = VectorRecord::new("doc1");
        record.set_current_revision(Revision::new(vector("*@5"), b"{}".to_vec(), DocumentFlags::NONE));
        let mut tx = file.begin_transaction(tracker()).unwrap();
        record.save(&mut tx).unwrap();
        let first = record.sequence();

        record.set_remote_revision(
            RemoteId::new(2),
            Some(Revision::new(vector("*@5"), b"{}".to_vec(), DocumentFlags::NONE)),
        );
        assert_eq!(record.save(&mut tx).unwrap(), SaveResult::NoNewSequence);
        assert_eq!(record.sequence(), first);
        assert_eq!(record.save(&mut tx).unwrap(), SaveResult::NoSave);
        tx.commit().unwrap();
    }

    #[test]
    fn test_local_flags_are_masked() {
        let mut record = VectorRecord::new("doc1");
        record.set_current_revision(Revision::new(
            vector("*@1"),
            Vec::new(),
            DocumentFlags::DELETED | DocumentFlags::CONFLICTED,
        ));
        assert_eq!(record.compute_flags(), DocumentFlags::DELETED);
    }
}
