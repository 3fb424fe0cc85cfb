//! Version-vector documents
//!
//! - Incoming revisions are compared to the local vector: older or equal ones
//!   are ignored, newer ones replace it, concurrent ones are kept in the
//!   sender's remote slot flagged `CONFLICTED`
//! - Resolving a conflict merges both vectors under a new local version, or
//!   adopts the remote vector when the local side loses without a merge
//! - The local peer appears as `*` until the file's identity is resolved

use std::sync::Arc;

use super::context::DocumentContext;
use super::delta::apply_json_delta;
use super::request::PutRequest;
use super::SelectedRevision;
use crate::errors::{RevError, RevResult};
use crate::observability::{log_event, Event};
use crate::rev_tree::{RevFlags, SaveResult};
use crate::revid::{RemoteId, RevId, SourceId};
use crate::storage::{DocumentFlags, Record, Sequence, Transaction};
use crate::vector_record::{Revision, VectorRecord};
use crate::version_vector::{VersionOrder, VersionVector};

fn revision_flags(remote: RemoteId, rev: &Revision) -> RevFlags {
    let mut flags = RevFlags::NONE;
    if remote.is_local() || rev.is_conflicted() {
        flags.insert(RevFlags::LEAF);
    }
    if rev.is_conflicted() {
        flags.insert(RevFlags::IS_CONFLICT);
    }
    if rev.is_deleted() {
        flags.insert(RevFlags::DELETED);
    }
    if rev.has_attachments() {
        flags.insert(RevFlags::HAS_ATTACHMENTS);
    }
    flags
}

fn request_flags(rq: &PutRequest) -> DocumentFlags {
    DocumentFlags::NONE
        .with(DocumentFlags::DELETED, rq.deletion)
        .with(DocumentFlags::HAS_ATTACHMENTS, rq.has_attachments)
}

/// A document whose history is one version vector per remote
pub struct VectorDocument {
    ctx: Arc<DocumentContext>,
    record: VectorRecord,
    selected: Option<RemoteId>,
}

impl VectorDocument {
    pub(crate) fn new(ctx: Arc<DocumentContext>, doc_id: impl Into<String>) -> Self {
        Self {
            ctx,
            record: VectorRecord::new(doc_id),
            selected: None,
        }
    }

    pub(crate) fn from_record(ctx: Arc<DocumentContext>, record: &Record) -> RevResult<Self> {
        let record = VectorRecord::from_record(record)?;
        let mut doc = Self {
            ctx,
            record,
            selected: None,
        };
        doc.select_current_revision();
        Ok(doc)
    }

    #[inline]
    pub fn doc_id(&self) -> &str {
        self.record.doc_id()
    }

    pub fn exists(&self) -> bool {
        self.record.current_revision().is_some()
    }

    pub fn flags(&self) -> DocumentFlags {
        self.record.compute_flags()
    }

    pub fn rev_id(&self) -> Option<RevId> {
        self.record.current_revision().and_then(Revision::rev_id)
    }

    #[inline]
    pub fn sequence(&self) -> Sequence {
        self.record.sequence()
    }

    /// The local revision's vector
    pub fn current_vector(&self) -> Option<&VersionVector> {
        self.record.current_revision().map(|rev| &rev.vector)
    }

    pub fn remote_vector(&self, remote: RemoteId) -> Option<&VersionVector> {
        self.record.remote_revision(remote).map(|rev| &rev.vector)
    }

    /// Rewrite an expanded local ID back to `*`
    fn normalize(&self, rev_id: &RevId) -> RevId {
        match (rev_id, self.ctx.local_source()) {
            (RevId::Version(v), Some(me)) if v.author() == me => RevId::Version(v.with_author(SourceId::ME)),
            _ => rev_id.clone(),
        }
    }

    // ==================
    // Selection
    // ==================

    pub fn selected(&self) -> Option<SelectedRevision> {
        let remote = self.selected?;
        let rev = self.record.remote_revision(remote)?;
        Some(SelectedRevision {
            rev_id: rev.rev_id()?,
            flags: revision_flags(remote, rev),
            sequence: self.record.sequence(),
            body: Some(rev.body.clone()),
            remote: Some(remote),
        })
    }

    /// Select the revision named `rev_id`. Bodies are always loaded.
    pub fn select_revision(&mut self, rev_id: &RevId, _with_body: bool) -> bool {
        let rev_id = self.normalize(rev_id);
        self.selected = self.record.find(&rev_id);
        self.selected.is_some()
    }

    pub fn select_current_revision(&mut self) -> bool {
        self.select_remote(RemoteId::LOCAL)
    }

    pub fn select_remote(&mut self, remote: RemoteId) -> bool {
        self.selected = self.record.remote_revision(remote).map(|_| remote);
        self.selected.is_some()
    }

    /// Local revision first, then remotes in ID order
    pub fn select_next_revision(&mut self) -> bool {
        self.selected = self.selected.and_then(|r| self.record.next_remote(r));
        self.selected.is_some()
    }

    /// Without a tree the only other leaves are conflicting remote revisions
    pub fn select_next_leaf_revision(&mut self, include_deleted: bool) -> bool {
        let mut cursor = self.selected;
        while let Some(remote) = cursor.and_then(|r| self.record.next_remote(r)) {
            cursor = Some(remote);
            let is_leaf = self
                .record
                .remote_revision(remote)
                .is_some_and(|rev| rev.is_conflicted() && (include_deleted || !rev.is_deleted()));
            if is_leaf {
                self.selected = Some(remote);
                return true;
            }
        }
        self.selected = None;
        false
    }

    /// The selected revision's vector, with `*` expanded once the local
    /// identity is known. A vector is its own history, so `stop_at` is not
    /// consulted.
    pub fn get_revision_history(&self, max_count: usize, _stop_at: &[RevId]) -> String {
        let Some(rev) = self.selected.and_then(|r| self.record.remote_revision(r)) else {
            return String::new();
        };
        let mut vector = rev.vector.clone();
        if max_count > 0 {
            vector.limit_count(max_count);
        }
        vector.to_ascii(self.ctx.local_source())
    }

    // ==================
    // Insertion
    // ==================

    fn rejected(&self, err: RevError) -> RevError {
        log_event(
            Event::RevisionRejected,
            &[("doc_id", self.doc_id()), ("error", &err.to_string())],
        );
        err
    }

    fn resolve_body(&self, rq: &PutRequest) -> RevResult<Vec<u8>> {
        let Some(source) = &rq.delta_source_rev_id else {
            return Ok(rq.body.clone());
        };
        let base = self
            .record
            .find(&self.normalize(source))
            .and_then(|r| self.record.remote_revision(r))
            .ok_or_else(|| RevError::DeltaBaseUnknown(source.to_string()))?;
        apply_json_delta(&base.body, &rq.body)
    }

    /// Create a local revision: the current vector plus a new local version.
    /// `rq.history[0]`, if given, must name the current revision.
    pub fn put_new_revision(&mut self, rq: &PutRequest, tx: &mut Transaction<'_>) -> RevResult<bool> {
        let current = self.record.current_revision();
        match rq.history.first() {
            Some(ascii) => {
                let parent = RevId::parse(ascii).map_err(|e| self.rejected(e))?;
                let parent = self.normalize(&parent);
                if !current.is_some_and(|rev| rev.matches(&parent)) {
                    let err = RevError::conflict(format!("{} is not the current revision", parent));
                    return Err(self.rejected(err));
                }
            }
            None => {
                if current.is_some_and(|rev| !rev.is_deleted()) {
                    return Err(self.rejected(RevError::conflict("document already exists")));
                }
            }
        }

        let body = self.resolve_body(rq)?;
        let mut vector = self
            .record
            .current_revision()
            .map(|rev| rev.vector.clone())
            .unwrap_or_default();
        // New local version takes hybrid-clock time, not one tick past the
        // previous local time
        let version = vector.add_new_version(self.ctx.clock());
        self.record
            .set_current_revision(Revision::new(vector, body, request_flags(rq)));

        self.ctx.metrics().increment_revisions_inserted();
        log_event(
            Event::RevisionInserted,
            &[
                ("doc_id", self.doc_id()),
                ("rev_id", &version.to_ascii(self.ctx.local_source())),
            ],
        );
        self.selected = Some(RemoteId::LOCAL);
        if rq.save {
            self.save_requested(tx)?;
        }
        Ok(true)
    }

    /// Insert a revision received from `rq.remote_db_id`.
    ///
    /// Returns 0 if the local revision already includes it, 1 if it was
    /// added (as the new local revision, or as a conflicting remote one).
    pub fn put_existing_revision(&mut self, rq: &PutRequest, tx: &mut Transaction<'_>) -> RevResult<usize> {
        let history: Vec<&str> = rq.history.iter().map(String::as_str).collect();
        let incoming = VersionVector::read_history(&history, self.ctx.local_source())
            .map_err(|e| self.rejected(e))?;
        let Some(version) = incoming.current_version() else {
            return Err(self.rejected(RevError::bad_revision_id("empty version vector")));
        };
        for v in incoming.versions().iter().filter(|v| !v.author().is_me()) {
            self.ctx.clock().see(v.time());
        }
        let body = self.resolve_body(rq)?;
        let flags = request_flags(rq);
        let remote = rq.remote_db_id;
        let rev_ascii = version.to_ascii(self.ctx.local_source());

        let order = match self.record.current_revision() {
            Some(local) => incoming.compare(&local.vector),
            None => VersionOrder::Newer,
        };
        let added = match order {
            VersionOrder::Same | VersionOrder::Older => {
                self.selected = Some(RemoteId::LOCAL);
                0
            }
            VersionOrder::Newer => {
                self.record
                    .set_current_revision(Revision::new(incoming.clone(), body.clone(), flags));
                self.ctx.metrics().increment_revisions_inserted();
                log_event(
                    Event::RevisionInserted,
                    &[
                        ("doc_id", self.doc_id()),
                        ("rev_id", &rev_ascii),
                        ("remote", &remote.to_string()),
                    ],
                );
                self.selected = Some(RemoteId::LOCAL);
                1
            }
            VersionOrder::Conflicting => {
                if remote.is_local() {
                    let err = RevError::conflict(format!("{} conflicts with the local revision", rev_ascii));
                    return Err(self.rejected(err));
                }
                self.record.set_remote_revision(
                    remote,
                    Some(Revision::new(
                        incoming.clone(),
                        body.clone(),
                        flags | DocumentFlags::CONFLICTED,
                    )),
                );
                self.ctx.metrics().increment_revisions_inserted();
                self.ctx.metrics().increment_conflicts_detected();
                log_event(
                    Event::ConflictDetected,
                    &[
                        ("doc_id", self.doc_id()),
                        ("rev_id", &rev_ascii),
                        ("remote", &remote.to_string()),
                    ],
                );
                self.selected = Some(remote);
                1
            }
        };
        if !remote.is_local() && order != VersionOrder::Conflicting {
            self.record
                .set_remote_revision(remote, Some(Revision::new(incoming, body, flags)));
        }

        if rq.save {
            self.save_requested(tx)?;
        }
        Ok(added)
    }

    /// Resolve the conflict between the local revision and a conflicting
    /// remote revision.
    ///
    /// The result is a merge of both vectors plus a new local version, with
    /// the winner's body unless `merged_body` is given. If the local revision
    /// lost, no merged body is given, and every local change is attributed to
    /// this peer alone, the remote revision is adopted as-is instead. That
    /// assumes the losing local revision was never seen by another peer.
    ///
    /// Vectors keep one revision per remote, so `prune_loser` has no effect.
    pub fn resolve_conflict(
        &mut self,
        winner: &RevId,
        loser: &RevId,
        merged_body: Option<Vec<u8>>,
        merged_flags: DocumentFlags,
        _prune_loser: bool,
    ) -> RevResult<()> {
        if winner == loser {
            return Err(RevError::invalid_parameter("winner and loser are the same revision"));
        }
        let find = |rev_id: &RevId| {
            self.record
                .find(&self.normalize(rev_id))
                .ok_or_else(|| RevError::not_found(format!("revision {}", rev_id)))
        };
        let winner_slot = find(winner)?;
        let loser_slot = find(loser)?;
        let remote_slot = match (winner_slot.is_local(), loser_slot.is_local()) {
            (true, false) => loser_slot,
            (false, true) => winner_slot,
            _ => {
                return Err(RevError::invalid_parameter(
                    "conflict resolution needs the local revision and one remote revision",
                ))
            }
        };
        let (Some(local), Some(remote)) = (
            self.record.current_revision(),
            self.record.remote_revision(remote_slot),
        ) else {
            return Err(RevError::not_found("conflicting revisions"));
        };
        if !remote.is_conflicted() {
            return Err(RevError::invalid_parameter(format!(
                "remote {} is not in conflict",
                remote_slot
            )));
        }

        let adopt_remote = loser_slot.is_local()
            && merged_body.is_none()
            && !local.vector.is_newer_ignoring(SourceId::ME, &remote.vector);
        let resolved = if adopt_remote {
            Revision::new(remote.vector.clone(), remote.body.clone(), remote.flags)
        } else {
            let mut vector = local.vector.merged_with(&remote.vector);
            vector.add_new_version(self.ctx.clock());
            let winner_rev = if winner_slot.is_local() { local } else { remote };
            match merged_body {
                Some(body) => Revision::new(vector, body, merged_flags),
                None => Revision::new(vector, winner_rev.body.clone(), winner_rev.flags),
            }
        };
        let resolved_ascii = resolved.rev_id_ascii(self.ctx.local_source());
        self.record.set_current_revision(resolved);
        self.record
            .update_flags(remote_slot, DocumentFlags::CONFLICTED, false);

        self.ctx.metrics().increment_conflicts_resolved();
        log_event(
            Event::ConflictResolved,
            &[
                ("doc_id", self.doc_id()),
                ("remote", &remote_slot.to_string()),
                ("merged", &resolved_ascii),
                ("adopted_remote", if adopt_remote { "true" } else { "false" }),
            ],
        );
        self.selected = Some(RemoteId::LOCAL);
        Ok(())
    }

    /// Purging the local revision purges the whole document; purging a
    /// remote's revision forgets that remote's state.
    pub fn purge_revision(&mut self, rev_id: &RevId) -> RevResult<usize> {
        let slot = self
            .record
            .find(&self.normalize(rev_id))
            .ok_or_else(|| RevError::not_found(format!("revision {}", rev_id)))?;
        let purged = if slot.is_local() {
            self.record.purge_all()
        } else {
            self.record.set_remote_revision(slot, None);
            1
        };
        self.ctx.metrics().add_revisions_purged(purged as u64);
        log_event(
            Event::RevisionPurged,
            &[
                ("doc_id", self.doc_id()),
                ("rev_id", &rev_id.to_string()),
                ("count", &purged.to_string()),
            ],
        );
        if self.selected.and_then(|r| self.record.remote_revision(r)).is_none() {
            self.select_current_revision();
        }
        Ok(purged)
    }

    // ==================
    // Remote ancestors
    // ==================

    pub fn remote_ancestor(&self, remote: RemoteId) -> Option<RevId> {
        self.record.remote_revision(remote).and_then(Revision::rev_id)
    }

    /// Record that `remote` has the revision named `rev_id`
    pub fn set_remote_ancestor(&mut self, remote: RemoteId, rev_id: &RevId) -> RevResult<()> {
        let slot = self
            .record
            .find(&self.normalize(rev_id))
            .ok_or_else(|| RevError::not_found(format!("revision {}", rev_id)))?;
        let mut rev = self
            .record
            .remote_revision(slot)
            .cloned()
            .ok_or_else(|| RevError::not_found(format!("revision {}", rev_id)))?;
        rev.flags.remove(DocumentFlags::CONFLICTED);
        self.record.set_remote_revision(remote, Some(rev));
        Ok(())
    }

    // ==================
    // Persistence
    // ==================

    pub fn save(&mut self, tx: &mut Transaction<'_>) -> RevResult<SaveResult> {
        let result = self.record.save(tx)?;
        match result {
            SaveResult::NewSequence => {
                if let Some(current) = self.record.current_revision() {
                    tx.document_changed(
                        self.doc_id(),
                        &current.rev_id_ascii(self.ctx.local_source()),
                        self.record.sequence(),
                        current.body.len(),
                        self.record.compute_flags(),
                    );
                }
                self.ctx.metrics().increment_documents_saved();
                log_event(
                    Event::DocumentSaved,
                    &[
                        ("doc_id", self.doc_id()),
                        ("sequence", &self.record.sequence().to_string()),
                    ],
                );
            }
            SaveResult::NoNewSequence => self.ctx.metrics().increment_documents_saved(),
            SaveResult::Purged => {
                tx.document_purged(self.doc_id());
                log_event(Event::DocumentSaved, &[("doc_id", self.doc_id()), ("purged", "true")]);
            }
            SaveResult::NoSave | SaveResult::Conflict => {}
        }
        Ok(result)
    }

    fn save_requested(&mut self, tx: &mut Transaction<'_>) -> RevResult<()> {
        match self.save(tx)? {
            SaveResult::Conflict => Err(RevError::conflict(format!(
                "document {} was changed by another writer",
                self.doc_id()
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VersioningConfig;
    use crate::document::DocumentFactory;
    use crate::storage::DataFile;

    const PEER_A: &str = "AAECAwQFBgcICQoLDA0ODw";

    fn factory() -> DocumentFactory {
        DocumentFactory::open(DataFile::in_memory(), VersioningConfig::version_vectors()).unwrap()
    }

    fn vector_doc(factory: &DocumentFactory, id: &str) -> VectorDocument {
        VectorDocument::new(Arc::clone(factory.context()), id)
    }

    #[test]
    fn test_local_edits_advance_local_version() {
        let factory = factory();
        let mut doc = vector_doc(&factory, "doc");
        let mut tx = factory.begin_transaction().unwrap();
        doc.put_new_revision(&PutRequest::new_revision("doc", b"{}".to_vec(), None), &mut tx)
            .unwrap();
        let first = doc.current_vector().unwrap().time_of(SourceId::ME);
        let parent = doc.rev_id().unwrap();
        doc.put_new_revision(
            &PutRequest::new_revision("doc", b"{\"a\":1}".to_vec(), Some(&parent)),
            &mut tx,
        )
        .unwrap();
        let vector = doc.current_vector().unwrap();
        assert_eq!(vector.count(), 1);
        assert!(vector.time_of(SourceId::ME) > first);
    }

    #[test]
    fn test_stale_parent_conflicts() {
        let factory = factory();
        let mut doc = vector_doc(&factory, "doc");
        let mut tx = factory.begin_transaction().unwrap();
        doc.put_new_revision(&PutRequest::new_revision("doc", b"{}".to_vec(), None), &mut tx)
            .unwrap();
        let stale = doc.rev_id().unwrap();
        doc.put_new_revision(&PutRequest::new_revision("doc", b"{}".to_vec(), Some(&stale)), &mut tx)
            .unwrap();
        let err = doc
            .put_new_revision(&PutRequest::new_revision("doc", b"{}".to_vec(), Some(&stale)), &mut tx)
            .unwrap_err();
        assert_eq!(err.code(), "AERO_REV_CONFLICT");
    }

    #[test]
    fn test_conflicting_remote_is_kept_aside() {
        let factory = factory();
        let mut doc = vector_doc(&factory, "doc");
        let mut tx = factory.begin_transaction().unwrap();
        doc.put_existing_revision(
            &PutRequest::existing("doc", b"{\"v\":1}".to_vec(), &["*@5"], RemoteId::LOCAL),
            &mut tx,
        )
        .unwrap();
        let remote = format!("{}@5,*@3", PEER_A);
        let added = doc
            .put_existing_revision(
                &PutRequest::existing("doc", b"{\"v\":2}".to_vec(), &[remote.as_str()], RemoteId::new(1)),
                &mut tx,
            )
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(doc.current_vector().unwrap().to_ascii(None), "*@5");
        assert!(doc.flags().contains(DocumentFlags::CONFLICTED));
        assert!(doc.select_current_revision());
        assert!(doc.select_next_leaf_revision(false));
        assert_eq!(doc.selected().unwrap().remote, Some(RemoteId::new(1)));
    }
}
