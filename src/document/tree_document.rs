//! Revision-tree documents
//!
//! - New local revisions get a digest ID one generation past their parent
//! - Remote histories are grafted in with `insert_history`
//! - Conflict resolution adds a merge child of the winner and either purges
//!   the loser or closes it with a deleted tombstone
//! - Saves prune to the request's depth and keep remote heads
//!
//! # Invariants
//!
//! - A conflicting branch never becomes the current revision
//! - Failed insertions leave the tree untouched

use std::sync::Arc;

use super::context::DocumentContext;
use super::delta::{apply_json_delta, contains_encryptable};
use super::request::PutRequest;
use super::SelectedRevision;
use crate::errors::{RevError, RevResult};
use crate::observability::{log_event, Event};
use crate::rev_tree::{RevFlags, RevIndex, RevTree, RevTreeRecord, SaveResult, HISTORY_CONFLICT};
use crate::revid::{RemoteId, RevId, TreeRevId};
use crate::storage::{DocumentFlags, Record, Sequence, Transaction};

fn tree_id(rev_id: &RevId) -> RevResult<&TreeRevId> {
    rev_id
        .as_tree()
        .ok_or_else(|| RevError::bad_revision_id(format!("{} is not a tree revision ID", rev_id)))
}

fn rev_flags(deleted: bool, has_attachments: bool) -> RevFlags {
    let mut flags = RevFlags::NONE;
    if deleted {
        flags.insert(RevFlags::DELETED);
    }
    if has_attachments {
        flags.insert(RevFlags::HAS_ATTACHMENTS);
    }
    flags
}

/// A document whose history is a revision tree.
///
/// The selected revision is remembered by ID, so it survives the re-sorting
/// every tree mutation does.
pub struct TreeDocument {
    ctx: Arc<DocumentContext>,
    record: RevTreeRecord,
    selected: Option<TreeRevId>,
}

impl TreeDocument {
    pub(crate) fn new(ctx: Arc<DocumentContext>, doc_id: impl Into<String>) -> Self {
        Self {
            ctx,
            record: RevTreeRecord::new(doc_id),
            selected: None,
        }
    }

    pub(crate) fn from_record(ctx: Arc<DocumentContext>, record: &Record) -> RevResult<Self> {
        let record = RevTreeRecord::from_record(record)?;
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
        !self.tree().is_empty()
    }

    pub fn flags(&self) -> DocumentFlags {
        self.record.compute_flags()
    }

    pub fn rev_id(&self) -> Option<RevId> {
        self.record.current_rev_id().cloned().map(RevId::Tree)
    }

    #[inline]
    pub fn sequence(&self) -> Sequence {
        self.record.sequence()
    }

    #[inline]
    pub fn tree(&self) -> &RevTree {
        self.record.tree()
    }

    // ==================
    // Selection
    // ==================

    fn selected_index(&self) -> Option<RevIndex> {
        self.selected.as_ref().and_then(|id| self.tree().find(id))
    }

    fn select_index(&mut self, index: Option<RevIndex>) -> bool {
        self.selected = index
            .and_then(|i| self.record.tree().get(i))
            .map(|rev| rev.rev_id().clone());
        self.selected.is_some()
    }

    pub fn selected(&self) -> Option<SelectedRevision> {
        let rev = self.tree().get(self.selected_index()?)?;
        Some(SelectedRevision {
            rev_id: RevId::Tree(rev.rev_id().clone()),
            flags: rev.flags(),
            sequence: rev.sequence(),
            body: rev.body().map(<[u8]>::to_vec),
            remote: None,
        })
    }

    /// Select `rev_id`. With `with_body`, also require its body to be available.
    pub fn select_revision(&mut self, rev_id: &RevId, with_body: bool) -> bool {
        let index = rev_id.as_tree().and_then(|id| self.tree().find(id));
        if !self.select_index(index) {
            return false;
        }
        !with_body
            || index
                .and_then(|i| self.tree().get(i))
                .is_some_and(|rev| rev.body().is_some())
    }

    pub fn select_current_revision(&mut self) -> bool {
        let current = self.tree().current();
        self.select_index(current)
    }

    pub fn select_parent_revision(&mut self) -> bool {
        let parent = self.selected_index().and_then(|i| self.tree().parent_of(i));
        self.select_index(parent)
    }

    /// Next revision in priority order
    pub fn select_next_revision(&mut self) -> bool {
        let next = self
            .selected_index()
            .map(|i| i + 1)
            .filter(|&i| i < self.tree().len());
        self.select_index(next)
    }

    pub fn select_next_leaf_revision(&mut self, include_deleted: bool) -> bool {
        let Some(start) = self.selected_index() else {
            return false;
        };
        let tree = self.tree();
        let next = (start + 1..tree.len()).find(|&i| {
            tree.get(i)
                .is_some_and(|rev| rev.is_leaf() && (include_deleted || !rev.is_deleted()))
        });
        self.select_index(next)
    }

    pub fn select_common_ancestor_revision(&mut self, a: &RevId, b: &RevId) -> bool {
        let tree = self.tree();
        let find = |rev_id: &RevId| rev_id.as_tree().and_then(|id| tree.find(id));
        let ancestor = match (find(a), find(b)) {
            (Some(a), Some(b)) => tree.common_ancestor(a, b),
            _ => None,
        };
        self.select_index(ancestor)
    }

    /// Comma-separated IDs from the selected revision back through its
    /// ancestors. Stops after `max_count` IDs (0 = no limit) or after the
    /// first ID found in `stop_at`.
    pub fn get_revision_history(&self, max_count: usize, stop_at: &[RevId]) -> String {
        let Some(start) = self.selected_index() else {
            return String::new();
        };
        let tree = self.tree();
        let mut ids = Vec::new();
        for rev in tree.history(start).into_iter().filter_map(|i| tree.get(i)) {
            if max_count > 0 && ids.len() >= max_count {
                break;
            }
            ids.push(rev.rev_id().to_string());
            if stop_at.iter().any(|s| s.as_tree() == Some(rev.rev_id())) {
                break;
            }
        }
        ids.join(",")
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
        let tree = self.tree();
        let base = source
            .as_tree()
            .and_then(|id| tree.find(id))
            .and_then(|i| tree.get(i))
            .and_then(|rev| rev.body())
            .ok_or_else(|| RevError::DeltaBaseUnknown(source.to_string()))?;
        apply_json_delta(base, &rq.body)
    }

    /// Create a revision from a local edit. Its parent is `rq.history[0]`, or
    /// the current revision if that is a tombstone.
    ///
    /// Returns false if an identical revision already existed.
    pub fn put_new_revision(&mut self, rq: &PutRequest, tx: &mut Transaction<'_>) -> RevResult<bool> {
        let parent = match rq.history.first() {
            Some(ascii) => {
                let id = TreeRevId::parse(ascii).map_err(|e| self.rejected(e))?;
                match self.tree().find(&id) {
                    Some(index) => Some(index),
                    None => {
                        return Err(self.rejected(RevError::not_found(format!("parent revision {}", id))))
                    }
                }
            }
            None => match self.tree().current_rev() {
                Some(current) if current.is_deleted() => self.tree().current(),
                Some(current) => {
                    let err = RevError::conflict(format!("document exists at {}", current.rev_id()));
                    return Err(self.rejected(err));
                }
                None => None,
            },
        };

        let body = self.resolve_body(rq)?;
        let parent_id = parent
            .and_then(|i| self.tree().get(i))
            .map(|rev| rev.rev_id().clone());
        let rev_id = if contains_encryptable(&body) {
            TreeRevId::random(parent_id.as_ref())
        } else {
            TreeRevId::generate(parent_id.as_ref(), &body, rq.deletion)
        };

        let flags = rev_flags(rq.deletion, rq.has_attachments);
        let inserted = match self.record.tree_mut().insert(
            rev_id.clone(),
            body,
            flags,
            parent,
            rq.allow_conflict,
            false,
        ) {
            Ok(inserted) => inserted,
            Err(e) => return Err(self.rejected(e)),
        };
        let created = inserted.is_some();
        if created {
            self.ctx.metrics().increment_revisions_inserted();
            log_event(
                Event::RevisionInserted,
                &[("doc_id", self.doc_id()), ("rev_id", &rev_id.to_string())],
            );
        }
        self.selected = Some(rev_id);
        if rq.save {
            self.save_requested(rq, tx)?;
        }
        Ok(created)
    }

    /// Insert a revision made elsewhere, with its ancestors newest first.
    ///
    /// Returns the index in `rq.history` of the first revision that was
    /// already known (0 if the revision itself was).
    pub fn put_existing_revision(&mut self, rq: &PutRequest, tx: &mut Transaction<'_>) -> RevResult<usize> {
        let history = rq
            .history
            .iter()
            .map(|ascii| TreeRevId::parse(ascii))
            .collect::<RevResult<Vec<_>>>()
            .map_err(|e| self.rejected(e))?;
        let Some(new_id) = history.first().cloned() else {
            return Err(self.rejected(RevError::bad_revision_id("empty revision history")));
        };
        let body = self.resolve_body(rq)?;
        let remote = rq.remote_db_id;
        let old_remote = if remote.is_local() {
            None
        } else {
            self.tree()
                .remote_revision(remote)
                .and_then(|i| self.tree().get(i))
                .map(|rev| rev.rev_id().clone())
        };

        let flags = rev_flags(rq.deletion, rq.has_attachments);
        let common = self.record.tree_mut().insert_history(
            &history,
            body,
            flags,
            rq.allow_conflict,
            !remote.is_local(),
        );
        if common == HISTORY_CONFLICT {
            let err = RevError::conflict(format!("{} does not extend a leaf", new_id));
            return Err(self.rejected(err));
        }
        if common < 0 {
            let err = RevError::bad_revision_id(format!("invalid history for {}", new_id));
            return Err(self.rejected(err));
        }
        let common = common as usize;

        if common > 0 {
            self.ctx.metrics().increment_revisions_inserted();
            log_event(
                Event::RevisionInserted,
                &[
                    ("doc_id", self.doc_id()),
                    ("rev_id", &new_id.to_string()),
                    ("remote", &remote.to_string()),
                ],
            );
            let tree = self.tree();
            let is_conflict = tree
                .find(&new_id)
                .and_then(|i| tree.get(i))
                .is_some_and(|rev| rev.is_conflict());
            if is_conflict {
                self.ctx.metrics().increment_conflicts_detected();
                log_event(
                    Event::ConflictDetected,
                    &[("doc_id", self.doc_id()), ("rev_id", &new_id.to_string())],
                );
            }
        }

        if !remote.is_local() {
            if let Some(old) = old_remote.filter(|old| *old != new_id) {
                self.switch_remote_branch(remote, &old, &new_id);
            }
            let index = self.tree().find(&new_id);
            self.record.tree_mut().set_remote_revision(remote, index);
        }

        self.selected = Some(new_id);
        if rq.save {
            self.save_requested(rq, tx)?;
        }
        Ok(common)
    }

    /// `remote` moved from `old` to `new`. If `new` does not descend from
    /// `old`, the remote switched branches and `old` may be obsolete.
    fn switch_remote_branch(&mut self, remote: RemoteId, old: &TreeRevId, new: &TreeRevId) {
        let tree = self.tree();
        let (Some(old_index), Some(new_index)) = (tree.find(old), tree.find(new)) else {
            return;
        };
        if tree.is_ancestor_of(old_index, new_index) {
            return;
        }
        let was_conflict = tree.get(old_index).is_some_and(|rev| rev.is_conflict());
        let was_current = tree.current() == Some(old_index);
        let fields = [
            ("doc_id", self.doc_id().to_string()),
            ("remote", remote.to_string()),
            ("from", old.to_string()),
            ("to", new.to_string()),
        ];
        let fields: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();

        if was_conflict || was_current {
            let tree = self.record.tree_mut();
            if !was_conflict {
                tree.mark_branch_as_not_conflict(new_index);
            }
            let purged = tree.purge(old);
            self.ctx.metrics().add_revisions_purged(purged as u64);
            log_event(Event::BranchSwitch, &fields);
        } else {
            log_event(Event::AmbiguousBranchSwitch, &fields);
        }
    }

    /// Resolve a conflict between two leaves.
    ///
    /// Both branches stop being conflicts. The loser is purged or closed with
    /// a tombstone, and a merge revision (the winner's body unless
    /// `merged_body` is given) is added on top of the winner.
    pub fn resolve_conflict(
        &mut self,
        winner: &RevId,
        loser: &RevId,
        merged_body: Option<Vec<u8>>,
        merged_flags: DocumentFlags,
        prune_loser: bool,
    ) -> RevResult<()> {
        if winner == loser {
            return Err(RevError::invalid_parameter("winner and loser are the same revision"));
        }
        let winner_id = tree_id(winner)?.clone();
        let loser_id = tree_id(loser)?.clone();
        let tree = self.tree();
        let find = |id: &TreeRevId| {
            tree.find(id)
                .ok_or_else(|| RevError::not_found(format!("revision {}", id)))
        };
        let winner_index = find(&winner_id)?;
        let loser_index = find(&loser_id)?;
        let (Some(winner_rev), Some(loser_rev)) = (tree.get(winner_index), tree.get(loser_index)) else {
            return Err(RevError::not_found("conflicting revisions"));
        };
        if !winner_rev.is_leaf() || !loser_rev.is_leaf() {
            return Err(RevError::conflict("conflict resolution needs two leaf revisions"));
        }
        let (body, flags) = match merged_body {
            Some(body) => (
                body,
                rev_flags(
                    merged_flags.contains(DocumentFlags::DELETED),
                    merged_flags.contains(DocumentFlags::HAS_ATTACHMENTS),
                ),
            ),
            None => (
                winner_rev.body().unwrap_or_default().to_vec(),
                winner_rev
                    .flags()
                    .intersection(RevFlags::DELETED | RevFlags::HAS_ATTACHMENTS),
            ),
        };

        let tree = self.record.tree_mut();
        tree.mark_branch_as_not_conflict(winner_index);
        if let Some(index) = tree.find(&loser_id) {
            tree.mark_branch_as_not_conflict(index);
        }
        if prune_loser {
            let purged = tree.purge(&loser_id);
            self.ctx.metrics().add_revisions_purged(purged as u64);
        } else {
            let tombstone = TreeRevId::generate(Some(&loser_id), b"", true);
            tree.insert_with_parent_id(
                tombstone,
                Vec::new(),
                RevFlags::DELETED | RevFlags::CLOSED,
                Some(&loser_id),
                true,
                false,
            )?;
        }
        let merged_id = TreeRevId::generate(Some(&winner_id), &body, flags.contains(RevFlags::DELETED));
        tree.insert_with_parent_id(merged_id.clone(), body, flags, Some(&winner_id), true, false)?;

        self.ctx.metrics().increment_conflicts_resolved();
        log_event(
            Event::ConflictResolved,
            &[
                ("doc_id", self.doc_id()),
                ("winner", &winner_id.to_string()),
                ("loser", &loser_id.to_string()),
                ("merged", &merged_id.to_string()),
            ],
        );
        self.selected = Some(merged_id);
        Ok(())
    }

    /// Remove a leaf and the ancestors only it used. Returns how many
    /// revisions went; 0 if `rev_id` is not a leaf.
    pub fn purge_revision(&mut self, rev_id: &RevId) -> RevResult<usize> {
        let id = tree_id(rev_id)?.clone();
        if self.tree().find(&id).is_none() {
            return Err(RevError::not_found(format!("revision {}", id)));
        }
        let purged = self.record.tree_mut().purge(&id);
        if purged > 0 {
            self.ctx.metrics().add_revisions_purged(purged as u64);
            log_event(
                Event::RevisionPurged,
                &[
                    ("doc_id", self.doc_id()),
                    ("rev_id", &id.to_string()),
                    ("count", &purged.to_string()),
                ],
            );
        }
        if self.selected_index().is_none() {
            self.select_current_revision();
        }
        Ok(purged)
    }

    // ==================
    // Remote ancestors
    // ==================

    pub fn remote_ancestor(&self, remote: RemoteId) -> Option<RevId> {
        let tree = self.tree();
        tree.remote_revision(remote)
            .and_then(|i| tree.get(i))
            .map(|rev| RevId::Tree(rev.rev_id().clone()))
    }

    pub fn set_remote_ancestor(&mut self, remote: RemoteId, rev_id: &RevId) -> RevResult<()> {
        let id = tree_id(rev_id)?;
        let index = self
            .tree()
            .find(id)
            .ok_or_else(|| RevError::not_found(format!("revision {}", id)))?;
        self.record.tree_mut().set_remote_revision(remote, Some(index));
        Ok(())
    }

    // ==================
    // Persistence
    // ==================

    /// Prune to the configured depth and save in `tx`
    pub fn save(&mut self, tx: &mut Transaction<'_>) -> RevResult<SaveResult> {
        let depth = self.ctx.config().max_rev_tree_depth;
        self.save_with_depth(tx, depth)
    }

    fn save_requested(&mut self, rq: &PutRequest, tx: &mut Transaction<'_>) -> RevResult<()> {
        let depth = rq
            .max_rev_tree_depth
            .unwrap_or(self.ctx.config().max_rev_tree_depth);
        match self.save_with_depth(tx, depth)? {
            SaveResult::Conflict => Err(RevError::conflict(format!(
                "document {} was changed by another writer",
                self.doc_id()
            ))),
            _ => Ok(()),
        }
    }

    fn save_with_depth(&mut self, tx: &mut Transaction<'_>, depth: u32) -> RevResult<SaveResult> {
        let pruned = self.record.tree_mut().prune(depth);
        if pruned > 0 {
            self.ctx.metrics().add_revisions_pruned(pruned as u64);
            log_event(
                Event::RevisionsPruned,
                &[("doc_id", self.doc_id()), ("count", &pruned.to_string())],
            );
        }

        let result = self.record.save(tx)?;
        match result {
            SaveResult::NewSequence => {
                if let Some(current) = self.tree().current_rev() {
                    tx.document_changed(
                        self.doc_id(),
                        &current.rev_id().to_string(),
                        self.record.sequence(),
                        current.body().map_or(0, <[u8]>::len),
                        self.record.flags(),
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
        if self.selected_index().is_none() {
            self.select_current_revision();
        }
        Ok(result)
    }
}
