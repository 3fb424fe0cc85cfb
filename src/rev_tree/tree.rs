//! Revision tree
//!
//! - Index arena, parents referenced by index
//! - Kept sorted so index 0 is the current (winning) revision
//! - Winner order: leaves, then live, then non-conflict, then higher ID
//! - Remote heads tracked per `RemoteId` and spared by `prune`
//!
//! # Invariants
//!
//! - A child's generation is exactly its parent's plus one
//! - Revision IDs are unique

use std::collections::{BTreeMap, HashSet};

use super::rev::{Rev, RevFlags, RevIndex};
use crate::errors::{RevError, RevResult};
use crate::revid::{RemoteId, TreeRevId};
use crate::storage::Sequence;

/// Status of a history insertion that failed
pub const HISTORY_MALFORMED: i32 = -400;
pub const HISTORY_CONFLICT: i32 = -409;

/// Arena of revisions forming one document's history.
///
/// The arena is kept sorted by winner priority after every mutation, so the
/// current revision is always at index 0. Indices handed out are only valid
/// until the next mutation.
#[derive(Debug, Clone, Default)]
pub struct RevTree {
    revs: Vec<Rev>,
    remote_revs: BTreeMap<RemoteId, TreeRevId>,
    changed: bool,
}

impl RevTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from decoded parts. Revisions are re-sorted.
    pub(crate) fn from_parts(revs: Vec<Rev>, remote_revs: BTreeMap<RemoteId, TreeRevId>) -> Self {
        let mut tree = Self {
            revs,
            remote_revs,
            changed: false,
        };
        tree.sort();
        tree
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.revs.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.revs.len()
    }

    /// Whether the tree differs from what was last loaded or saved
    #[inline]
    pub fn changed(&self) -> bool {
        self.changed
    }

    #[inline]
    pub fn get(&self, index: RevIndex) -> Option<&Rev> {
        self.revs.get(index)
    }

    pub fn revs(&self) -> impl Iterator<Item = &Rev> {
        self.revs.iter()
    }

    pub fn find(&self, rev_id: &TreeRevId) -> Option<RevIndex> {
        self.revs.iter().position(|r| r.rev_id == *rev_id)
    }

    pub fn find_by_sequence(&self, sequence: Sequence) -> Option<RevIndex> {
        self.revs.iter().position(|r| r.sequence == sequence)
    }

    /// The winning revision
    pub fn current(&self) -> Option<RevIndex> {
        if self.revs.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    pub fn current_rev(&self) -> Option<&Rev> {
        self.revs.first()
    }

    pub fn parent_of(&self, index: RevIndex) -> Option<RevIndex> {
        self.revs.get(index).and_then(|r| r.parent)
    }

    /// `index` followed by its ancestors, newest first
    pub fn history(&self, index: RevIndex) -> Vec<RevIndex> {
        let mut out = Vec::new();
        let mut cursor = Some(index).filter(|&i| i < self.revs.len());
        while let Some(i) = cursor {
            out.push(i);
            cursor = self.revs[i].parent;
        }
        out
    }

    pub fn is_ancestor_of(&self, ancestor: RevIndex, descendant: RevIndex) -> bool {
        self.history(descendant).contains(&ancestor)
    }

    /// More than one live leaf
    pub fn has_conflict(&self) -> bool {
        self.revs.iter().filter(|r| r.is_active()).take(2).count() > 1
    }

    /// Nearest revision that is an ancestor of (or equal to) both
    pub fn common_ancestor(&self, a: RevIndex, b: RevIndex) -> Option<RevIndex> {
        let ancestors: HashSet<RevIndex> = self.history(a).into_iter().collect();
        self.history(b).into_iter().find(|i| ancestors.contains(i))
    }

    // ==================
    // Insertion
    // ==================

    /// Insert a revision as a child of `parent` (or as a root).
    ///
    /// Returns `Ok(None)` if the revision already exists.
    pub fn insert(
        &mut self,
        rev_id: TreeRevId,
        body: Vec<u8>,
        flags: RevFlags,
        parent: Option<RevIndex>,
        allow_conflict: bool,
        mark_conflict: bool,
    ) -> RevResult<Option<RevIndex>> {
        if self.find(&rev_id).is_some() {
            return Ok(None);
        }
        let parent_generation = match parent {
            Some(p) => {
                let parent_rev = self
                    .revs
                    .get(p)
                    .ok_or_else(|| RevError::not_found("parent revision"))?;
                if !allow_conflict && !parent_rev.is_leaf() {
                    return Err(RevError::conflict(format!(
                        "parent {} is not a leaf",
                        parent_rev.rev_id
                    )));
                }
                parent_rev.rev_id.generation()
            }
            None => {
                if !allow_conflict && !self.revs.is_empty() {
                    return Err(RevError::conflict("document already has revisions"));
                }
                0
            }
        };
        if u64::from(rev_id.generation()) != u64::from(parent_generation) + 1 {
            return Err(RevError::bad_revision_id(format!(
                "{} does not follow generation {}",
                rev_id, parent_generation
            )));
        }
        self.insert_unchecked(rev_id.clone(), Some(body), flags, parent, mark_conflict);
        self.sort();
        Ok(self.find(&rev_id))
    }

    /// Like `insert`, naming the parent by ID
    pub fn insert_with_parent_id(
        &mut self,
        rev_id: TreeRevId,
        body: Vec<u8>,
        flags: RevFlags,
        parent_id: Option<&TreeRevId>,
        allow_conflict: bool,
        mark_conflict: bool,
    ) -> RevResult<Option<RevIndex>> {
        let parent = match parent_id {
            Some(id) => Some(
                self.find(id)
                    .ok_or_else(|| RevError::not_found(format!("parent revision {}", id)))?,
            ),
            None => None,
        };
        self.insert(rev_id, body, flags, parent, allow_conflict, mark_conflict)
    }

    /// Graft a peer-supplied history onto the tree.
    ///
    /// `history[0]` is the new revision, followed by its ancestors. Returns the
    /// index in `history` of the first revision already present (so 0 means
    /// nothing was added), `history.len()` if none was present, or
    /// `HISTORY_MALFORMED` / `HISTORY_CONFLICT`.
    pub fn insert_history(
        &mut self,
        history: &[TreeRevId],
        body: Vec<u8>,
        flags: RevFlags,
        allow_conflict: bool,
        mark_conflict: bool,
    ) -> i32 {
        if history.is_empty() {
            return HISTORY_MALFORMED;
        }
        let mut last_generation = 0u32;
        let mut parent = None;
        let mut common = history.len();
        for (i, rev_id) in history.iter().enumerate() {
            let generation = rev_id.generation();
            if last_generation > 0 && generation != last_generation - 1 {
                return HISTORY_MALFORMED;
            }
            last_generation = generation;
            if let Some(found) = self.find(rev_id) {
                parent = Some(found);
                common = i;
                break;
            }
        }
        if common > 0 {
            if !allow_conflict {
                let extends_leaf = match parent {
                    Some(p) => self.revs[p].is_leaf(),
                    None => self.revs.is_empty(),
                };
                if !extends_leaf {
                    return HISTORY_CONFLICT;
                }
            }
            for rev_id in history[1..common].iter().rev() {
                parent = Some(self.insert_unchecked(
                    rev_id.clone(),
                    None,
                    RevFlags::NONE,
                    parent,
                    mark_conflict,
                ));
            }
            self.insert_unchecked(history[0].clone(), Some(body), flags, parent, mark_conflict);
            self.sort();
        }
        common as i32
    }

    fn insert_unchecked(
        &mut self,
        rev_id: TreeRevId,
        body: Option<Vec<u8>>,
        flags: RevFlags,
        parent: Option<RevIndex>,
        mark_conflict: bool,
    ) -> RevIndex {
        let mut flags = flags.intersection(RevFlags::INSERTABLE) | RevFlags::LEAF | RevFlags::NEW;
        match parent {
            Some(p) => {
                let parent_rev = &mut self.revs[p];
                if mark_conflict && (!parent_rev.is_leaf() || parent_rev.is_conflict()) {
                    // Creating or extending a conflicting branch
                    flags.insert(RevFlags::IS_CONFLICT);
                }
                parent_rev.flags.remove(RevFlags::LEAF);
            }
            None => {
                if mark_conflict && !self.revs.is_empty() {
                    flags.insert(RevFlags::IS_CONFLICT);
                }
            }
        }
        self.revs.push(Rev {
            rev_id,
            parent,
            flags,
            body: body.filter(|b| !b.is_empty() || !flags.contains(RevFlags::DELETED)),
            sequence: 0,
        });
        self.changed = true;
        self.revs.len() - 1
    }

    // ==================
    // Conflict handling
    // ==================

    /// Clear the conflict flag on `index` and all its ancestors
    pub fn mark_branch_as_not_conflict(&mut self, index: RevIndex) -> bool {
        let mut changed = false;
        for i in self.history(index) {
            if self.revs[i].is_conflict() {
                self.revs[i].flags.remove(RevFlags::IS_CONFLICT);
                changed = true;
            }
        }
        if changed {
            self.changed = true;
            self.sort();
        }
        changed
    }

    // ==================
    // Remote revisions
    // ==================

    pub fn remote_revision(&self, remote: RemoteId) -> Option<RevIndex> {
        self.remote_revs.get(&remote).and_then(|id| self.find(id))
    }

    pub fn remote_revisions(&self) -> impl Iterator<Item = (RemoteId, &TreeRevId)> {
        self.remote_revs.iter().map(|(r, id)| (*r, id))
    }

    /// Record (or clear) the revision `remote` is known to have. Remote heads
    /// keep their bodies so they can serve as delta bases.
    pub fn set_remote_revision(&mut self, remote: RemoteId, index: Option<RevIndex>) {
        match index.and_then(|i| self.revs.get_mut(i)) {
            Some(rev) => {
                rev.flags.insert(RevFlags::KEEP_BODY);
                let id = rev.rev_id.clone();
                if self.remote_revs.insert(remote, id.clone()) != Some(id) {
                    self.changed = true;
                }
            }
            None => {
                if self.remote_revs.remove(&remote).is_some() {
                    self.changed = true;
                }
            }
        }
        self.drop_unreferenced_keep_body();
    }

    fn drop_unreferenced_keep_body(&mut self) {
        let referenced: HashSet<&TreeRevId> = self.remote_revs.values().collect();
        for rev in &mut self.revs {
            if rev.flags.contains(RevFlags::KEEP_BODY) && !referenced.contains(&rev.rev_id) {
                rev.flags.remove(RevFlags::KEEP_BODY);
            }
        }
    }

    // ==================
    // Bodies
    // ==================

    pub fn set_body(&mut self, index: RevIndex, body: Vec<u8>) {
        if let Some(rev) = self.revs.get_mut(index) {
            rev.body = Some(body);
            self.changed = true;
        }
    }

    pub fn remove_body(&mut self, index: RevIndex) {
        if let Some(rev) = self.revs.get_mut(index) {
            if rev.body.take().is_some() {
                self.changed = true;
            }
        }
    }

    /// Drop bodies of saved revisions that are no longer leaves
    pub fn remove_non_leaf_bodies(&mut self) {
        let keep = RevFlags::LEAF | RevFlags::NEW | RevFlags::KEEP_BODY;
        for rev in &mut self.revs {
            if rev.body.is_some() && !rev.flags.intersects(keep) {
                rev.body = None;
                self.changed = true;
            }
        }
    }

    // ==================
    // Pruning and purging
    // ==================

    /// Remove revisions more than `max_depth` generations above any leaf.
    /// Revisions a remote points at survive. Returns the number removed.
    pub fn prune(&mut self, max_depth: u32) -> usize {
        let max_depth = max_depth as usize;
        if max_depth == 0 || self.revs.len() <= max_depth {
            return 0;
        }
        let leaves: Vec<RevIndex> = (0..self.revs.len()).filter(|&i| self.revs[i].is_leaf()).collect();
        let mut marked = false;
        for leaf in leaves {
            for (depth, i) in self.history(leaf).into_iter().enumerate() {
                if depth >= max_depth {
                    self.revs[i].flags.insert(RevFlags::PURGE);
                    marked = true;
                }
            }
        }
        if !marked {
            return 0;
        }
        for id in self.remote_revs.values() {
            if let Some(rev) = self.revs.iter_mut().find(|r| r.rev_id == *id) {
                rev.flags.remove(RevFlags::PURGE);
            }
        }
        self.compact()
    }

    /// Remove a leaf and every ancestor that only it depended on.
    /// Returns the number of revisions removed (0 if `rev_id` is not a leaf).
    pub fn purge(&mut self, rev_id: &TreeRevId) -> usize {
        let mut cursor = match self.find(rev_id) {
            Some(i) if self.revs[i].is_leaf() => Some(i),
            _ => return 0,
        };
        while let Some(i) = cursor {
            self.revs[i].flags.insert(RevFlags::PURGE);
            let parent = self.revs[i].parent.take();
            cursor = parent.filter(|&p| self.confirm_leaf(p));
        }
        self.compact()
    }

    pub fn purge_all(&mut self) -> usize {
        let count = self.revs.len();
        self.revs.clear();
        self.remote_revs.clear();
        self.changed = true;
        count
    }

    /// Mark `index` as a leaf if nothing points at it any more
    fn confirm_leaf(&mut self, index: RevIndex) -> bool {
        if self.revs.iter().any(|r| r.parent == Some(index)) {
            return false;
        }
        self.revs[index].flags.insert(RevFlags::LEAF);
        true
    }

    /// Drop revisions marked `PURGE`, renumbering parents
    fn compact(&mut self) -> usize {
        let before = self.revs.len();
        let mut new_index = vec![None; before];
        let mut next = 0;
        for (i, rev) in self.revs.iter().enumerate() {
            if !rev.flags.contains(RevFlags::PURGE) {
                new_index[i] = Some(next);
                next += 1;
            }
        }
        let old = std::mem::take(&mut self.revs);
        self.revs = old
            .into_iter()
            .filter(|r| !r.flags.contains(RevFlags::PURGE))
            .map(|mut r| {
                r.parent = r.parent.and_then(|p| new_index[p]);
                r
            })
            .collect();
        let removed = before - self.revs.len();
        if removed > 0 {
            let revs = &self.revs;
            self.remote_revs
                .retain(|_, id| revs.iter().any(|r| r.rev_id == *id));
            self.changed = true;
            self.sort();
        }
        removed
    }

    // ==================
    // Persistence support
    // ==================

    /// Stamp unsaved revisions with the sequence they were saved under
    pub(crate) fn saved(&mut self, sequence: Sequence) {
        for rev in &mut self.revs {
            if rev.is_new() {
                rev.flags.remove(RevFlags::NEW);
                rev.sequence = sequence;
            }
        }
        self.changed = false;
    }

    pub(crate) fn has_new_revisions(&self) -> bool {
        self.revs.iter().any(Rev::is_new)
    }

    /// Stable-sort by winner priority and renumber parent links
    fn sort(&mut self) {
        let mut order: Vec<RevIndex> = (0..self.revs.len()).collect();
        order.sort_by(|&a, &b| self.revs[a].priority_cmp(&self.revs[b]));
        if order.iter().enumerate().all(|(new, &old)| new == old) {
            return;
        }
        let mut new_index = vec![0; order.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }
        let mut slots: Vec<Option<Rev>> = std::mem::take(&mut self.revs).into_iter().map(Some).collect();
        self.revs = order
            .iter()
            .filter_map(|&old| slots[old].take())
            .map(|mut r| {
                r.parent = r.parent.map(|p| new_index[p]);
                r
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TreeRevId {
        TreeRevId::parse(s).unwrap()
    }

    fn linear(ids: &[&str]) -> RevTree {
        let mut tree = RevTree::new();
        let mut parent: Option<TreeRevId> = None;
        for s in ids {
            tree.insert_with_parent_id(id(s), s.as_bytes().to_vec(), RevFlags::NONE, parent.as_ref(), false, false)
                .unwrap()
                .unwrap();
            parent = Some(id(s));
        }
        tree
    }

    #[test]
    fn test_insert_root_and_child() {
        let tree = linear(&["1-aa", "2-bb"]);
        assert_eq!(tree.len(), 2);
        let current = tree.current_rev().unwrap();
        assert_eq!(current.rev_id(), &id("2-bb"));
        assert!(current.is_leaf());
        assert!(!tree.get(1).unwrap().is_leaf());
        assert_eq!(tree.parent_of(0), Some(1));
    }

    #[test]
    fn test_insert_existing_returns_none() {
        let mut tree = linear(&["1-aa"]);
        let result = tree.insert(id("1-aa"), vec![], RevFlags::NONE, None, true, false).unwrap();
        assert!(result.is_none());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_insert_rejects_generation_gap() {
        let mut tree = linear(&["1-aa"]);
        let err = tree
            .insert_with_parent_id(id("3-cc"), vec![], RevFlags::NONE, Some(&id("1-aa")), false, false)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_insert_on_non_leaf_conflicts_unless_allowed() {
        let mut tree = linear(&["1-aa", "2-bb"]);
        let err = tree
            .insert_with_parent_id(id("2-cc"), vec![], RevFlags::NONE, Some(&id("1-aa")), false, false)
            .unwrap_err();
        assert_eq!(err.status_code(), 409);

        tree.insert_with_parent_id(id("2-cc"), vec![], RevFlags::NONE, Some(&id("1-aa")), true, false)
            .unwrap();
        assert!(tree.has_conflict());
        // Higher rev ID wins between equal-generation live leaves
        assert_eq!(tree.current_rev().unwrap().rev_id(), &id("2-cc"));
    }

    #[test]
    fn test_second_root_needs_allow_conflict() {
        let mut tree = linear(&["1-aa"]);
        assert!(tree.insert(id("1-bb"), vec![], RevFlags::NONE, None, false, false).is_err());
        assert!(tree.insert(id("1-bb"), vec![], RevFlags::NONE, None, true, false).is_ok());
    }

    #[test]
    fn test_missing_parent_is_not_found() {
        let mut tree = linear(&["1-aa"]);
        let err = tree
            .insert_with_parent_id(id("2-bb"), vec![], RevFlags::NONE, Some(&id("1-zz")), false, false)
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_deleted_leaf_loses_to_live_leaf() {
        let mut tree = linear(&["1-aa", "2-bb"]);
        tree.insert_with_parent_id(id("3-cc"), vec![], RevFlags::DELETED, Some(&id("2-bb")), false, false)
            .unwrap();
        tree.insert_with_parent_id(id("2-dd"), b"x".to_vec(), RevFlags::NONE, Some(&id("1-aa")), true, false)
            .unwrap();
        assert_eq!(tree.current_rev().unwrap().rev_id(), &id("2-dd"));
        assert!(!tree.has_conflict());
    }

    #[test]
    fn test_insert_history_grafts_missing_revisions() {
        let mut tree = linear(&["1-aa", "2-bb"]);
        let history = [id("4-dd"), id("3-cc"), id("2-bb"), id("1-aa")];
        let common = tree.insert_history(&history, b"body".to_vec(), RevFlags::NONE, false, false);
        assert_eq!(common, 2);
        assert_eq!(tree.len(), 4);
        let current = tree.current_rev().unwrap();
        assert_eq!(current.rev_id(), &id("4-dd"));
        assert_eq!(current.body(), Some(&b"body"[..]));
        let middle = tree.find(&id("3-cc")).unwrap();
        assert!(tree.get(middle).unwrap().body().is_none());
    }

    #[test]
    fn test_insert_history_is_idempotent() {
        let mut tree = linear(&["1-aa"]);
        let history = [id("2-bb"), id("1-aa")];
        assert_eq!(tree.insert_history(&history, vec![], RevFlags::NONE, false, false), 1);
        assert_eq!(tree.insert_history(&history, vec![], RevFlags::NONE, false, false), 0);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_insert_history_rejects_gaps() {
        let mut tree = RevTree::new();
        let history = [id("4-dd"), id("2-bb")];
        assert_eq!(tree.insert_history(&history, vec![], RevFlags::NONE, false, false), HISTORY_MALFORMED);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_insert_history_conflict_and_mark_conflict() {
        let mut tree = linear(&["1-aa", "2-bb"]);
        let history = [id("3-ee"), id("2-dd"), id("1-aa")];
        assert_eq!(tree.insert_history(&history, vec![], RevFlags::NONE, false, false), HISTORY_CONFLICT);

        assert_eq!(tree.insert_history(&history, b"{}".to_vec(), RevFlags::NONE, true, true), 2);
        let branch = tree.find(&id("3-ee")).unwrap();
        assert!(tree.get(branch).unwrap().is_conflict());
        // The conflicting branch never displaces the current revision
        assert_eq!(tree.current_rev().unwrap().rev_id(), &id("2-bb"));

        tree.mark_branch_as_not_conflict(tree.find(&id("3-ee")).unwrap());
        assert_eq!(tree.current_rev().unwrap().rev_id(), &id("3-ee"));
    }

    #[test]
    fn test_common_ancestor() {
        let mut tree = linear(&["1-aa", "2-bb", "3-cc"]);
        tree.insert_history(&[id("3-dd"), id("2-bb")], vec![], RevFlags::NONE, true, false);
        let a = tree.find(&id("3-cc")).unwrap();
        let b = tree.find(&id("3-dd")).unwrap();
        let common = tree.common_ancestor(a, b).unwrap();
        assert_eq!(tree.get(common).unwrap().rev_id(), &id("2-bb"));

        tree.insert(id("1-zz"), vec![], RevFlags::NONE, None, true, false).unwrap();
        let orphan = tree.find(&id("1-zz")).unwrap();
        let a = tree.find(&id("3-cc")).unwrap();
        assert!(tree.common_ancestor(a, orphan).is_none());
    }

    #[test]
    fn test_prune_keeps_max_depth() {
        let mut tree = linear(&["1-a1", "2-a2", "3-a3", "4-a4", "5-a5"]);
        assert_eq!(tree.prune(3), 2);
        assert_eq!(tree.len(), 3);
        assert!(tree.find(&id("2-a2")).is_none());
        let oldest = tree.find(&id("3-a3")).unwrap();
        assert_eq!(tree.parent_of(oldest), None);
    }

    #[test]
    fn test_prune_spares_remote_revisions() {
        let mut tree = linear(&["1-a1", "2-a2", "3-a3", "4-a4"]);
        let remote = tree.find(&id("1-a1"));
        tree.set_remote_revision(RemoteId::new(1), remote);
        assert_eq!(tree.prune(2), 1);
        assert!(tree.find(&id("1-a1")).is_some());
        assert!(tree.find(&id("2-a2")).is_none());
    }

    #[test]
    fn test_purge_removes_branch_back_to_fork() {
        let mut tree = linear(&["1-aa", "2-bb", "3-cc"]);
        tree.insert_history(&[id("3-dd"), id("2-bb")], vec![], RevFlags::NONE, true, false);
        assert_eq!(tree.purge(&id("3-dd")), 1);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.purge(&id("2-bb")), 0);
        assert_eq!(tree.purge(&id("3-cc")), 3);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_purge_restores_leaf_flag_on_fork() {
        let mut tree = linear(&["1-aa", "2-bb"]);
        tree.insert_history(&[id("2-cc"), id("1-aa")], vec![], RevFlags::NONE, true, false);
        tree.purge(&id("2-cc"));
        tree.purge(&id("2-bb"));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_remove_non_leaf_bodies() {
        let mut tree = linear(&["1-aa", "2-bb"]);
        tree.saved(7);
        tree.remove_non_leaf_bodies();
        let root = tree.find(&id("1-aa")).unwrap();
        assert!(tree.get(root).unwrap().body().is_none());
        assert_eq!(tree.get(root).unwrap().sequence(), 7);
        assert!(tree.current_rev().unwrap().body().is_some());
    }
}
