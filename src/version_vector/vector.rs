//! Version vectors
//!
//! - Compare, merge, ASCII and binary forms
//! - History reading for replicated revisions
//! - Deltas between vectors of one document
//! - Expanding and compacting the local peer ID
//!
//! # Invariants
//!
//! - Each author appears at most once
//! - The newest local edit is first

use std::fmt;

use super::VersionOrder;
use crate::clock::{HybridClock, LogicalTime};
use crate::errors::{RevError, RevResult};
use crate::revid::{SourceId, Version};

/// Causal history of one revision: the latest timestamp seen from each writer.
///
/// Equality is causal (`compare() == Same`), so entry order does not matter
/// when comparing.
#[derive(Clone, Default)]
pub struct VersionVector {
    versions: Vec<Version>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from versions, current first. Fails on a duplicate author.
    pub fn from_versions(versions: impl IntoIterator<Item = Version>) -> RevResult<Self> {
        let mut vector = Self::new();
        for v in versions {
            vector.push_back(v)?;
        }
        Ok(vector)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.versions.len()
    }

    #[inline]
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// The version that identifies this vector's revision
    pub fn current_version(&self) -> Option<Version> {
        self.versions.first().copied()
    }

    /// Timestamp recorded for `author`, or `LogicalTime::NONE`
    pub fn time_of(&self, author: SourceId) -> LogicalTime {
        self.find(author)
            .map(|i| self.versions[i].time())
            .unwrap_or(LogicalTime::NONE)
    }

    fn find(&self, author: SourceId) -> Option<usize> {
        self.versions.iter().position(|v| v.author() == author)
    }

    // ==================
    // Encoding
    // ==================

    /// Parse comma-separated versions. Entries authored by `my_id` are
    /// stored as `*`.
    pub fn parse(ascii: &str, my_id: Option<SourceId>) -> RevResult<Self> {
        let mut vector = Self::new();
        if ascii.trim().is_empty() {
            return Ok(vector);
        }
        for part in ascii.split(',') {
            let mut v = Version::parse(part.trim())?;
            if my_id == Some(v.author()) {
                v = v.with_author(SourceId::ME);
            }
            vector.push_back(v)?;
        }
        Ok(vector)
    }

    /// ASCII form; `*` is replaced by `my_id` when given
    pub fn to_ascii(&self, my_id: Option<SourceId>) -> String {
        self.versions
            .iter()
            .map(|v| v.to_ascii(my_id))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Binary form: a zero byte, then each version
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.versions.len() * 12);
        out.push(0);
        for v in &self.versions {
            v.write_binary(&mut out);
        }
        out
    }

    pub fn from_binary(data: &[u8]) -> RevResult<Self> {
        let mut input = match data.split_first() {
            Some((0, rest)) => rest,
            _ => return Err(RevError::bad_revision_id("invalid binary version vector")),
        };
        let mut vector = Self::new();
        while !input.is_empty() {
            vector.push_back(Version::read_binary(&mut input)?)?;
        }
        Ok(vector)
    }

    /// Interpret a revision history supplied by a peer.
    ///
    /// - one entry: a complete vector
    /// - two entries: a new version followed by its parent vector
    /// - more: single versions, newest first, with decreasing times per author
    pub fn read_history(history: &[&str], my_id: Option<SourceId>) -> RevResult<Self> {
        let (first, rest) = history
            .split_first()
            .ok_or_else(|| RevError::bad_revision_id("empty version history"))?;
        let mut vector = Self::parse(first, my_id)?;
        if rest.is_empty() {
            return Ok(vector);
        }
        if vector.count() != 1 {
            return Err(RevError::bad_revision_id(
                "invalid version history (vector followed by other history)",
            ));
        }
        if rest.len() == 1 {
            let new_version = vector.versions[0];
            let mut parent = Self::parse(rest[0], my_id)?;
            if !parent.add(new_version) {
                return Err(RevError::bad_revision_id(
                    "invalid version history (new version is not newer than its parent)",
                ));
            }
            return Ok(parent);
        }
        for ascii in rest {
            let mut parent = Version::parse(ascii.trim())?;
            if my_id == Some(parent.author()) {
                parent = parent.with_author(SourceId::ME);
            }
            let known = vector.time_of(parent.author());
            if known.is_none() {
                vector.versions.push(parent);
            } else if known <= parent.time() {
                return Err(RevError::bad_revision_id(
                    "invalid version history (increasing time)",
                ));
            }
        }
        Ok(vector)
    }

    // ==================
    // Comparison
    // ==================

    pub fn compare(&self, other: &VersionVector) -> VersionOrder {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => return VersionOrder::Same,
            (true, false) => return VersionOrder::Older,
            (false, true) => return VersionOrder::Newer,
            _ => {}
        }
        let mut order = VersionOrder::Same;
        for v in &self.versions {
            let theirs = other.time_of(v.author());
            if v.time() < theirs {
                order = order.union(VersionOrder::Older);
            } else if v.time() > theirs {
                order = order.union(VersionOrder::Newer);
            }
            if order == VersionOrder::Conflicting {
                return order;
            }
        }
        if other.versions.iter().any(|v| self.find(v.author()).is_none()) {
            order = order.union(VersionOrder::Older);
        }
        order
    }

    /// Order of this vector relative to a single version
    pub fn compare_version(&self, version: &Version) -> VersionOrder {
        match self.find(version.author()) {
            None => VersionOrder::Older,
            Some(i) if self.versions[i].time() < version.time() => VersionOrder::Older,
            Some(0) if self.versions[0].time() == version.time() => VersionOrder::Same,
            Some(_) => VersionOrder::Newer,
        }
    }

    /// Whether any author other than `ignoring` has a newer time here than in `other`
    pub fn is_newer_ignoring(&self, ignoring: SourceId, other: &VersionVector) -> bool {
        self.versions
            .iter()
            .any(|v| v.author() != ignoring && v.time() > other.time_of(v.author()))
    }

    // ==================
    // Modification
    // ==================

    /// Append an older version. Fails if the author is already present.
    pub fn push_back(&mut self, version: Version) -> RevResult<()> {
        if self.find(version.author()).is_some() {
            return Err(RevError::bad_revision_id(format!(
                "duplicate author {} in version vector",
                version.author()
            )));
        }
        self.versions.push(version);
        Ok(())
    }

    /// Make `version` current. Returns false (and changes nothing) if the
    /// author already has an equal or newer time.
    pub fn add(&mut self, version: Version) -> bool {
        if let Some(i) = self.find(version.author()) {
            if self.versions[i].time() >= version.time() {
                return false;
            }
            self.versions.remove(i);
        }
        self.versions.insert(0, version);
        true
    }

    /// Advance `author` by one tick and make it current
    pub fn increment(&mut self, author: SourceId) -> Version {
        let time = self.time_of(author).next();
        let version = Version::raw(author, time);
        self.add(version);
        version
    }

    /// Add a new local version stamped by `clock`, newer than any local time
    /// already in the vector.
    pub fn add_new_version(&mut self, clock: &HybridClock) -> Version {
        for v in &self.versions {
            if !v.author().is_me() {
                clock.see(v.time());
            }
        }
        let mut time = clock.now();
        let mine = self.time_of(SourceId::ME);
        if time <= mine {
            time = mine.next();
        }
        let version = Version::raw(SourceId::ME, time);
        self.add(version);
        version
    }

    pub fn limit_count(&mut self, max_count: usize) {
        self.versions.truncate(max_count);
    }

    /// Replace `my_id` with `*`
    pub fn compact_my_peer_id(&mut self, my_id: SourceId) -> RevResult<()> {
        if self.find(SourceId::ME).is_some() {
            return Err(RevError::bad_revision_id("vector already contains '*'"));
        }
        if let Some(i) = self.find(my_id) {
            self.versions[i] = self.versions[i].with_author(SourceId::ME);
        }
        Ok(())
    }

    /// Replace `*` with `my_id`
    pub fn expand_my_peer_id(&mut self, my_id: SourceId) -> RevResult<()> {
        if self.find(my_id).is_some() {
            return Err(RevError::bad_revision_id("vector already contains the local ID"));
        }
        if let Some(i) = self.find(SourceId::ME) {
            self.versions[i] = self.versions[i].with_author(my_id);
        }
        Ok(())
    }

    pub fn is_expanded(&self) -> bool {
        self.find(SourceId::ME).is_none()
    }

    // ==================
    // Merging and deltas
    // ==================

    /// Per-author maximum of both vectors. Not newer than either input on its
    /// own; callers add a new local version afterwards.
    pub fn merged_with(&self, other: &VersionVector) -> VersionVector {
        let mut result = VersionVector::new();
        let max_len = self.count().max(other.count());
        for i in 0..max_len {
            if let Some(v) = self.versions.get(i) {
                if v.time() >= other.time_of(v.author()) {
                    result.versions.push(*v);
                }
            }
            if let Some(v) = other.versions.get(i) {
                if v.time() > self.time_of(v.author()) {
                    result.versions.push(*v);
                }
            }
        }
        result
    }

    /// The prefix of `self` holding every version newer than in `base`, or
    /// None if `base` is not an ancestor.
    pub fn delta_from(&self, base: &VersionVector) -> Option<VersionVector> {
        if base.is_empty() {
            return Some(self.clone());
        }
        if base.count() > self.count() {
            return None;
        }
        let mut end = 0;
        for v in &self.versions {
            let theirs = base.time_of(v.author());
            if v.time() == theirs {
                break;
            }
            if v.time() < theirs {
                return None;
            }
            end += 1;
        }
        Some(VersionVector {
            versions: self.versions[..end].to_vec(),
        })
    }

    /// Reverse of `delta_from`: `base.by_applying_delta(&v.delta_from(&base)?) == v`
    pub fn by_applying_delta(&self, delta: &VersionVector) -> RevResult<VersionVector> {
        let mut result = delta.clone();
        for v in &self.versions {
            let in_delta = delta.time_of(v.author());
            if in_delta.is_none() {
                result.versions.push(*v);
            } else if in_delta < v.time() {
                return Err(RevError::bad_revision_id("invalid version vector delta"));
            }
        }
        Ok(result)
    }
}

impl PartialEq for VersionVector {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == VersionOrder::Same
    }
}

impl Eq for VersionVector {}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ascii(None))
    }
}

impl fmt::Debug for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionVector[{}]", self.to_ascii(None))
    }
}
