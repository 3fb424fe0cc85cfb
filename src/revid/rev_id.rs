//! Revision IDs of either model
//!
//! - `TreeRevId` for revision trees, `Version` for version vectors
//! - `parse` accepts both ASCII forms; `from_binary` also accepts a whole
//!   binary vector and keeps its first version

use std::fmt;

use super::{SourceId, TreeRevId, Version};
use crate::errors::{RevError, RevResult};
use crate::version_vector::VersionVector;

/// A revision identifier in either of its two forms.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum RevId {
    /// `generation-digest`, used by revision trees
    Tree(TreeRevId),
    /// A single version, the current version of a version vector
    Version(Version),
}

impl RevId {
    /// Parse either form. A string containing `@` is a version (if it is a
    /// whole vector, its first entry is the ID).
    pub fn parse(ascii: &str) -> RevResult<Self> {
        if ascii.contains('@') {
            let first = ascii.split(',').next().unwrap_or_default().trim();
            Ok(RevId::Version(Version::parse(first)?))
        } else {
            Ok(RevId::Tree(TreeRevId::parse(ascii)?))
        }
    }

    /// Decode a tree ID or a binary version vector (leading zero byte)
    pub fn from_binary(data: &[u8]) -> RevResult<Self> {
        match data.first() {
            None => Err(RevError::bad_revision_id("empty binary revision ID")),
            Some(0) => {
                let vector = VersionVector::from_binary(data)?;
                vector
                    .current_version()
                    .map(RevId::Version)
                    .ok_or_else(|| RevError::bad_revision_id("empty version vector"))
            }
            Some(_) => Ok(RevId::Tree(TreeRevId::from_binary(data)?)),
        }
    }

    pub fn to_binary(&self) -> Vec<u8> {
        match self {
            RevId::Tree(id) => id.to_binary(),
            RevId::Version(v) => {
                let mut out = vec![0];
                v.write_binary(&mut out);
                out
            }
        }
    }

    /// ASCII form with `*` left unexpanded
    pub fn expanded(&self) -> String {
        self.to_ascii(None)
    }

    pub fn to_ascii(&self, my_id: Option<SourceId>) -> String {
        match self {
            RevId::Tree(id) => id.to_string(),
            RevId::Version(v) => v.to_ascii(my_id),
        }
    }

    pub fn as_tree(&self) -> Option<&TreeRevId> {
        match self {
            RevId::Tree(id) => Some(id),
            RevId::Version(_) => None,
        }
    }

    pub fn is_version(&self) -> bool {
        matches!(self, RevId::Version(_))
    }

    /// Tree generation; versions have none
    pub fn generation(&self) -> Option<u32> {
        self.as_tree().map(TreeRevId::generation)
    }
}

impl From<TreeRevId> for RevId {
    fn from(id: TreeRevId) -> Self {
        RevId::Tree(id)
    }
}

impl From<Version> for RevId {
    fn from(v: Version) -> Self {
        RevId::Version(v)
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expanded())
    }
}

impl fmt::Debug for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevId({})", self.expanded())
    }
}
