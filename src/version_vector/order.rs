//! Causal order between vectors
//!
//! Two-bit set: `Older = 1`, `Newer = 2`, `Conflicting = 3`.

use std::fmt;

/// Causal order between two versions or vectors.
///
/// A two-bit set: `Older` and `Newer` together are `Conflicting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionOrder {
    Same = 0,
    Older = 1,
    Newer = 2,
    Conflicting = 3,
}

impl VersionOrder {
    fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => VersionOrder::Same,
            1 => VersionOrder::Older,
            2 => VersionOrder::Newer,
            _ => VersionOrder::Conflicting,
        }
    }

    #[inline]
    pub fn union(self, other: VersionOrder) -> Self {
        Self::from_bits(self as u8 | other as u8)
    }

    /// The order seen from the other side
    pub fn inverse(self) -> Self {
        match self {
            VersionOrder::Older => VersionOrder::Newer,
            VersionOrder::Newer => VersionOrder::Older,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionOrder::Same => "same",
            VersionOrder::Older => "older",
            VersionOrder::Newer => "newer",
            VersionOrder::Conflicting => "conflicting",
        }
    }
}

impl fmt::Display for VersionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
