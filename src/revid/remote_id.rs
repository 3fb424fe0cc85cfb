//! Replication remote identifiers (0 is the local database)

use std::fmt;

use serde::{Deserialize, Serialize};

/// A replication counterpart whose latest known revision a document tracks.
///
/// `RemoteId::LOCAL` (0) is the local peer; 1..N are sync counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct RemoteId(u32);

impl RemoteId {
    pub const LOCAL: RemoteId = RemoteId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_local(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
