//! Single versions
//!
//! One author's logical time. ASCII `author@hextime`; binary is a compressed
//! LEB128 time followed by the author.

use std::fmt;

use super::varint::{read_uvarint, write_uvarint};
use super::SourceId;
use crate::clock::LogicalTime;
use crate::errors::{RevError, RevResult};

const MAX_TIME: u64 = 0x7fff_ffff_ffff_ffff;

/// One writer's logical timestamp: the unit a version vector is made of.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    author: SourceId,
    time: LogicalTime,
}

impl Version {
    pub fn new(author: SourceId, time: LogicalTime) -> RevResult<Self> {
        if time.is_none() || time.as_u64() > MAX_TIME {
            return Err(RevError::bad_revision_id(format!("invalid version time {}", time)));
        }
        Ok(Self { author, time })
    }

    /// Build from a time already known to be valid
    pub(crate) fn raw(author: SourceId, time: LogicalTime) -> Self {
        debug_assert!(!time.is_none());
        Self { author, time }
    }

    #[inline]
    pub fn author(&self) -> SourceId {
        self.author
    }

    #[inline]
    pub fn time(&self) -> LogicalTime {
        self.time
    }

    pub(crate) fn with_author(self, author: SourceId) -> Self {
        Self { author, ..self }
    }

    /// Parse `author@hextime`
    pub fn parse(ascii: &str) -> RevResult<Self> {
        let (author, time) = ascii
            .split_once('@')
            .ok_or_else(|| RevError::bad_revision_id(format!("invalid version '{}'", ascii)))?;
        if time.is_empty() || time.len() > 16 || !time.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RevError::bad_revision_id(format!("invalid version '{}'", ascii)));
        }
        let time = u64::from_str_radix(time, 16)
            .map_err(|_| RevError::bad_revision_id(format!("invalid version '{}'", ascii)))?;
        Self::new(SourceId::parse(author)?, LogicalTime::new(time))
    }

    /// ASCII form; `my_id` (if known) replaces `*`
    pub fn to_ascii(&self, my_id: Option<SourceId>) -> String {
        let author = match my_id {
            Some(id) if self.author.is_me() => id,
            _ => self.author,
        };
        format!("{}@{}", author.to_ascii(), self.time)
    }

    pub(crate) fn write_binary(&self, out: &mut Vec<u8>) {
        let t = self.time.as_u64();
        // Times with an empty counter compress well
        let packed = if t & 0xFFFF != 0 { (t << 1) | 1 } else { t >> 15 };
        write_uvarint(out, packed);
        self.author.write_binary(out);
    }

    pub(crate) fn read_binary(input: &mut &[u8]) -> RevResult<Self> {
        let packed =
            read_uvarint(input).ok_or_else(|| RevError::bad_revision_id("truncated binary version"))?;
        let time = if packed & 1 != 0 { packed >> 1 } else { packed << 15 };
        let author = SourceId::read_binary(input)?;
        Self::new(author, LogicalTime::new(time))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ascii(None))
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SourceId {
        SourceId::parse("AAECAwQFBgcICQoLDA0ODw").unwrap()
    }

    #[test]
    fn test_ascii_is_author_at_hex_time() {
        let v = Version::new(peer(), LogicalTime::new(0x17a3f)).unwrap();
        assert_eq!(v.to_string(), "AAECAwQFBgcICQoLDA0ODw@17a3f");
        assert_eq!(Version::parse("AAECAwQFBgcICQoLDA0ODw@17a3f").unwrap(), v);
    }

    #[test]
    fn test_me_is_star_unless_expanded() {
        let v = Version::parse("*@5").unwrap();
        assert!(v.author().is_me());
        assert_eq!(v.to_ascii(None), "*@5");
        assert_eq!(v.to_ascii(Some(peer())), "AAECAwQFBgcICQoLDA0ODw@5");
    }

    #[test]
    fn test_zero_time_is_invalid() {
        assert!(Version::parse("*@0").is_err());
        assert!(Version::parse("*@").is_err());
        assert!(Version::parse("*@xyz").is_err());
        assert!(Version::parse("*5").is_err());
    }

    #[test]
    fn test_binary_preserves_both_time_shapes() {
        for t in [0x5u64, 0x1_0000, 0x176c_9a6f_d690_0000, 0x176c_9a6f_d690_0003] {
            let v = Version::new(peer(), LogicalTime::new(t)).unwrap();
            let mut out = Vec::new();
            v.write_binary(&mut out);
            let mut input = out.as_slice();
            assert_eq!(Version::read_binary(&mut input).unwrap(), v);
            assert!(input.is_empty());
        }
    }
}
