//! Revision-tree IDs
//!
//! - ASCII `generation-hexdigest`, binary LEB128 generation + digest bytes
//! - New digests are SHA-256 of parent, deletion flag and body, cut to 20
//!   bytes
//! - Encryptable bodies get a random digest

use std::fmt;

use rand::RngCore;
use sha2::{Digest, Sha256};

use super::varint::{read_uvarint, write_uvarint};
use crate::errors::{RevError, RevResult};

/// Digest length of generated revision IDs
const DIGEST_LEN: usize = 20;

/// A revision-tree ID: `generation-hexdigest`.
///
/// Ordered by generation, then by digest bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreeRevId {
    generation: u32,
    digest: Vec<u8>,
}

impl TreeRevId {
    pub fn new(generation: u32, digest: Vec<u8>) -> RevResult<Self> {
        if generation == 0 {
            return Err(RevError::bad_revision_id("generation must be at least 1"));
        }
        if digest.is_empty() {
            return Err(RevError::bad_revision_id("empty revision digest"));
        }
        Ok(Self { generation, digest })
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// ID of a new child of `parent` with the given content.
    ///
    /// The digest covers the parent ID (length-prefixed, capped at 255 bytes),
    /// the deletion flag and the body, so identical edits made on different
    /// peers produce identical IDs.
    pub fn generate(parent: Option<&TreeRevId>, body: &[u8], deleted: bool) -> Self {
        let parent_ascii = parent.map(|p| p.to_string()).unwrap_or_default();
        let parent_bytes = parent_ascii.as_bytes();
        let len = parent_bytes.len().min(255);

        let mut hasher = Sha256::new();
        hasher.update([len as u8]);
        hasher.update(&parent_bytes[..len]);
        hasher.update([deleted as u8]);
        hasher.update(body);
        let digest = hasher.finalize()[..DIGEST_LEN].to_vec();

        Self {
            generation: Self::child_generation(parent),
            digest,
        }
    }

    /// ID of a new child of `parent` with a random digest, for bodies whose
    /// content must never be re-digested.
    pub fn random(parent: Option<&TreeRevId>) -> Self {
        let mut digest = vec![0u8; DIGEST_LEN];
        rand::thread_rng().fill_bytes(&mut digest);
        Self {
            generation: Self::child_generation(parent),
            digest,
        }
    }

    fn child_generation(parent: Option<&TreeRevId>) -> u32 {
        parent.map_or(1, |p| p.generation.saturating_add(1))
    }

    pub fn parse(ascii: &str) -> RevResult<Self> {
        let bad = || RevError::bad_revision_id(format!("invalid revision ID '{}'", ascii));
        let (generation, hex) = ascii.split_once('-').ok_or_else(bad)?;
        if generation.is_empty() || !generation.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let generation: u32 = generation.parse().map_err(|_| bad())?;
        let digest = decode_hex(hex).ok_or_else(bad)?;
        Self::new(generation, digest).map_err(|_| bad())
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.digest.len());
        write_uvarint(&mut out, u64::from(self.generation));
        out.extend_from_slice(&self.digest);
        out
    }

    pub fn from_binary(data: &[u8]) -> RevResult<Self> {
        let mut input = data;
        let generation = read_uvarint(&mut input)
            .and_then(|g| u32::try_from(g).ok())
            .ok_or_else(|| RevError::bad_revision_id("invalid binary revision generation"))?;
        Self::new(generation, input.to_vec())
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }
    fn nibble(c: u8) -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'a'..=b'f' => Some(c - b'a' + 10),
            _ => None,
        }
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| Some(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect()
}

impl fmt::Display for TreeRevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.generation)?;
        for b in &self.digest {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TreeRevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeRevId({})", self)
    }
}
