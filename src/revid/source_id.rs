//! Peer identifiers
//!
//! 16 bytes, ASCII as unpadded base64. All zeros is the unresolved local
//! peer and prints as `*`.

use std::fmt;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use uuid::Uuid;

use crate::errors::{RevError, RevResult};

const SOURCE_ID_LEN: usize = 16;
const ASCII_LEN: usize = 22;

/// Identity of a writer in a version vector.
///
/// The all-zero value is [`SourceId::ME`], the local peer before (or
/// instead of) resolving its real identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourceId([u8; SOURCE_ID_LEN]);

impl SourceId {
    pub const ME: SourceId = SourceId([0; SOURCE_ID_LEN]);

    pub fn from_bytes(bytes: [u8; SOURCE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// A fresh random identity, never equal to `ME`
    pub fn generate() -> Self {
        loop {
            let id = Self(Uuid::new_v4().into_bytes());
            if !id.is_me() {
                return id;
            }
        }
    }

    #[inline]
    pub fn is_me(&self) -> bool {
        *self == Self::ME
    }

    #[inline]
    pub fn bytes(&self) -> &[u8; SOURCE_ID_LEN] {
        &self.0
    }

    /// `*` for me, else unpadded base64
    pub fn to_ascii(&self) -> String {
        if self.is_me() {
            "*".to_string()
        } else {
            STANDARD_NO_PAD.encode(self.0)
        }
    }

    pub fn parse(ascii: &str) -> RevResult<Self> {
        if ascii == "*" {
            return Ok(Self::ME);
        }
        if ascii.len() != ASCII_LEN {
            return Err(RevError::bad_revision_id(format!("invalid source ID '{}'", ascii)));
        }
        let decoded = STANDARD_NO_PAD
            .decode(ascii)
            .map_err(|_| RevError::bad_revision_id(format!("invalid source ID '{}'", ascii)))?;
        let bytes: [u8; SOURCE_ID_LEN] = decoded
            .try_into()
            .map_err(|_| RevError::bad_revision_id(format!("invalid source ID '{}'", ascii)))?;
        Ok(Self(bytes))
    }

    pub(crate) fn write_binary(&self, out: &mut Vec<u8>) {
        if self.is_me() {
            out.push(0);
        } else {
            out.push(SOURCE_ID_LEN as u8);
            out.extend_from_slice(&self.0);
        }
    }

    pub(crate) fn read_binary(input: &mut &[u8]) -> RevResult<Self> {
        let (&len, rest) = input
            .split_first()
            .ok_or_else(|| RevError::bad_revision_id("truncated source ID"))?;
        match (len & 0x7F) as usize {
            0 => {
                *input = rest;
                Ok(Self::ME)
            }
            SOURCE_ID_LEN if rest.len() >= SOURCE_ID_LEN => {
                let mut bytes = [0u8; SOURCE_ID_LEN];
                bytes.copy_from_slice(&rest[..SOURCE_ID_LEN]);
                *input = &rest[SOURCE_ID_LEN..];
                Ok(Self(bytes))
            }
            _ => Err(RevError::bad_revision_id("invalid binary source ID")),
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ascii())
    }
}

impl fmt::Debug for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceId({})", self.to_ascii())
    }
}
