//! Binary encoding of a revision tree
//!
//! ```text
//! +---------------------+
//! | Rev Count           | (u32 LE)
//! +---------------------+
//! | Rev * count         |
//! |   Rev ID            | (u16 LE length + binary tree rev ID)
//! |   Parent Index      | (u32 LE, u32::MAX = root)
//! |   Flags             | (u8, persistent flags only)
//! |   Sequence          | (u64 LE)
//! |   Body              | (u8 present + u32 LE length + bytes)
//! +---------------------+
//! | Remote Count        | (u16 LE)
//! +---------------------+
//! | Remote * count      |
//! |   Remote ID         | (u32 LE)
//! |   Rev ID            | (u16 LE length + binary tree rev ID)
//! +---------------------+
//! | Checksum            | (u32 LE CRC32 of everything above)
//! +---------------------+
//! ```
//!
//! Bodies of revisions other than the current one are only written when
//! present; the current body lives in the record body and is not duplicated.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};

use super::rev::{Rev, RevFlags};
use super::tree::RevTree;
use crate::errors::{RevError, RevResult};
use crate::revid::{RemoteId, TreeRevId};
use crate::storage::{append_checksum, strip_checksum, Sequence};

const NO_PARENT: u32 = u32::MAX;

/// Encode all revisions except the current one's body
pub fn encode(tree: &RevTree) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(tree.len() as u32).to_le_bytes());
    for (index, rev) in tree.revs().enumerate() {
        write_rev_id(&mut buf, rev.rev_id());
        let parent = rev.parent().map_or(NO_PARENT, |p| p as u32);
        buf.extend_from_slice(&parent.to_le_bytes());
        buf.push(rev.flags().intersection(RevFlags::PERSISTENT).bits());
        buf.extend_from_slice(&rev.sequence().to_le_bytes());
        match rev.body().filter(|_| index != 0) {
            Some(body) => {
                buf.push(1);
                buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
                buf.extend_from_slice(body);
            }
            None => buf.push(0),
        }
    }

    let remotes: Vec<_> = tree.remote_revisions().collect();
    buf.extend_from_slice(&(remotes.len() as u16).to_le_bytes());
    for (remote, rev_id) in remotes {
        buf.extend_from_slice(&remote.as_u32().to_le_bytes());
        write_rev_id(&mut buf, rev_id);
    }
    append_checksum(&mut buf);
    buf
}

/// Decode a tree, attaching `current_body` to the current revision.
///
/// Revisions stored without a sequence were saved in the same write as the
/// record and take `record_sequence`.
pub fn decode(data: &[u8], current_body: &[u8], record_sequence: Sequence) -> RevResult<RevTree> {
    let payload =
        strip_checksum(data).ok_or_else(|| RevError::corrupt("revision tree checksum mismatch"))?;
    let mut cursor = Cursor::new(payload);
    let tree = read_tree(&mut cursor, current_body, record_sequence)?;
    if cursor.position() as usize != payload.len() {
        return Err(RevError::corrupt("trailing bytes after revision tree"));
    }
    Ok(tree)
}

fn read_tree(cursor: &mut Cursor<&[u8]>, current_body: &[u8], record_sequence: Sequence) -> RevResult<RevTree> {
    let count = read_u32(cursor)? as usize;
    let mut revs = Vec::with_capacity(count.min(1024));
    for index in 0..count {
        let rev_id = read_rev_id(cursor)?;
        let parent = match read_u32(cursor)? {
            NO_PARENT => None,
            p if (p as usize) < count && p as usize != index => Some(p as usize),
            p => return Err(RevError::corrupt(format!("parent index {} out of range", p))),
        };
        let flags = RevFlags::from_bits(read_u8(cursor)?).intersection(RevFlags::PERSISTENT);
        let sequence = match read_u64(cursor)? {
            0 => record_sequence,
            s => s,
        };
        let body = if read_u8(cursor)? != 0 {
            Some(read_bytes(cursor)?)
        } else if index == 0 {
            Some(current_body.to_vec())
        } else {
            None
        };
        revs.push(Rev {
            rev_id,
            parent,
            flags,
            body,
            sequence,
        });
    }

    // Generations strictly descend along parent links, so no cycle survives this
    for (index, rev) in revs.iter().enumerate() {
        if let Some(parent) = rev.parent {
            let expected = revs[parent].rev_id.generation().checked_add(1);
            if expected != Some(rev.rev_id.generation()) {
                return Err(RevError::corrupt(format!(
                    "revision {} has parent {} of generation {}",
                    index,
                    parent,
                    revs[parent].rev_id.generation()
                )));
            }
        }
    }

    let remote_count = read_u16(cursor)?;
    let mut remotes = BTreeMap::new();
    for _ in 0..remote_count {
        let remote = RemoteId::new(read_u32(cursor)?);
        remotes.insert(remote, read_rev_id(cursor)?);
    }
    Ok(RevTree::from_parts(revs, remotes))
}

fn write_rev_id(buf: &mut Vec<u8>, rev_id: &TreeRevId) {
    let binary = rev_id.to_binary();
    buf.extend_from_slice(&(binary.len() as u16).to_le_bytes());
    buf.extend_from_slice(&binary);
}

fn truncated(e: io::Error) -> RevError {
    RevError::corrupt(format!("truncated revision tree: {}", e))
}

fn read_exact<const N: usize>(cursor: &mut Cursor<&[u8]>) -> RevResult<[u8; N]> {
    let mut buf = [0u8; N];
    cursor.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf)
}

fn read_rev_id(cursor: &mut Cursor<&[u8]>) -> RevResult<TreeRevId> {
    let len = read_u16(cursor)? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(truncated)?;
    TreeRevId::from_binary(&buf)
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> RevResult<u8> {
    Ok(read_exact::<1>(cursor)?[0])
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> RevResult<u16> {
    read_exact(cursor).map(u16::from_le_bytes)
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> RevResult<u32> {
    read_exact(cursor).map(u32::from_le_bytes)
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> RevResult<u64> {
    read_exact(cursor).map(u64::from_le_bytes)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> RevResult<Vec<u8>> {
    let len = read_u32(cursor)? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(RevError::corrupt("body length exceeds revision data"));
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TreeRevId {
        TreeRevId::parse(s).unwrap()
    }

    fn sample() -> RevTree {
        let mut tree = RevTree::new();
        tree.insert(id("1-aa"), b"one".to_vec(), RevFlags::NONE, None, false, false)
            .unwrap();
        tree.insert_with_parent_id(id("2-bb"), b"two".to_vec(), RevFlags::NONE, Some(&id("1-aa")), false, false)
            .unwrap();
        tree.insert_with_parent_id(id("2-cc"), b"".to_vec(), RevFlags::DELETED, Some(&id("1-aa")), true, true)
            .unwrap();
        let remote = tree.find(&id("2-bb"));
        tree.set_remote_revision(RemoteId::new(3), remote);
        tree
    }

    #[test]
    fn test_decode_restores_structure() {
        let tree = sample();
        let current_body = tree.current_rev().unwrap().body().unwrap().to_vec();
        let data = encode(&tree);
        let decoded = decode(&data, &current_body, 9).unwrap();

        assert_eq!(decoded.len(), 3);
        let current = decoded.current_rev().unwrap();
        assert_eq!(current.rev_id(), &id("2-bb"));
        assert_eq!(current.body(), Some(&b"two"[..]));
        assert_eq!(current.sequence(), 9);
        // NEW is not persisted
        assert!(!current.is_new());

        let loser = decoded.find(&id("2-cc")).unwrap();
        assert!(decoded.get(loser).unwrap().is_deleted());
        assert!(decoded.get(loser).unwrap().is_conflict());
        let root = decoded.parent_of(loser).unwrap();
        assert_eq!(decoded.get(root).unwrap().body(), Some(&b"one"[..]));
        assert_eq!(decoded.remote_revision(RemoteId::new(3)), decoded.current());
    }

    #[test]
    fn test_decode_detects_corruption() {
        let mut data = encode(&sample());
        data[6] ^= 0xff;
        let err = decode(&data, b"", 1).unwrap_err();
        assert_eq!(err.code(), "AERO_REV_CORRUPT_REVISION_DATA");
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let data = encode(&sample());
        assert!(decode(&data[..data.len() - 6], b"", 1).is_err());
    }

    fn raw_rev(buf: &mut Vec<u8>, rev_id: &str, parent: u32) {
        write_rev_id(buf, &id(rev_id));
        buf.extend_from_slice(&parent.to_le_bytes());
        buf.push(0);
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.push(0);
    }

    #[test]
    fn test_decode_rejects_parent_cycle() {
        let mut data = Vec::new();
        data.extend_from_slice(&2u32.to_le_bytes());
        raw_rev(&mut data, "2-bb", 1);
        raw_rev(&mut data, "1-aa", 0);
        data.extend_from_slice(&0u16.to_le_bytes());
        append_checksum(&mut data);

        let err = decode(&data, b"{}", 1).unwrap_err();
        assert_eq!(err.code(), "AERO_REV_CORRUPT_REVISION_DATA");
    }

    #[test]
    fn test_decode_rejects_generation_gap() {
        let mut data = Vec::new();
        data.extend_from_slice(&2u32.to_le_bytes());
        raw_rev(&mut data, "3-cc", 1);
        raw_rev(&mut data, "1-aa", NO_PARENT);
        data.extend_from_slice(&0u16.to_le_bytes());
        append_checksum(&mut data);

        assert!(decode(&data, b"{}", 1).is_err());
    }

    #[test]
    fn test_empty_tree() {
        let data = encode(&RevTree::new());
        assert!(decode(&data, b"", 1).unwrap().is_empty());
    }
}
