//! CRC32 checksums for encoded revision data
//!
//! Encoded trees carry a trailing CRC32 (IEEE) over every preceding byte.
//! A mismatch on decode is reported as corrupt revision data.

use crc32fast::Hasher;

/// CRC32 over `data`
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Split `data` into payload and trailing little-endian checksum, verifying it.
///
/// Returns the payload, or `None` if the data is too short or the checksum
/// does not match.
pub fn strip_checksum(data: &[u8]) -> Option<&[u8]> {
    if data.len() < 4 {
        return None;
    }
    let (payload, trailer) = data.split_at(data.len() - 4);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    (compute_checksum(payload) == stored).then_some(payload)
}

/// Append the checksum of everything already in `buf`
pub fn append_checksum(buf: &mut Vec<u8>) {
    let checksum = compute_checksum(buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_deterministic() {
        let data = b"1-aa 2-bb";
        assert_eq!(compute_checksum(data), compute_checksum(data));
    }

    #[test]
    fn test_strip_checksum_accepts_intact_data() {
        let mut buf = b"revision tree".to_vec();
        append_checksum(&mut buf);
        assert_eq!(strip_checksum(&buf), Some(&b"revision tree"[..]));
    }

    #[test]
    fn test_strip_checksum_detects_corruption() {
        let mut buf = vec![0x00, 0x01, 0x02, 0x03, 0x04];
        append_checksum(&mut buf);
        buf[2] ^= 0x01;
        assert_eq!(strip_checksum(&buf), None);
        assert_eq!(strip_checksum(&[1, 2]), None);
    }
}
