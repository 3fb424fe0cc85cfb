//! Unsigned LEB128 integers, as used in binary revision IDs.

pub(crate) fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Reads one varint from the front of `input`, advancing it.
pub(crate) fn read_uvarint(input: &mut &[u8]) -> Option<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in input.iter().enumerate() {
        if shift >= 64 || (shift == 63 && byte > 1) {
            return None;
        }
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            *input = &input[i + 1..];
            return Some(result);
        }
        shift += 7;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_are_one_byte() {
        let mut out = Vec::new();
        write_uvarint(&mut out, 0x7F);
        assert_eq!(out, vec![0x7F]);
    }

    #[test]
    fn test_read_advances_input() {
        let mut out = Vec::new();
        write_uvarint(&mut out, 300);
        write_uvarint(&mut out, u64::MAX);
        out.push(0xAA);

        let mut input = out.as_slice();
        assert_eq!(read_uvarint(&mut input), Some(300));
        assert_eq!(read_uvarint(&mut input), Some(u64::MAX));
        assert_eq!(input, &[0xAA]);
    }

    #[test]
    fn test_truncated_varint() {
        let mut input: &[u8] = &[0x80, 0x80];
        assert_eq!(read_uvarint(&mut input), None);
    }
}
