//! The cluster hash slot algorithm (spec §4.2 "Cluster slot computation").

use bytes::Bytes;
use crc::{CRC_16_XMODEM, Crc};

/// The total number of hash slots in the cluster.
pub const NUM_SLOTS: usize = 16384;

/// CRC-16/XMODEM (poly `0x1021`, init `0x0000`), the algorithm whose
/// output matches the documented boundary value `slot("foo") == 12182`.
const CRC16_ALGO: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Computes the hash slot for a routing key.
///
/// If the key contains a hash tag `{...}`, only the substring between the
/// first `{` and the next `}` is hashed when that substring is non-empty;
/// otherwise the whole key is hashed. The same rule applies byte-for-byte
/// to both textual and binary keys, since `Bytes` makes no UTF-8
/// assumption.
pub fn get_slot(key: &[u8]) -> u16 {
    if let Some(start) = key.iter().position(|&b| b == b'{')
        && let Some(end_offset) = key[start + 1..].iter().position(|&b| b == b'}')
    {
        let end = start + 1 + end_offset;
        if end > start + 1 {
            return CRC16_ALGO.checksum(&key[start + 1..end]) % (NUM_SLOTS as u16);
        }
    }
    CRC16_ALGO.checksum(key) % (NUM_SLOTS as u16)
}

/// Convenience wrapper for the common case of a `Bytes` key.
pub fn slot_for(key: &Bytes) -> u16 {
    get_slot(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foo_hashes_to_the_documented_slot() {
        assert_eq!(get_slot(b"foo"), 12182);
    }

    #[test]
    fn hash_tagged_keys_share_a_slot() {
        let a = get_slot(b"{user1000}.following");
        let b = get_slot(b"{user1000}.followers");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_hash_tag_falls_back_to_whole_key() {
        // "user:{}" has an empty tag, so it must NOT equal slot("") and
        // must instead hash the entire literal key.
        let whole_key_slot = get_slot(b"user:{}");
        let empty_slot = get_slot(b"");
        assert_ne!(whole_key_slot, empty_slot);
    }

    #[test]
    fn hash_tag_only_considers_the_first_closing_brace() {
        // "{a}{b}" should hash only "a", matching the "first { then next }" rule.
        assert_eq!(get_slot(b"{a}{b}"), get_slot(b"a"));
    }

    #[test]
    fn slot_is_always_within_range() {
        for key in [
            "a", "b", "somewhat-long-key-name", "", "{}", "{x}y", "1234567890",
        ] {
            assert!((get_slot(key.as_bytes()) as usize) < NUM_SLOTS);
        }
    }
}
