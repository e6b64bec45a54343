//! Content checksum and fixed-capacity packet splitting (C1).

use byteorder::{BigEndian, ReadBytesExt};
use md5::{Digest, Md5};
use std::io::Cursor;

use crate::config::MAX_PAYLOAD_SIZE;

/// Computes the checksum used to protect a DATA packet's payload: the
/// high 32 bits of the MD5 digest of the UTF-8 encoding, i.e. the first
/// 8 hex characters of the digest parsed as a big-endian integer. Empty
/// input yields 0.
pub fn checksum(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }

    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();

    Cursor::new(&digest[..4])
        .read_u32::<BigEndian>()
        .expect("MD5 digest is always at least 4 bytes")
}

/// Returns true iff `checksum(text) == expected`.
pub fn verify(text: &str, expected: u32) -> bool {
    checksum(text) == expected
}

/// Partitions `message` into consecutive slices of up to `cap` code
/// units. The concatenation of the returned slices equals the input;
/// every slice is non-empty; empty input yields an empty list.
pub fn split(message: &str, cap: usize) -> Vec<String> {
    debug_assert!(cap > 0, "split capacity must be positive");

    if message.is_empty() {
        return Vec::new();
    }

    message
        .chars()
        .collect::<Vec<char>>()
        .chunks(cap.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// `split` with the protocol's default packet payload cap of 4.
pub fn split_default(message: &str) -> Vec<String> {
    split(message, MAX_PAYLOAD_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_empty_is_zero() {
        assert_eq!(checksum(""), 0);
    }

    #[test]
    fn test_checksum_is_deterministic() {
        assert_eq!(checksum("Hell"), checksum("Hell"));
        assert_ne!(checksum("Hell"), checksum("hell"));
    }

    #[test]
    fn test_verify_roundtrip() {
        let payload = "iabi";
        let sum = checksum(payload);
        assert!(verify(payload, sum));
        assert!(!verify(payload, sum.wrapping_add(1)));
    }

    #[test]
    fn test_split_empty() {
        assert_eq!(split("", 4), Vec::<String>::new());
    }

    #[test]
    fn test_split_exact_boundary() {
        let parts = split("Hello, this is a reliability demo!", 4);
        let expected = vec![
            "Hell", "o, t", "his ", "is a", " rel", "iabi", "lity", " dem", "o!",
        ];
        assert_eq!(parts, expected);
    }

    #[test]
    fn test_split_concatenation_invariant() {
        let message = "a reasonably sized demonstration message";
        let parts = split(message, 4);
        assert_eq!(parts.concat(), message);
        assert!(parts.iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn test_split_default_uses_cap_of_four() {
        assert_eq!(split_default("abcdefgh"), vec!["abcd", "efgh"]);
    }
}
