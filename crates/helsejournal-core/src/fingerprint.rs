//! Content fingerprints used for per-owner deduplication.

use sha2::{Digest, Sha256};

/// Length of a fingerprint in hex characters (256 bits).
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// SHA-256 over the exact byte stream, lowercase hex.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// True if `s` has the shape of a fingerprint produced by [`fingerprint`].
pub fn is_fingerprint(s: &str) -> bool {
    s.len() == FINGERPRINT_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn deterministic_and_sensitive() {
        let a = fingerprint(b"%PDF-1.4 lab report");
        assert_eq!(a, fingerprint(b"%PDF-1.4 lab report"));
        assert_ne!(a, fingerprint(b"%PDF-1.4 lab report "));
        assert!(is_fingerprint(&a));
    }

    #[test]
    fn rejects_malformed() {
        assert!(!is_fingerprint("abc"));
        assert!(!is_fingerprint(&"G".repeat(64)));
    }
}
