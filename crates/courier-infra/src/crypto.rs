//! Confirmation-secret digests.
//!
//! Only the SHA-256 digest of an organization's confirmation secret is
//! stored. Validation hashes the presented token and compares digests in
//! constant time.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of `secret`.
pub fn digest_hex(secret: &str) -> String {
    format!("{:x}", Sha256::digest(secret.as_bytes()))
}

/// Whether `presented` hashes to `stored_digest`.
pub fn verify_digest(stored_digest: &str, presented: &str) -> bool {
    constant_time_eq(stored_digest.as_bytes(), digest_hex(presented).as_bytes())
}

/// Constant-time byte comparison (XOR-based). Time taken is independent of
/// how many bytes match.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_known_value() {
        assert_eq!(
            digest_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify_digest() {
        let stored = digest_hex("confirm-bulk-2024");
        assert!(verify_digest(&stored, "confirm-bulk-2024"));
        assert!(!verify_digest(&stored, "confirm-bulk-2025"));
        assert!(!verify_digest(&stored, ""));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
