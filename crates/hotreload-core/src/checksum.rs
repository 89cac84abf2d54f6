//! Content checksum for `fileChanged` payloads.
//!
//! Clients compare this value against the last applied revision of a file to
//! skip redundant reloads. Only determinism matters; SHA-256 is used because
//! it is already in the dependency graph and has a fixed-length output.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `content`.
pub fn content_checksum(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic() {
        assert_eq!(content_checksum(b"struct A {}"), content_checksum(b"struct A {}"));
    }

    #[test]
    fn checksum_changes_with_content() {
        assert_ne!(content_checksum(b"let a = 1"), content_checksum(b"let a = 2"));
    }

    #[test]
    fn checksum_is_fixed_length_hex() {
        let sum = content_checksum(b"");
        assert_eq!(sum.len(), 64);
        assert_eq!(
            sum,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(content_checksum(&[0u8; 4096]).chars().all(|c| c.is_ascii_hexdigit()));
    }
}
