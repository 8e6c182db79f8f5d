// src/ingest/fingerprint.rs
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use crate::ingest::normalize::truncate_chars;

/// Joined input is capped at this many characters before hashing.
pub const MAX_FINGERPRINT_INPUT_CHARS: usize = 1_000_000;

/// SHA-256 hex over the present fields joined with `\n`.
///
/// Absent and empty fields are skipped, so `[Some("a"), None, Some("b")]`
/// and `[Some("a"), Some("b")]` collide on purpose. Field order matters.
pub fn fingerprint(fields: &[Option<&str>]) -> String {
    let joined = fields
        .iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    let input = truncate_chars(&joined, MAX_FINGERPRINT_INPUT_CHARS);

    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_and_sensitive_to_each_field() {
        let base = [Some("g1"), Some("https://x"), Some("Title"), Some("Body")];
        let a = fingerprint(&base);
        assert_eq!(a, fingerprint(&base));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        for i in 0..base.len() {
            let mut changed = base;
            changed[i] = Some("different");
            assert_ne!(a, fingerprint(&changed), "field {i} should affect the hash");
        }
    }

    #[test]
    fn absent_fields_are_skipped() {
        assert_eq!(
            fingerprint(&[None, Some("a"), None, Some("b")]),
            fingerprint(&[Some("a"), Some("b")])
        );
    }

    #[test]
    fn empty_input_hashes_empty_string() {
        assert_eq!(
            fingerprint(&[None, None]),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn oversized_input_is_truncated() {
        let big = "x".repeat(MAX_FINGERPRINT_INPUT_CHARS + 10);
        let capped = "x".repeat(MAX_FINGERPRINT_INPUT_CHARS);
        assert_eq!(fingerprint(&[Some(&big)]), fingerprint(&[Some(&capped)]));
    }
}
