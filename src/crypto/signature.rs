//! Webhook signature verification.
//!
//! The platform signs `[token, timestamp, nonce, body]` by sorting the four
//! strings lexicographically, concatenating them without a separator and
//! taking the lowercase SHA-1 hex digest. Field position plays no part.

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Compute the signature the platform would send for these inputs.
pub fn compute_signature(token: &str, timestamp: &str, nonce: &str, body: &str) -> String {
    let mut parts = [token, timestamp, nonce, body];
    parts.sort_unstable();

    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Verify a supplied signature. Never errors: a mismatch is `false`.
///
/// Comparison is exact (case-sensitive) and constant-time.
pub fn verify(token: &str, timestamp: &str, nonce: &str, body: &str, signature: &str) -> bool {
    let expected = compute_signature(token, timestamp, nonce, body);
    bool::from(expected.as_bytes().ct_eq(signature.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "test_token";
    const TIMESTAMP: &str = "1234567890";
    const NONCE: &str = "random_nonce";
    const BODY: &str = "test_data";

    #[test]
    fn test_known_vector() {
        // sorted: 1234567890, random_nonce, test_data, test_token
        let signature = compute_signature(TOKEN, TIMESTAMP, NONCE, BODY);
        assert_eq!(signature, "d42b6f5c48df1a860d2a78071bf9903579a5f43c");
        assert!(verify(TOKEN, TIMESTAMP, NONCE, BODY, &signature));
        assert!(!verify(TOKEN, TIMESTAMP, NONCE, BODY, "invalid_signature"));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let first = compute_signature(TOKEN, TIMESTAMP, NONCE, BODY);
        let second = compute_signature(TOKEN, TIMESTAMP, NONCE, BODY);
        assert_eq!(first, second);
    }

    #[test]
    fn test_argument_position_does_not_matter() {
        let expected = compute_signature(TOKEN, TIMESTAMP, NONCE, BODY);
        assert_eq!(compute_signature(BODY, NONCE, TIMESTAMP, TOKEN), expected);
        assert_eq!(compute_signature(NONCE, TOKEN, BODY, TIMESTAMP), expected);
    }

    #[test]
    fn test_empty_inputs() {
        // SHA-1 of the empty string
        let signature = compute_signature("", "", "", "");
        assert_eq!(signature, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert!(verify("", "", "", "", &signature));

        let partial = compute_signature("", "b", "", "a");
        assert_eq!(partial, compute_signature("a", "", "b", ""));
        assert!(verify("", "b", "", "a", &partial));
    }

    #[test]
    fn test_single_character_mutation_fails() {
        let signature = compute_signature(TOKEN, TIMESTAMP, NONCE, BODY);
        for i in 0..signature.len() {
            let mut bytes = signature.clone().into_bytes();
            bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
            let mutated = String::from_utf8(bytes).unwrap();
            assert!(
                !verify(TOKEN, TIMESTAMP, NONCE, BODY, &mutated),
                "mutation at {} was accepted",
                i
            );
        }
    }

    #[test]
    fn test_case_folded_signature_fails() {
        let signature = compute_signature(TOKEN, TIMESTAMP, NONCE, BODY);
        assert!(!verify(TOKEN, TIMESTAMP, NONCE, BODY, &signature.to_uppercase()));
    }

    #[test]
    fn test_truncated_signature_fails() {
        let signature = compute_signature(TOKEN, TIMESTAMP, NONCE, BODY);
        assert!(!verify(TOKEN, TIMESTAMP, NONCE, BODY, &signature[..39]));
        assert!(!verify(TOKEN, TIMESTAMP, NONCE, BODY, ""));
    }
}
