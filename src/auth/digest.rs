/// Refresh token fingerprinting
///
/// The ledger stores a SHA-256 digest of the full signed refresh token,
/// never the token itself.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the signed token string
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whether `token` hashes to `stored_digest`
///
/// The comparison touches every byte regardless of where the first
/// difference is.
pub fn digest_matches(token: &str, stored_digest: &str) -> bool {
    let computed = token_digest(token);
    let (a, b) = (computed.as_bytes(), stored_digest.as_bytes());
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_hashing() {
        let token = "header.payload.signature";
        let hash1 = token_digest(token);
        let hash2 = token_digest(token);

        assert_eq!(hash1, hash2);
        assert_ne!(token, hash1);
        // SHA-256 hex
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_tokens_different_hashes() {
        assert_ne!(token_digest("token-a"), token_digest("token-b"));
    }

    #[test]
    fn test_known_vector() {
        assert_eq!(
            token_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_matches() {
        let stored = token_digest("header.payload.signature");
        assert!(digest_matches("header.payload.signature", &stored));
        assert!(!digest_matches("header.payload.signaturf", &stored));
        assert!(!digest_matches("header.payload.signature", &stored[..63]));
        assert!(!digest_matches("header.payload.signature", ""));
    }
}
