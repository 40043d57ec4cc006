/// Authentication primitives
///
/// Token signing/verification, password hashing and refresh token
/// fingerprinting. Everything here is stateless.

mod claims;
mod digest;
mod password;
mod signer;

pub use claims::{Claims, TokenClass};
pub use digest::{digest_matches, token_digest};
pub use password::{
    hash_password, timing_equalizer_hash, validate_password_strength, verify_password,
};
pub use signer::{generate_jti, SignedToken, Signer, TokenError};
