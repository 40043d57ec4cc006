/// Token Signer
///
/// Issues and verifies self-contained HS256 tokens for both token classes.
/// Verification is offline: signature, issuer, class tag and expiry only.
/// Revocation state lives in the stores and is checked by the session layer.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{thread_rng, Rng};
use std::fmt;
use std::sync::Arc;

use crate::auth::claims::{Claims, TokenClass};
use crate::clock::Clock;
use crate::configuration::JwtSettings;
use crate::error::AppError;

/// Why an offline verification failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    InvalidSignature,
    Expired,
    WrongType,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Malformed => write!(f, "malformed token"),
            TokenError::InvalidSignature => write!(f, "invalid signature"),
            TokenError::Expired => write!(f, "token expired"),
            TokenError::WrongType => write!(f, "unexpected token type"),
        }
    }
}

impl std::error::Error for TokenError {}

/// A freshly signed token together with the claims embedded in it
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub claims: Claims,
}

struct ClassKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_seconds: i64,
}

impl ClassKey {
    fn new(secret: &str, ttl_seconds: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_seconds,
        }
    }
}

pub struct Signer {
    access: ClassKey,
    refresh: ClassKey,
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl Signer {
    pub fn new(config: &JwtSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            access: ClassKey::new(&config.access_secret, config.access_token_expiry),
            refresh: ClassKey::new(&config.refresh_secret, config.refresh_token_expiry),
            issuer: config.issuer.clone(),
            clock,
        }
    }

    fn key(&self, class: TokenClass) -> &ClassKey {
        match class {
            TokenClass::Access => &self.access,
            TokenClass::Refresh => &self.refresh,
        }
    }

    /// Configured lifetime of a token class in seconds
    pub fn ttl_seconds(&self, class: TokenClass) -> i64 {
        self.key(class).ttl_seconds
    }

    /// Issue a token of `class` for `subject` with the class lifetime
    ///
    /// # Errors
    /// Returns `AppError::Internal` if encoding fails
    pub fn issue(&self, subject: &str, class: TokenClass) -> Result<SignedToken, AppError> {
        let claims = Claims::new(
            subject,
            class,
            self.clock.now(),
            self.ttl_seconds(class),
            self.issuer.clone(),
            generate_jti(),
        );

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.key(class).encoding)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        Ok(SignedToken { token, claims })
    }

    /// Verify signature, issuer, class tag and expiry of `token`
    pub fn verify(&self, token: &str, class: TokenClass) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        // Expiry is checked against our own clock below
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &self.key(class).decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidIssuer
                | ErrorKind::InvalidAlgorithm => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })?;

        if claims.token_class != class {
            return Err(TokenError::WrongType);
        }

        if claims.is_expired_at(self.clock.now()) {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

/// 128 random bits, hex encoded
pub fn generate_jti() -> String {
    let id: u128 = thread_rng().gen();
    format!("{:032x}", id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, Utc};

    fn get_test_config() -> JwtSettings {
        JwtSettings {
            access_secret: "access-secret-key-at-least-32-characters".to_string(),
            refresh_secret: "refresh-secret-key-at-least-32-characters".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
        }
    }

    fn signer_with_clock(config: &JwtSettings) -> (Signer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (Signer::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_issue_and_verify_round_trip() {
        let (signer, _) = signer_with_clock(&get_test_config());

        for class in [TokenClass::Access, TokenClass::Refresh] {
            let signed = signer.issue("test@example.com", class).expect("issue");
            let claims = signer.verify(&signed.token, class).expect("verify");

            assert_eq!(claims, signed.claims);
            assert_eq!(claims.sub, "test@example.com");
            assert_eq!(claims.token_class, class);
            assert_eq!(claims.exp - claims.iat, signer.ttl_seconds(class));
        }
    }

    #[test]
    fn test_expires_strictly_after_exp() {
        let (signer, clock) = signer_with_clock(&get_test_config());
        let signed = signer.issue("test@example.com", TokenClass::Access).unwrap();

        clock.advance(Duration::seconds(900));
        assert!(signer.verify(&signed.token, TokenClass::Access).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(
            signer.verify(&signed.token, TokenClass::Access),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_refresh_token_rejected_as_access() {
        let (signer, _) = signer_with_clock(&get_test_config());
        let refresh = signer.issue("test@example.com", TokenClass::Refresh).unwrap();
        let access = signer.issue("test@example.com", TokenClass::Access).unwrap();

        // Distinct secrets: the signature check fails first
        assert!(signer.verify(&refresh.token, TokenClass::Access).is_err());
        assert!(signer.verify(&access.token, TokenClass::Refresh).is_err());
    }

    #[test]
    fn test_type_tag_checked_even_with_shared_secret() {
        let mut config = get_test_config();
        config.refresh_secret = config.access_secret.clone();
        let (signer, _) = signer_with_clock(&config);

        let refresh = signer.issue("test@example.com", TokenClass::Refresh).unwrap();
        assert_eq!(
            signer.verify(&refresh.token, TokenClass::Access),
            Err(TokenError::WrongType)
        );
    }

    #[test]
    fn test_invalid_token() {
        let (signer, _) = signer_with_clock(&get_test_config());
        let result = signer.verify("invalid.token.here", TokenClass::Access);
        assert!(matches!(
            result,
            Err(TokenError::Malformed) | Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_tampered_token() {
        let (signer, _) = signer_with_clock(&get_test_config());
        let signed = signer.issue("test@example.com", TokenClass::Access).unwrap();

        let tampered = format!("{}X", signed.token);
        assert!(signer.verify(&tampered, TokenClass::Access).is_err());
    }

    #[test]
    fn test_wrong_issuer() {
        let mut config = get_test_config();
        let (signer, _) = signer_with_clock(&config);
        let signed = signer.issue("test@example.com", TokenClass::Access).unwrap();

        config.issuer = "wrong-issuer".to_string();
        let (other, _) = signer_with_clock(&config);
        assert_eq!(
            other.verify(&signed.token, TokenClass::Access),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_jti_is_unique_and_128_bit() {
        let (signer, _) = signer_with_clock(&get_test_config());
        let a = signer.issue("test@example.com", TokenClass::Access).unwrap();
        let b = signer.issue("test@example.com", TokenClass::Access).unwrap();

        assert_ne!(a.claims.jti, b.claims.jti);
        assert_eq!(a.claims.jti.len(), 32);
        assert!(a.claims.jti.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
