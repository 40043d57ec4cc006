/// JWT Claims structure
///
/// Payload shared by access and refresh tokens. The `type` claim binds a
/// token to its class so one can never stand in for the other.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two token classes this service issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenClass {
    Access,
    Refresh,
}

impl TokenClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenClass::Access => "access",
            TokenClass::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered claims (RFC 7519) plus the token class tag
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (owner email, normalised to lower case)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Issuer
    pub iss: String,
    /// Unique token id; key for the blacklist and refresh ledger
    pub jti: String,
    #[serde(rename = "type")]
    pub token_class: TokenClass,
}

impl Claims {
    pub fn new(
        subject: impl Into<String>,
        token_class: TokenClass,
        issued_at: DateTime<Utc>,
        ttl_seconds: i64,
        issuer: impl Into<String>,
        jti: impl Into<String>,
    ) -> Self {
        let iat = issued_at.timestamp();
        Self {
            sub: subject.into(),
            exp: iat + ttl_seconds,
            iat,
            iss: issuer.into(),
            jti: jti.into(),
            token_class,
        }
    }

    /// Expired strictly after `exp`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() > self.exp
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims_at(now: DateTime<Utc>) -> Claims {
        Claims::new("test@example.com", TokenClass::Access, now, 900, "test", "jti-1")
    }

    #[test]
    fn test_claims_creation() {
        let now = Utc::now();
        let claims = claims_at(now);

        assert_eq!(claims.sub, "test@example.com");
        assert_eq!(claims.iat, now.timestamp());
        assert_eq!(claims.exp, now.timestamp() + 900);
        assert_eq!(claims.token_class, TokenClass::Access);
    }

    #[test]
    fn test_expiry_is_strict() {
        let now = Utc::now();
        let claims = claims_at(now);

        assert!(!claims.is_expired_at(now + Duration::seconds(900)));
        assert!(claims.is_expired_at(now + Duration::seconds(901)));
    }

    #[test]
    fn test_type_claim_serialization() {
        let claims = claims_at(Utc::now());
        let json = serde_json::to_value(&claims).unwrap();

        assert_eq!(json["type"], "access");
        assert!(json.get("token_class").is_none());
    }
}
