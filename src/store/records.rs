use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::TokenClass;

/// Persisted user record
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Fields needed to create a user; `email` is already normalised
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

/// Public projection of a user, safe to return to clients
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            phone: user.phone.clone(),
            is_active: user.is_active,
            is_verified: user.is_verified,
            created_at: user.created_at,
            last_login: user.last_login,
        }
    }
}

/// Chain state of a refresh token ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    Active,
    Rotated,
    Revoked,
    Expired,
}

/// One row of the refresh token ledger
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRow {
    pub jti: String,
    pub owner_email: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRow {
    /// Expiry wins over every other state; a rotated row is a revoked row
    /// with a successor.
    pub fn state(&self, now: DateTime<Utc>) -> LedgerState {
        if now > self.expires_at {
            LedgerState::Expired
        } else if self.revoked && self.replaced_by.is_some() {
            LedgerState::Rotated
        } else if self.revoked {
            LedgerState::Revoked
        } else {
            LedgerState::Active
        }
    }
}

/// A refresh token about to enter the ledger as ACTIVE
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub jti: String,
    pub owner_email: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl NewRefreshToken {
    pub fn into_row(self, created_at: DateTime<Utc>) -> RefreshTokenRow {
        RefreshTokenRow {
            jti: self.jti,
            owner_email: self.owner_email,
            token_hash: self.token_hash,
            expires_at: self.expires_at,
            revoked: false,
            revoked_at: None,
            replaced_by: None,
            created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlacklistEntry {
    pub jti: String,
    pub token_class: TokenClass,
    pub owner_email: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Result of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    AlreadyPresent,
}

/// Rows removed by a purge run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub blacklist_entries: u64,
    pub refresh_tokens: u64,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.blacklist_entries + self.refresh_tokens
    }
}
