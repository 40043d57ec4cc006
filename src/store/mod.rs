//! Credential and revocation storage.
//!
//! The session layer talks to storage only through the two traits below.
//! `postgres` is the production backend; `memory` keeps the same semantics
//! in-process for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;

mod memory;
mod postgres;
mod records;

pub use memory::MemoryStore;
pub use postgres::{PgCredentialStore, PgRevocationStore};
pub use records::{
    BlacklistEntry, LedgerState, NewRefreshToken, NewUser, PurgeReport, RefreshTokenRow, Upsert,
    User, UserView,
};

/// User records. Email lookups are case-insensitive.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    /// Create the user and record its first refresh token as ACTIVE, in one
    /// transaction. Either both rows exist afterwards or neither does.
    ///
    /// # Errors
    /// `AuthError::DuplicateEmail` when the email is already taken, including
    /// when a concurrent insert wins the race.
    async fn create_user(
        &self,
        new_user: NewUser,
        first_session: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<User, AppError>;

    async fn update_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;
}

/// Access token blacklist and refresh token ledger.
///
/// Every method is atomic on its own; `rotate_if_active` and
/// `revoke_all_for_owner` are the only cross-row operations.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn is_blacklisted(&self, jti: &str) -> Result<bool, AppError>;

    /// Idempotent: a second call for the same jti reports `AlreadyPresent`.
    async fn blacklist(&self, entry: BlacklistEntry) -> Result<Upsert, AppError>;

    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn get_refresh_token(&self, jti: &str) -> Result<Option<RefreshTokenRow>, AppError>;

    /// Marks `old_jti` rotated (revoked, `replaced_by = replacement.jti`) and
    /// inserts `replacement` as ACTIVE, in one transaction, only if `old_jti`
    /// is currently ACTIVE. Returns `false` and changes nothing otherwise.
    async fn rotate_if_active(
        &self,
        old_jti: &str,
        replacement: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Revoke a single unrevoked row. Returns whether a row changed.
    async fn revoke(&self, jti: &str, now: DateTime<Utc>) -> Result<bool, AppError>;

    /// Bulk-revoke every ACTIVE row owned by `owner_email`.
    async fn revoke_all_for_owner(
        &self,
        owner_email: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    /// Delete blacklist entries and ledger rows whose expiry is before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport, AppError>;
}
