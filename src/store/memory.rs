use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::records::{
    BlacklistEntry, LedgerState, NewRefreshToken, NewUser, PurgeReport, RefreshTokenRow, Upsert,
    User,
};
use super::{CredentialStore, RevocationStore};
use crate::error::{AppError, AuthError, StoreError};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    // lower-cased email -> user id
    user_emails: HashMap<String, Uuid>,
    refresh_tokens: HashMap<String, RefreshTokenRow>,
    blacklist: HashMap<String, BlacklistEntry>,
}

/// In-process credential and revocation store.
///
/// One mutex guards every table, so each trait call is a single atomic step
/// just like a transaction against the Postgres backend.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
    fail_next_ledger_write: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
            fail_next_ledger_write: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every call fails with `StoreError::Unavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next write that inserts a ledger row fail with
    /// `StoreError::Unavailable`, leaving every table untouched
    pub fn fail_next_ledger_write(&self) {
        self.fail_next_ledger_write.store(true, Ordering::SeqCst);
    }

    /// Enable or disable an account. Returns false for unknown emails.
    pub fn set_user_active(&self, email: &str, active: bool) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        let Some(id) = tables.user_emails.get(&email.to_lowercase()).copied() else {
            return Ok(false);
        };
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.is_active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn blacklist_len(&self) -> Result<usize, AppError> {
        Ok(self.lock()?.blacklist.len())
    }

    pub fn refresh_token_count(&self) -> Result<usize, AppError> {
        Ok(self.lock()?.refresh_tokens.len())
    }

    fn take_ledger_fault(&self) -> Result<(), AppError> {
        if self.fail_next_ledger_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("ledger write failed".to_string()).into());
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()).into());
        }
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()).into())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let tables = self.lock()?;
        Ok(tables
            .user_emails
            .get(&email.to_lowercase())
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn create_user(
        &self,
        new_user: NewUser,
        first_session: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<User, AppError> {
        let mut tables = self.lock()?;
        let key = new_user.email.to_lowercase();
        if tables.user_emails.contains_key(&key) {
            return Err(AuthError::DuplicateEmail.into());
        }
        if tables.refresh_tokens.contains_key(&first_session.jti) {
            return Err(
                StoreError::UniqueViolation(format!("refresh token {}", first_session.jti)).into(),
            );
        }
        self.take_ledger_fault()?;

        // All checks passed; nothing below can fail
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            password_hash: new_user.password_hash,
            full_name: new_user.full_name,
            phone: new_user.phone,
            is_active: true,
            is_verified: false,
            created_at: now,
            updated_at: now,
            last_login: None,
        };
        tables.user_emails.insert(key, user.id);
        tables.users.insert(user.id, user.clone());
        tables
            .refresh_tokens
            .insert(first_session.jti.clone(), first_session.into_row(now));
        Ok(user)
    }

    async fn update_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.last_login = Some(at);
            user.updated_at = at;
        }
        Ok(())
    }
}

#[async_trait]
impl RevocationStore for MemoryStore {
    async fn is_blacklisted(&self, jti: &str) -> Result<bool, AppError> {
        Ok(self.lock()?.blacklist.contains_key(jti))
    }

    async fn blacklist(&self, entry: BlacklistEntry) -> Result<Upsert, AppError> {
        let mut tables = self.lock()?;
        if tables.blacklist.contains_key(&entry.jti) {
            return Ok(Upsert::AlreadyPresent);
        }
        tables.blacklist.insert(entry.jti.clone(), entry);
        Ok(Upsert::Inserted)
    }

    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        if tables.refresh_tokens.contains_key(&token.jti) {
            return Err(StoreError::UniqueViolation(format!("refresh token {}", token.jti)).into());
        }
        self.take_ledger_fault()?;
        tables
            .refresh_tokens
            .insert(token.jti.clone(), token.into_row(now));
        Ok(())
    }

    async fn get_refresh_token(&self, jti: &str) -> Result<Option<RefreshTokenRow>, AppError> {
        Ok(self.lock()?.refresh_tokens.get(jti).cloned())
    }

    async fn rotate_if_active(
        &self,
        old_jti: &str,
        replacement: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        if tables.refresh_tokens.contains_key(&replacement.jti) {
            return Err(
                StoreError::UniqueViolation(format!("refresh token {}", replacement.jti)).into(),
            );
        }

        match tables.refresh_tokens.get_mut(old_jti) {
            Some(row) if row.state(now) == LedgerState::Active => {
                row.revoked = true;
                row.revoked_at = Some(now);
                row.replaced_by = Some(replacement.jti.clone());
            }
            _ => return Ok(false),
        }

        tables
            .refresh_tokens
            .insert(replacement.jti.clone(), replacement.into_row(now));
        Ok(true)
    }

    async fn revoke(&self, jti: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        match tables.refresh_tokens.get_mut(jti) {
            Some(row) if !row.revoked => {
                row.revoked = true;
                row.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_owner(
        &self,
        owner_email: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut tables = self.lock()?;
        let mut count = 0;
        for row in tables.refresh_tokens.values_mut() {
            if row.owner_email == owner_email && row.state(now) == LedgerState::Active {
                row.revoked = true;
                row.revoked_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport, AppError> {
        let mut tables = self.lock()?;

        let before = tables.blacklist.len();
        tables.blacklist.retain(|_, entry| entry.expires_at >= now);
        let blacklist_entries = (before - tables.blacklist.len()) as u64;

        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|_, row| row.expires_at >= now);
        let refresh_tokens = (before - tables.refresh_tokens.len()) as u64;

        Ok(PurgeReport {
            blacklist_entries,
            refresh_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenClass;
    use chrono::Duration;

    fn new_token(jti: &str, owner: &str, expires_at: DateTime<Utc>) -> NewRefreshToken {
        NewRefreshToken {
            jti: jti.to_string(),
            owner_email: owner.to_string(),
            token_hash: format!("hash-{}", jti),
            expires_at,
        }
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            full_name: None,
            phone: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_is_case_insensitive() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let exp = now + Duration::days(7);
        store
            .create_user(new_user("a@x.com"), new_token("s1", "a@x.com", exp), now)
            .await
            .unwrap();

        let err = store
            .create_user(new_user("A@X.com"), new_token("s2", "a@x.com", exp), now)
            .await
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::DuplicateEmail));
        assert!(store.find_user_by_email("A@x.COM").await.unwrap().is_some());
        assert!(store.get_refresh_token("s2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_user_is_all_or_nothing() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let exp = now + Duration::days(7);

        store.fail_next_ledger_write();
        let err = store
            .create_user(new_user("a@x.com"), new_token("s1", "a@x.com", exp), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::Unavailable(_))));
        assert!(store.find_user_by_email("a@x.com").await.unwrap().is_none());
        assert_eq!(store.refresh_token_count().unwrap(), 0);

        let user = store
            .create_user(new_user("a@x.com"), new_token("s1", "a@x.com", exp), now)
            .await
            .unwrap();
        assert_eq!(user.email, "a@x.com");
        let row = store.get_refresh_token("s1").await.unwrap().unwrap();
        assert_eq!(row.state(now), LedgerState::Active);
    }

    #[tokio::test]
    async fn test_rotate_only_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let exp = now + Duration::days(7);
        store.insert_refresh_token(new_token("t0", "a@x.com", exp), now).await.unwrap();

        assert!(store.rotate_if_active("t0", new_token("t1", "a@x.com", exp), now).await.unwrap());
        assert!(!store.rotate_if_active("t0", new_token("t2", "a@x.com", exp), now).await.unwrap());

        let old = store.get_refresh_token("t0").await.unwrap().unwrap();
        assert_eq!(old.state(now), LedgerState::Rotated);
        assert_eq!(old.replaced_by.as_deref(), Some("t1"));
        assert!(store.get_refresh_token("t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_missing_row_fails() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let rotated = store
            .rotate_if_active("missing", new_token("t1", "a@x.com", now), now)
            .await
            .unwrap();
        assert!(!rotated);
        assert_eq!(store.refresh_token_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blacklist_is_idempotent() {
        let store = MemoryStore::new();
        let entry = BlacklistEntry {
            jti: "j".to_string(),
            token_class: TokenClass::Access,
            owner_email: Some("a@x.com".to_string()),
            expires_at: Utc::now(),
        };

        assert_eq!(store.blacklist(entry.clone()).await.unwrap(), Upsert::Inserted);
        assert_eq!(store.blacklist(entry).await.unwrap(), Upsert::AlreadyPresent);
        assert!(store.is_blacklisted("j").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all_skips_other_owners() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let exp = now + Duration::days(7);
        for (jti, owner) in [("a1", "a@x.com"), ("a2", "a@x.com"), ("b1", "b@x.com")] {
            store.insert_refresh_token(new_token(jti, owner, exp), now).await.unwrap();
        }

        assert_eq!(store.revoke_all_for_owner("a@x.com", now).await.unwrap(), 2);
        assert_eq!(store.revoke_all_for_owner("a@x.com", now).await.unwrap(), 0);
        let b1 = store.get_refresh_token("b1").await.unwrap().unwrap();
        assert_eq!(b1.state(now), LedgerState::Active);
    }

    #[tokio::test]
    async fn test_outage_surfaces_store_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);

        let err = store.is_blacklisted("j").await.unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::Unavailable(_))));
    }
}
