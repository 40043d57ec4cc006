/// PostgreSQL storage
///
/// Schema lives in `migrations/`. Conditional updates carry the concurrency
/// guarantees: Postgres re-evaluates the `WHERE` clause after a competing
/// writer commits, so two rotations of the same row cannot both match.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::records::{
    BlacklistEntry, NewRefreshToken, NewUser, PurgeReport, RefreshTokenRow, Upsert, User,
};
use super::{CredentialStore, RevocationStore};
use crate::error::{AppError, AuthError, StoreError};

async fn insert_ledger_row(
    conn: &mut PgConnection,
    token: &NewRefreshToken,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (jti, owner_email, token_hash, expires_at, revoked, created_at)
        VALUES ($1, $2, $3, $4, false, $5)
        "#,
    )
    .bind(&token.jti)
    .bind(&token.owner_email)
    .bind(&token.token_hash)
    .bind(token.expires_at)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, full_name, phone, is_active, is_verified,
                   created_at, updated_at, last_login
            FROM users
            WHERE LOWER(email) = LOWER($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create_user(
        &self,
        new_user: NewUser,
        first_session: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<User, AppError> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, password_hash, full_name, phone, is_active, is_verified,
                               created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, true, false, $6, $6)
            RETURNING id, email, password_hash, full_name, phone, is_active, is_verified,
                      created_at, updated_at, last_login
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(&new_user.full_name)
        .bind(&new_user.phone)
        .bind(now)
        .fetch_one(&mut tx)
        .await;

        // Dropping `tx` on any early return rolls the user row back
        let user = match created.map_err(StoreError::from) {
            Ok(user) => user,
            Err(StoreError::UniqueViolation(_)) => return Err(AuthError::DuplicateEmail.into()),
            Err(e) => return Err(e.into()),
        };

        insert_ledger_row(&mut tx, &first_session, now).await?;

        tx.commit().await?;
        Ok(user)
    }

    async fn update_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET last_login = $1, updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(at)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgRevocationStore {
    pool: PgPool,
}

impl PgRevocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationStore for PgRevocationStore {
    async fn is_blacklisted(&self, jti: &str) -> Result<bool, AppError> {
        let hit = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM token_blacklist WHERE jti = $1",
        )
        .bind(jti)
        .fetch_one(&self.pool)
        .await?;

        Ok(hit > 0)
    }

    async fn blacklist(&self, entry: BlacklistEntry) -> Result<Upsert, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO token_blacklist (jti, token_type, owner_email, expires_at, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(&entry.jti)
        .bind(entry.token_class.as_str())
        .bind(&entry.owner_email)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(Upsert::AlreadyPresent)
        } else {
            Ok(Upsert::Inserted)
        }
    }

    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut conn = self.pool.acquire().await?;
        insert_ledger_row(&mut conn, &token, now).await
    }

    async fn get_refresh_token(&self, jti: &str) -> Result<Option<RefreshTokenRow>, AppError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            SELECT jti, owner_email, token_hash, expires_at, revoked, revoked_at, replaced_by,
                   created_at
            FROM refresh_tokens
            WHERE jti = $1
            "#,
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn rotate_if_active(
        &self,
        old_jti: &str,
        replacement: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, revoked_at = $1, replaced_by = $2
            WHERE jti = $3 AND revoked = false AND expires_at >= $1
            "#,
        )
        .bind(now)
        .bind(&replacement.jti)
        .bind(old_jti)
        .execute(&mut tx)
        .await?;

        if marked.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_ledger_row(&mut tx, &replacement, now).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke(&self, jti: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, revoked_at = $1
            WHERE jti = $2 AND revoked = false
            "#,
        )
        .bind(now)
        .bind(jti)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_owner(
        &self,
        owner_email: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, revoked_at = $1
            WHERE owner_email = $2 AND revoked = false AND expires_at >= $1
            "#,
        )
        .bind(now)
        .bind(owner_email)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport, AppError> {
        let mut tx = self.pool.begin().await?;

        let blacklist = sqlx::query("DELETE FROM token_blacklist WHERE expires_at < $1")
            .bind(now)
            .execute(&mut tx)
            .await?;

        let ledger = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;

        Ok(PurgeReport {
            blacklist_entries: blacklist.rows_affected(),
            refresh_tokens: ledger.rows_affected(),
        })
    }
}
