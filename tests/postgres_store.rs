//! PostgreSQL store tests. Need a running database matching
//! `configuration.yaml`; run with `cargo test -- --ignored`.

use chrono::{Duration, SubsecRound, Utc};
use sqlx::{Connection, Executor, PgConnection, PgPool};

use session_auth::auth::TokenClass;
use session_auth::configuration::{get_configuration, DatabaseSettings};
use session_auth::error::AuthError;
use session_auth::store::{
    BlacklistEntry, CredentialStore, LedgerState, NewRefreshToken, NewUser, PgCredentialStore,
    PgRevocationStore, RevocationStore, Upsert,
};

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");

    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

async fn spawn_pool() -> PgPool {
    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = uuid::Uuid::new_v4().to_string();
    configure_database(&configuration.database).await
}

fn new_token(jti: &str, owner: &str, days: i64) -> NewRefreshToken {
    NewRefreshToken {
        jti: jti.to_string(),
        owner_email: owner.to_string(),
        token_hash: format!("hash-{}", jti),
        expires_at: Utc::now().trunc_subsecs(0) + Duration::days(days),
    }
}

#[tokio::test]
#[ignore]
async fn duplicate_email_is_case_insensitive() {
    let store = PgCredentialStore::new(spawn_pool().await);
    let now = Utc::now();
    let user = |email: &str| NewUser {
        email: email.to_string(),
        password_hash: "hash".to_string(),
        full_name: None,
        phone: None,
    };

    store
        .create_user(user("a@x.com"), new_token("s1", "a@x.com", 7), now)
        .await
        .unwrap();
    let err = store
        .create_user(user("A@X.com"), new_token("s2", "a@x.com", 7), now)
        .await
        .unwrap_err();
    assert_eq!(err.auth_kind(), Some(AuthError::DuplicateEmail));

    let found = store.find_user_by_email("A@x.COM").await.unwrap().unwrap();
    store.update_last_login(found.id, now).await.unwrap();
    let found = store.find_user_by_email("a@x.com").await.unwrap().unwrap();
    assert!(found.last_login.is_some());
}

#[tokio::test]
#[ignore]
async fn failed_first_session_insert_rolls_back_the_user() {
    let pool = spawn_pool().await;
    let credentials = PgCredentialStore::new(pool.clone());
    let ledger = PgRevocationStore::new(pool);
    let now = Utc::now().trunc_subsecs(0);
    ledger
        .insert_refresh_token(new_token("taken", "other@x.com", 7), now)
        .await
        .unwrap();

    let user = NewUser {
        email: "a@x.com".to_string(),
        password_hash: "hash".to_string(),
        full_name: None,
        phone: None,
    };
    let err = credentials
        .create_user(user.clone(), new_token("taken", "a@x.com", 7), now)
        .await
        .unwrap_err();
    assert_ne!(err.auth_kind(), Some(AuthError::DuplicateEmail));
    assert!(credentials.find_user_by_email("a@x.com").await.unwrap().is_none());

    credentials
        .create_user(user, new_token("fresh", "a@x.com", 7), now)
        .await
        .unwrap();
    let row = ledger.get_refresh_token("fresh").await.unwrap().unwrap();
    assert_eq!(row.state(now), LedgerState::Active);
}

#[tokio::test]
#[ignore]
async fn rotation_succeeds_exactly_once() {
    let store = PgRevocationStore::new(spawn_pool().await);
    let now = Utc::now();
    store
        .insert_refresh_token(new_token("t0", "a@x.com", 7), now)
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        store.rotate_if_active("t0", new_token("t1", "a@x.com", 7), now),
        store.rotate_if_active("t0", new_token("t2", "a@x.com", 7), now)
    );
    let wins = [first.unwrap(), second.unwrap()].iter().filter(|w| **w).count();
    assert_eq!(wins, 1);

    let old = store.get_refresh_token("t0").await.unwrap().unwrap();
    assert_eq!(old.state(now), LedgerState::Rotated);
}

#[tokio::test]
#[ignore]
async fn blacklist_upsert_and_purge() {
    let store = PgRevocationStore::new(spawn_pool().await);
    let now = Utc::now().trunc_subsecs(0);
    let entry = BlacklistEntry {
        jti: "j".to_string(),
        token_class: TokenClass::Access,
        owner_email: Some("a@x.com".to_string()),
        expires_at: now + Duration::minutes(15),
    };

    assert_eq!(store.blacklist(entry.clone()).await.unwrap(), Upsert::Inserted);
    assert_eq!(store.blacklist(entry).await.unwrap(), Upsert::AlreadyPresent);

    store
        .insert_refresh_token(new_token("live", "a@x.com", 7), now)
        .await
        .unwrap();
    assert!(store.revoke("live", now).await.unwrap());
    assert!(!store.revoke("live", now).await.unwrap());

    let report = store.purge_expired(now).await.unwrap();
    assert_eq!(report.total(), 0);

    let report = store.purge_expired(now + Duration::days(8)).await.unwrap();
    assert_eq!(report.blacklist_entries, 1);
    assert_eq!(report.refresh_tokens, 1);
}

#[tokio::test]
#[ignore]
async fn revoke_all_for_owner_is_scoped() {
    let store = PgRevocationStore::new(spawn_pool().await);
    let now = Utc::now();
    for (jti, owner) in [("a1", "a@x.com"), ("a2", "a@x.com"), ("b1", "b@x.com")] {
        store
            .insert_refresh_token(new_token(jti, owner, 7), now)
            .await
            .unwrap();
    }

    assert_eq!(store.revoke_all_for_owner("a@x.com", now).await.unwrap(), 2);
    let b1 = store.get_refresh_token("b1").await.unwrap().unwrap();
    assert_eq!(b1.state(now), LedgerState::Active);
}
