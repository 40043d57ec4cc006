/// Session Manager
///
/// Orchestrates register / login / refresh / logout over the signer and the
/// two stores. Holds no mutable state of its own: every cross-request
/// decision (single-use refresh, blacklist, bulk revoke) is delegated to an
/// atomic store operation.

use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;

use crate::auth::{
    digest_matches, hash_password, timing_equalizer_hash, token_digest, validate_password_strength,
    verify_password, Claims, SignedToken, Signer, TokenClass,
};
use crate::clock::Clock;
use crate::configuration::{JwtSettings, PasswordSettings};
use crate::error::{AppError, AuthError, ErrorContext};
use crate::session::types::{LogoutOutcome, Registration, TokenPair};
use crate::store::{
    BlacklistEntry, CredentialStore, LedgerState, NewRefreshToken, NewUser, PurgeReport,
    RevocationStore, Upsert, User, UserView,
};
use crate::validators::{normalize_email, validate_full_name, validate_phone};

pub struct SessionManager {
    signer: Signer,
    credentials: Arc<dyn CredentialStore>,
    revocations: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
    hash_cost: u32,
    timing_hash: String,
}

/// Log a rejected operation and return it as an error
fn reject<T>(context: &ErrorContext, err: impl Into<AppError>) -> Result<T, AppError> {
    let err = err.into();
    context.log_error(&err);
    Err(err)
}

impl SessionManager {
    /// # Errors
    /// Fails if the timing-equalizer hash cannot be computed (invalid cost)
    pub fn new(
        jwt: &JwtSettings,
        password: &PasswordSettings,
        credentials: Arc<dyn CredentialStore>,
        revocations: Arc<dyn RevocationStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            signer: Signer::new(jwt, clock.clone()),
            credentials,
            revocations,
            clock,
            hash_cost: password.hash_cost,
            timing_hash: timing_equalizer_hash(password.hash_cost)?,
        })
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Whole seconds, matching the resolution of token `exp` claims
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(0)
    }

    /// Register a new account and open its first session
    ///
    /// # Errors
    /// - `Validation` for malformed email / weak password / bad profile fields
    /// - `AuthError::DuplicateEmail` if the email (any case) is taken
    pub async fn register(&self, registration: Registration) -> Result<TokenPair, AppError> {
        let context = ErrorContext::new("register");

        let email = normalize_email(&registration.email)?;
        validate_password_strength(&registration.password)?;
        let full_name = validate_full_name(registration.full_name.as_deref())?;
        let phone = validate_phone(registration.phone.as_deref())?;
        let context = context.with_subject(&email);

        if self.credentials.find_user_by_email(&email).await?.is_some() {
            return reject(&context, AuthError::DuplicateEmail);
        }

        let password_hash = self.hash(registration.password).await?;
        let now = self.now();
        let (access, refresh) = self.mint_pair(&email)?;

        // User row and first ledger row commit together. A concurrent
        // registration can still win between the check above and this
        // insert; the store reports that as DuplicateEmail too.
        let user = match self
            .credentials
            .create_user(
                NewUser {
                    email,
                    password_hash,
                    full_name,
                    phone,
                },
                ledger_entry(&refresh),
                now,
            )
            .await
        {
            Ok(user) => user,
            Err(e) => return reject(&context, e),
        };

        let pair = self.token_pair(access, refresh, &user);

        tracing::info!(
            request_id = %context.request_id,
            user_id = %user.id,
            email = %user.email,
            "User registered successfully"
        );

        Ok(pair)
    }

    /// Authenticate with email and password
    ///
    /// Unknown email and wrong password are indistinguishable, both in the
    /// error and in the time it takes to produce it.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AppError> {
        let context = ErrorContext::new("login");

        let email = match normalize_email(email) {
            Ok(email) => email,
            Err(_) => {
                self.verify(password, &self.timing_hash).await;
                return reject(&context, AuthError::InvalidCredentials);
            }
        };
        let context = context.with_subject(&email);

        let Some(mut user) = self.credentials.find_user_by_email(&email).await? else {
            self.verify(password, &self.timing_hash).await;
            return reject(&context, AuthError::InvalidCredentials);
        };

        if !self.verify(password, &user.password_hash).await {
            return reject(&context, AuthError::InvalidCredentials);
        }

        if !user.is_active {
            return reject(&context, AuthError::AccountDisabled);
        }

        let now = self.now();
        let (access, refresh) = self.mint_pair(&user.email)?;
        self.revocations
            .insert_refresh_token(ledger_entry(&refresh), now)
            .await?;

        // Only a login that produced a stored session counts
        self.credentials.update_last_login(user.id, now).await?;
        user.last_login = Some(now);

        let pair = self.token_pair(access, refresh, &user);

        tracing::info!(
            request_id = %context.request_id,
            user_id = %user.id,
            "User logged in successfully"
        );

        Ok(pair)
    }

    /// Exchange a refresh token for a new pair, rotating the refresh token
    ///
    /// # Errors
    /// - `InvalidToken`: bad signature, expired, or not a refresh token
    /// - `TokenRevoked`: blacklisted, not ACTIVE in the ledger, missing from
    ///   the ledger, fingerprint mismatch, or a concurrent refresh won
    /// - `UserInactive`: owner missing or disabled
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let context = ErrorContext::new("token_refresh");

        let claims = match self.signer.verify(refresh_token, TokenClass::Refresh) {
            Ok(claims) => claims,
            Err(reason) => {
                tracing::debug!(reason = %reason, "Refresh token failed verification");
                return reject(&context, AuthError::InvalidToken);
            }
        };
        let context = context.with_subject(&claims.sub);

        if self.revocations.is_blacklisted(&claims.jti).await? {
            tracing::warn!(jti = %claims.jti, "Blacklisted refresh token presented");
            return reject(&context, AuthError::TokenRevoked);
        }

        let now = self.now();
        let Some(row) = self.revocations.get_refresh_token(&claims.jti).await? else {
            tracing::warn!(jti = %claims.jti, "Refresh token missing from ledger");
            return reject(&context, AuthError::TokenRevoked);
        };

        match row.state(now) {
            LedgerState::Active => {}
            LedgerState::Rotated => {
                tracing::warn!(
                    jti = %claims.jti,
                    replaced_by = ?row.replaced_by,
                    owner = %row.owner_email,
                    "Refresh token reuse detected"
                );
                return reject(&context, AuthError::TokenRevoked);
            }
            LedgerState::Revoked | LedgerState::Expired => {
                return reject(&context, AuthError::TokenRevoked);
            }
        }

        if !digest_matches(refresh_token, &row.token_hash) || row.owner_email != claims.sub {
            tracing::warn!(jti = %claims.jti, "Refresh token does not match its ledger row");
            return reject(&context, AuthError::TokenRevoked);
        }

        let user = match self.credentials.find_user_by_email(&claims.sub).await? {
            Some(user) if user.is_active => user,
            _ => return reject(&context, AuthError::UserInactive),
        };

        let (access, refresh) = self.mint_pair(&user.email)?;

        let rotated = self
            .revocations
            .rotate_if_active(&claims.jti, ledger_entry(&refresh), now)
            .await?;
        if !rotated {
            tracing::warn!(jti = %claims.jti, "Concurrent refresh already rotated this token");
            return reject(&context, AuthError::TokenRevoked);
        }

        tracing::info!(
            request_id = %context.request_id,
            user_id = %user.id,
            old_jti = %claims.jti,
            new_jti = %refresh.claims.jti,
            "Token refreshed successfully"
        );

        Ok(self.token_pair(access, refresh, &user))
    }

    /// Verify an access token and make sure it was not logged out
    pub async fn authenticate(&self, access_token: &str) -> Result<Claims, AppError> {
        let claims = match self.signer.verify(access_token, TokenClass::Access) {
            Ok(claims) => claims,
            Err(reason) => {
                tracing::debug!(reason = %reason, "Access token failed verification");
                return Err(AuthError::InvalidToken.into());
            }
        };

        if self.revocations.is_blacklisted(&claims.jti).await? {
            tracing::warn!(jti = %claims.jti, sub = %claims.sub, "Blacklisted access token presented");
            return Err(AuthError::TokenRevoked.into());
        }

        Ok(claims)
    }

    /// Resolve the account behind already authenticated claims
    pub async fn current_user(&self, claims: &Claims) -> Result<UserView, AppError> {
        match self.credentials.find_user_by_email(&claims.sub).await? {
            Some(user) if user.is_active => Ok(UserView::from(&user)),
            _ => Err(AuthError::UserInactive.into()),
        }
    }

    /// End one session
    ///
    /// Tokens that are already invalid or already revoked are skipped; the
    /// caller's goal is met either way. Store failures still propagate.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<LogoutOutcome, AppError> {
        let mut outcome = LogoutOutcome::default();

        if let Some(token) = access_token {
            match self.signer.verify(token, TokenClass::Access) {
                Ok(claims) => {
                    let entry = BlacklistEntry {
                        jti: claims.jti.clone(),
                        token_class: TokenClass::Access,
                        owner_email: Some(claims.sub.clone()),
                        expires_at: claims.expires_at(),
                    };
                    match self.revocations.blacklist(entry).await? {
                        Upsert::Inserted => outcome.access_token_revoked = true,
                        Upsert::AlreadyPresent => {
                            tracing::debug!(jti = %claims.jti, "Access token already blacklisted")
                        }
                    }
                }
                Err(reason) => {
                    tracing::debug!(reason = %reason, "Skipping invalid access token on logout")
                }
            }
        }

        if let Some(token) = refresh_token {
            match self.signer.verify(token, TokenClass::Refresh) {
                Ok(claims) => {
                    outcome.refresh_token_revoked =
                        self.revocations.revoke(&claims.jti, self.now()).await?;
                }
                Err(reason) => {
                    tracing::debug!(reason = %reason, "Skipping invalid refresh token on logout")
                }
            }
        }

        tracing::info!(
            access_token_revoked = outcome.access_token_revoked,
            refresh_token_revoked = outcome.refresh_token_revoked,
            "Logout processed"
        );

        Ok(outcome)
    }

    /// Revoke every active refresh token of the caller. Returns the count.
    pub async fn logout_all(&self, access_token: &str) -> Result<u64, AppError> {
        let context = ErrorContext::new("logout_all");

        let claims = match self.authenticate(access_token).await {
            Ok(claims) => claims,
            Err(e) => return reject(&context, e),
        };

        let revoked = self
            .revocations
            .revoke_all_for_owner(&claims.sub, self.now())
            .await?;

        tracing::info!(
            request_id = %context.request_id,
            email = %claims.sub,
            sessions_revoked = revoked,
            "Logged out from all devices"
        );

        Ok(revoked)
    }

    /// Drop blacklist entries and ledger rows past their natural expiry
    pub async fn purge_expired(&self) -> Result<PurgeReport, AppError> {
        let report = self.revocations.purge_expired(self.now()).await?;
        tracing::info!(
            blacklist_entries = report.blacklist_entries,
            refresh_tokens = report.refresh_tokens,
            "Purged expired revocation records"
        );
        Ok(report)
    }

    fn mint_pair(&self, subject: &str) -> Result<(SignedToken, SignedToken), AppError> {
        let access = self.signer.issue(subject, TokenClass::Access)?;
        let refresh = self.signer.issue(subject, TokenClass::Refresh)?;
        Ok((access, refresh))
    }

    fn token_pair(&self, access: SignedToken, refresh: SignedToken, user: &User) -> TokenPair {
        TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "bearer".to_string(),
            expires_in: self.signer.ttl_seconds(TokenClass::Access),
            user: UserView::from(user),
        }
    }

    async fn hash(&self, password: String) -> Result<String, AppError> {
        let cost = self.hash_cost;
        tokio::task::spawn_blocking(move || hash_password(&password, cost))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
    }

    /// bcrypt on the blocking pool. Unparseable hashes count as a mismatch.
    async fn verify(&self, password: &str, hash: &str) -> bool {
        let password = password.to_string();
        let hash = hash.to_string();
        let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await;

        match verified {
            Ok(Ok(matches)) => matches,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Stored password hash could not be verified");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Password verification task failed");
                false
            }
        }
    }
}

fn ledger_entry(refresh: &SignedToken) -> NewRefreshToken {
    NewRefreshToken {
        jti: refresh.claims.jti.clone(),
        owner_email: refresh.claims.sub.clone(),
        token_hash: token_digest(&refresh.token),
        expires_at: refresh.claims.expires_at(),
    }
}
