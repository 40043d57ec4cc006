/// Authentication Routes
///
/// Thin HTTP adapters over `SessionManager`. All decisions (validation,
/// credential checks, rotation, revocation) happen in the session layer;
/// these handlers only shape requests and responses.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AuthError};
use crate::middleware::bearer_token;
use crate::session::{Registration, SessionManager};

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Token refresh request
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Optional logout body
#[derive(Deserialize, Default)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
    pub tokens_revoked: Vec<&'static str>,
}

#[derive(Serialize)]
pub struct LogoutAllResponse {
    pub success: bool,
    pub message: String,
    pub sessions_revoked: u64,
}

/// POST /auth/register
///
/// # Errors
/// - 400: invalid email, weak password, or bad profile fields
/// - 409: email already registered (any letter case)
/// - 503: store unavailable
pub async fn register(
    form: web::Json<Registration>,
    session: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let pair = session.register(form.into_inner()).await?;
    Ok(HttpResponse::Created().json(pair))
}

/// POST /auth/login
///
/// # Errors
/// - 401: unknown email or wrong password (indistinguishable)
/// - 403: account disabled
pub async fn login(
    form: web::Json<LoginRequest>,
    session: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let pair = session.login(&form.email, &form.password).await?;
    Ok(HttpResponse::Ok().json(pair))
}

/// POST /auth/refresh
///
/// Exchanges a refresh token for a new pair. The presented token is
/// single-use; presenting it again yields 401 `TOKEN_REVOKED`.
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    session: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let pair = session.refresh(&form.refresh_token).await?;
    Ok(HttpResponse::Ok().json(pair))
}

/// POST /auth/logout
///
/// Both the bearer access token and the body's refresh token are optional.
/// Already invalid tokens are ignored; the response lists what was newly
/// revoked.
pub async fn logout(
    req: HttpRequest,
    body: Option<web::Json<LogoutRequest>>,
    session: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let body = body.map(web::Json::into_inner).unwrap_or_default();

    let outcome = session
        .logout(bearer_token(req.headers()), body.refresh_token.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(LogoutResponse {
        success: true,
        message: "Logged out successfully".to_string(),
        tokens_revoked: outcome.tokens_revoked(),
    }))
}

/// POST /auth/logout/all
///
/// Revokes every active refresh token of the caller. Access tokens already
/// issued stay valid until they expire.
pub async fn logout_all(
    req: HttpRequest,
    session: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let token = bearer_token(req.headers()).ok_or(AuthError::MissingToken)?;
    let sessions_revoked = session.logout_all(token).await?;

    Ok(HttpResponse::Ok().json(LogoutAllResponse {
        success: true,
        message: "Logged out from all devices".to_string(),
        sessions_revoked,
    }))
}
