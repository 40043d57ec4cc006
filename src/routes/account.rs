use actix_web::{web, HttpResponse};

use crate::auth::Claims;
use crate::error::AppError;
use crate::session::SessionManager;

/// GET /account/me
///
/// Claims are injected by `AccessTokenGuard`.
pub async fn current_user(
    claims: web::ReqData<Claims>,
    session: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let user = session.current_user(&claims).await?;
    Ok(HttpResponse::Ok().json(user))
}
