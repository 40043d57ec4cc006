/// Access Token Guard
///
/// Authenticates the `Authorization: Bearer` access token through the
/// session manager (signature, expiry, class and blacklist) and injects the
/// resulting `Claims` into request extensions for route handlers.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderMap, AUTHORIZATION},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{AppError, AuthError};
use crate::session::SessionManager;

/// Token from an `Authorization: Bearer <token>` header, if present
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

pub struct AccessTokenGuard {
    session: Arc<SessionManager>,
}

impl AccessTokenGuard {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessTokenGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AccessTokenGuardService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AccessTokenGuardService {
            service: Rc::new(service),
            session: self.session.clone(),
        }))
    }
}

pub struct AccessTokenGuardService<S> {
    service: Rc<S>,
    session: Arc<SessionManager>,
}

impl<S, B> Service<ServiceRequest> for AccessTokenGuardService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = bearer_token(req.headers()).map(str::to_string);
        let service = self.service.clone();
        let session = self.session.clone();

        Box::pin(async move {
            let Some(token) = token else {
                tracing::warn!(path = %req.path(), "Missing or invalid Authorization header");
                return Err(AppError::from(AuthError::MissingToken).into());
            };

            let claims = session.authenticate(&token).await?;
            tracing::debug!(sub = %claims.sub, jti = %claims.jti, "Access token accepted");

            req.extensions_mut().insert(claims);
            service.call(req).await
        })
    }
}
