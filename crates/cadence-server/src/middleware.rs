use axum::{body::Body, http::Request, middleware::Next, response::Response};
use cadence_types::Identity;
use std::sync::Arc;

use crate::auth::{authenticate, AuthError};
use crate::AppState;

/// Wrapper for the resolved [`Identity`] stored in request extensions.
#[derive(Clone, Debug)]
pub struct IdentityContext(pub Identity);

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Middleware to authenticate requests via `Authorization: Bearer`.
///
/// Rejects unknown or inactive users with 401 and users without one of the
/// configured roles with 403.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, AuthError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_owned)
        .ok_or(AuthError::MissingToken)?;

    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or_else(|| AuthError::Internal("application state missing".to_string()))?
        .clone();

    let identity = match authenticate(
        &state.authenticator,
        &state.pool,
        &token,
        &state.auth.allowed_roles,
    )
    .await
    {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(path = %req.uri().path(), error = %e, "request authentication failed");
            return Err(e);
        }
    };

    req.extensions_mut().insert(IdentityContext(identity));

    Ok(next.run(req).await)
}
