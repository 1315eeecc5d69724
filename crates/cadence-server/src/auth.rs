//! Bearer token issuance, verification and identity resolution.
//!
//! Tokens are HS256 JWTs whose `sub` claim is the user's email. A verified
//! token is only half the check: the subject must also name an existing,
//! active user in the database.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cadence_db::DbPool;
use cadence_types::{check_role, Identity};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The user's email.
    pub sub: String,
    /// Expiry (seconds since the Unix epoch).
    pub exp: i64,
    /// Issue time (seconds since the Unix epoch).
    pub iat: i64,
}

/// Authentication and authorization failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("unknown user")]
    UnknownUser,
    #[error("inactive user")]
    InactiveUser,
    #[error("Access Denied: Insufficient permissions")]
    Forbidden,
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Message safe to show the client. Credential failures share one
    /// message so callers cannot tell which emails exist.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::MissingToken => "Authentication required",
            Self::InvalidToken(_) | Self::UnknownUser | Self::InactiveUser => {
                "Could not validate credentials"
            }
            Self::Forbidden => "Access Denied: Insufficient permissions",
            Self::Internal(_) => "Internal server error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::InvalidToken(_) | Self::UnknownUser | Self::InactiveUser => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.client_message() }));
        (self.status(), body).into_response()
    }
}

/// Issues and verifies HS256 bearer tokens.
#[derive(Clone)]
pub struct JwtAuthenticator {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
    validation: Arc<Validation>,
    ttl_secs: i64,
}

impl std::fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthenticator")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl JwtAuthenticator {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation: Arc::new(validation),
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    /// Issues a token for `email`, valid for the configured lifetime.
    ///
    /// No route issues tokens; they come from the identity provider that
    /// shares `auth.secret`. This is for seeding accounts and for tests.
    pub fn issue_token(&self, email: &str) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: email.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("failed to sign token: {}", e)))
    }

    /// Checks the signature and expiry of `token` and returns its claims.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

/// Resolves a raw bearer token into the identity of an active user.
pub async fn resolve_identity(
    authenticator: &JwtAuthenticator,
    pool: &DbPool,
    token: &str,
) -> Result<Identity, AuthError> {
    if token.trim().is_empty() {
        return Err(AuthError::MissingToken);
    }
    let claims = authenticator.verify_token(token)?;

    let pool = pool.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| AuthError::Internal(format!("db connection failed: {}", e)))?;
        cadence_db::get_user_by_email(&conn, &claims.sub)
            .map_err(|e| AuthError::Internal(format!("user lookup failed: {}", e)))
    })
    .await
    .map_err(|e| AuthError::Internal(format!("task join error: {}", e)))??;

    match user {
        Some(user) if user.active => Ok(user.into_identity()),
        Some(_) => Err(AuthError::InactiveUser),
        None => Err(AuthError::UnknownUser),
    }
}

/// Resolves `token` and requires one of `allowed_roles`.
pub async fn authenticate(
    authenticator: &JwtAuthenticator,
    pool: &DbPool,
    token: &str,
    allowed_roles: &[String],
) -> Result<Identity, AuthError> {
    let identity = resolve_identity(authenticator, pool, token).await?;
    if !check_role(&identity, allowed_roles) {
        return Err(AuthError::Forbidden);
    }
    Ok(identity)
}
