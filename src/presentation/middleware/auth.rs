//! Authentication Middleware
//!
//! Bearer token validation for the protected HTTP surface. Verification
//! goes through the same identity-service client the WebSocket handshake
//! uses.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::application::services::{IdentityError, IdentityService, JwtIdentityVerifier};
use crate::domain::UserIdentity;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Authenticated user extension
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub identity: UserIdentity,
}

/// Middleware that validates the bearer token and attaches the identity
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization header format".into()))?;

    let verifier = JwtIdentityVerifier::new(state.settings.jwt.clone());
    let identity = verifier.verify(token).await.map_err(|e| match e {
        IdentityError::TokenExpired => AppError::Unauthorized("Token expired".into()),
        IdentityError::InvalidToken => AppError::Unauthorized("Invalid token".into()),
    })?;

    request.extensions_mut().insert(AuthUser { identity });

    Ok(next.run(request).await)
}
