//! Identity Service Client
//!
//! Verifies the bearer credential presented on the connection handshake.
//! Token issuance, user accounts, and password handling all live in the
//! external identity service; this core only validates what it is handed
//! and extracts the identity embedded in the claims.

use async_trait::async_trait;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtSettings;
use crate::domain::{Role, UserIdentity};

/// Identity verification trait for dependency injection
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Validate a bearer token and return the identity it was issued for
    async fn verify(&self, token: &str) -> Result<UserIdentity, IdentityError>;
}

/// Claims carried in tokens issued by the identity service.
///
/// The issuer signs over the user id, display name, and role, so a verified
/// token is a complete identity and no user lookup is needed here.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Display name
    pub name: String,
    /// Role string ("user" / "admin")
    pub role: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at time (Unix timestamp)
    pub iat: i64,
}

/// Identity verification errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,
}

/// Verifier for identity-service tokens signed with a shared secret.
#[derive(Clone)]
pub struct JwtIdentityVerifier {
    jwt_settings: JwtSettings,
}

impl JwtIdentityVerifier {
    /// Create a new verifier from JWT settings
    pub fn new(jwt_settings: JwtSettings) -> Self {
        Self { jwt_settings }
    }
}

#[async_trait]
impl IdentityService for JwtIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<UserIdentity, IdentityError> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_settings.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => IdentityError::TokenExpired,
            _ => IdentityError::InvalidToken,
        })?;

        let claims = token_data.claims;
        Ok(UserIdentity {
            id: claims.sub,
            name: claims.name,
            role: Role::from_str(&claims.role),
        })
    }
}
