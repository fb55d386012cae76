//! User identity as produced by the external identity service.
//!
//! This core never creates or mutates users; it only carries the identity
//! extracted from a verified bearer credential.

use serde::{Deserialize, Serialize};

/// User roles as issued by the identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A regular user
    #[default]
    User,
    /// An administrator
    Admin,
}

impl Role {
    /// Convert from the claim string representation.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "admin" => Self::Admin,
            _ => Self::User,
        }
    }

    /// Convert to the claim string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An authenticated user identity.
///
/// Read-only to this core; owned by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Opaque user identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Role assigned by the identity service
    pub role: Role,
}
