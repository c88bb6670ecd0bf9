//! Identity token verification
//!
//! Login and identity-token signing live outside the access core. The core
//! only asks a collaborator who an identity token belongs to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthResult;

/// The authenticated user behind an identity token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    /// User ID
    pub user_id: Uuid,

    /// Identity session ID, if the issuer tracks one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Principal {
    /// Create a principal for a user.
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            session_id: None,
        }
    }

    /// Set the identity session ID.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Verifies ordinary identity tokens.
///
/// Implementations return `TokenExpired`, `InvalidToken` or `Unauthorized`
/// for credentials they reject.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify an identity token and return its principal.
    async fn verify_identity(&self, token: &str) -> AuthResult<Principal>;
}
