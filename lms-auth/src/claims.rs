//! JWT claims for admin escalation tokens
//!
//! An admin token names its user and its escalation session. Revocation and
//! the idle window live in the session registry; the token only carries the
//! absolute expiry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token type enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Ordinary identity token (issued outside this core)
    Access,

    /// Admin escalation token
    #[default]
    Admin,
}

/// Claims carried by an admin token.
///
/// # Example
///
/// ```rust,no_run
/// use lms_auth::claims::AdminClaims;
/// use uuid::Uuid;
///
/// let claims = AdminClaims::new(
///     Uuid::now_v7(),
///     Uuid::now_v7(),
///     "lms-access",
///     chrono::Utc::now() + chrono::Duration::hours(1),
/// );
/// assert!(!claims.is_expired());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdminClaims {
    // Standard JWT claims (RFC 7519)
    /// Subject (user ID)
    pub sub: String,

    /// Issuer
    pub iss: String,

    /// Audience
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp, the session's absolute cap)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// JWT ID
    pub jti: String,

    /// Escalation session ID
    pub sid: String,

    /// Token type (always admin)
    pub token_type: TokenType,
}

impl AdminClaims {
    /// Audience every admin token is minted for.
    pub const AUDIENCE: &'static str = "lms-admin";

    /// Create claims for an escalation session.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The escalated user
    /// * `session_id` - The escalation session backing the token
    /// * `issuer` - Token issuer
    /// * `expires_at` - Absolute expiry of the session
    pub fn new(
        user_id: Uuid,
        session_id: Uuid,
        issuer: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sub: user_id.to_string(),
            iss: issuer.into(),
            aud: vec![Self::AUDIENCE.to_string()],
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
            jti: Uuid::now_v7().to_string(),
            sid: session_id.to_string(),
            token_type: TokenType::Admin,
        }
    }

    /// Get the user ID as UUID.
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    /// Get the session ID as UUID.
    pub fn session_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sid).ok()
    }

    /// Check if the token is expired.
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }

    /// Get expiration as DateTime.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}
