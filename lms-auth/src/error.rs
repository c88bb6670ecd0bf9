//! Error types for escalation operations
//!
//! This module defines the errors raised while issuing, validating and
//! revoking admin escalation sessions.

use thiserror::Error;

/// Escalation error types.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Admin token has expired (absolute lifetime)
    #[error("Token has expired")]
    TokenExpired,

    /// Token is invalid (malformed, bad signature, wrong type, etc.)
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token is missing required claims
    #[error("Missing required claim: {0}")]
    MissingClaim(String),

    /// Credential missing or rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Escalation password did not verify
    #[error("Invalid escalation password")]
    InvalidEscalationPassword,

    /// User may not escalate
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Session referenced by the token does not exist
    #[error("Admin session not found")]
    SessionNotFound,

    /// Session idle window or absolute lifetime elapsed
    #[error("Admin session expired")]
    SessionExpired,

    /// Session was revoked by deescalation or a newer escalation
    #[error("Admin session revoked")]
    SessionRevoked,

    /// Identity token and admin token name different users
    #[error("Identity and admin token subjects differ")]
    SubjectMismatch,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for escalation operations.
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// Check if this error should be logged at error level.
    ///
    /// Rejected credentials are expected and are not server errors.
    pub fn is_server_error(&self) -> bool {
        matches!(self, AuthError::Internal(_) | AuthError::ConfigError(_))
    }

    /// Check if this error means the caller lacks a valid credential.
    pub fn is_unauthorized(&self) -> bool {
        self.status_code() == 401
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::TokenExpired
            | AuthError::InvalidToken(_)
            | AuthError::MissingClaim(_)
            | AuthError::InvalidEscalationPassword
            | AuthError::Unauthorized(_)
            | AuthError::SessionNotFound
            | AuthError::SessionExpired
            | AuthError::SessionRevoked
            | AuthError::SubjectMismatch => 401,

            AuthError::Forbidden(_) => 403,

            AuthError::ConfigError(_) | AuthError::Internal(_) => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::MissingClaim(_) => "MISSING_CLAIM",
            AuthError::Unauthorized(_) => "UNAUTHORIZED",
            AuthError::InvalidEscalationPassword => "INVALID_ESCALATION_PASSWORD",
            AuthError::Forbidden(_) => "FORBIDDEN",
            AuthError::SessionNotFound => "SESSION_NOT_FOUND",
            AuthError::SessionExpired => "SESSION_EXPIRED",
            AuthError::SessionRevoked => "SESSION_REVOKED",
            AuthError::SubjectMismatch => "SUBJECT_MISMATCH",
            AuthError::ConfigError(_) => "CONFIG_ERROR",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
