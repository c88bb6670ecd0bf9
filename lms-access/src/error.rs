//! Error types for the access core
//!
//! Every crate in the workspace has its own error enum; [`AccessError`]
//! unifies them and maps each onto the five-way taxonomy callers branch on.

use lms_auth::AuthError;
use lms_org::OrgError;
use lms_rbac::RbacError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::store::StoreError;

/// Error taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// User, department, membership or role absent
    NotFound,
    /// Authenticated but lacking the right
    Forbidden,
    /// Missing, expired or invalid credential
    Unauthorized,
    /// Invariant or concurrency-version violation
    Conflict,
    /// Malformed role name or access-right pattern
    Validation,
    /// Infrastructure failure
    Internal,
}

/// Access core error types.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not permitted
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Invariant would be violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Escalation / credential error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Organization model error
    #[error(transparent)]
    Org(#[from] OrgError),

    /// Role or access-right error
    #[error(transparent)]
    Rbac(#[from] RbacError),

    /// Persistence error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for access core operations.
pub type AccessResult<T> = Result<T, AccessError>;

impl AccessError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccessError::NotFound(_) => ErrorKind::NotFound,
            AccessError::Forbidden(_) => ErrorKind::Forbidden,
            AccessError::Conflict(_) => ErrorKind::Conflict,
            AccessError::Validation(_) => ErrorKind::Validation,

            AccessError::Auth(e) => match e.status_code() {
                401 => ErrorKind::Unauthorized,
                403 => ErrorKind::Forbidden,
                _ => ErrorKind::Internal,
            },

            AccessError::Org(e) => match e {
                OrgError::DepartmentNotFound(_) => ErrorKind::NotFound,
                OrgError::SelfParent(_) | OrgError::CycleDetected { .. } => ErrorKind::Conflict,
                OrgError::EmptyRoleSet
                | OrgError::InvalidRoleName(_)
                | OrgError::InvalidDepartment(_) => ErrorKind::Validation,
            },

            AccessError::Rbac(e) => match e {
                RbacError::UnknownRole(_) => ErrorKind::NotFound,
                _ => ErrorKind::Validation,
            },

            AccessError::Store(e) => match e {
                StoreError::NotFound { .. } => ErrorKind::NotFound,
                StoreError::VersionConflict { .. }
                | StoreError::Duplicate { .. }
                | StoreError::LastRoleHolder { .. } => ErrorKind::Conflict,
                StoreError::Unavailable(_) | StoreError::Backend(_) => ErrorKind::Internal,
            },

            AccessError::Cache(_) | AccessError::Config(_) | AccessError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if this error should be logged at error level.
    pub fn is_server_error(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Forbidden => 403,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Conflict => 409,
            ErrorKind::Validation => 422,
            ErrorKind::Internal => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            AccessError::Auth(e) => e.error_code(),
            AccessError::Store(StoreError::VersionConflict { .. }) => "VERSION_CONFLICT",
            AccessError::Store(StoreError::LastRoleHolder { .. }) => "LAST_ROLE_HOLDER",
            AccessError::Org(OrgError::CycleDetected { .. } | OrgError::SelfParent(_)) => {
                "HIERARCHY_CYCLE"
            }
            AccessError::Rbac(RbacError::UnknownRole(_)) => "UNKNOWN_ROLE",
            _ => match self.kind() {
                ErrorKind::NotFound => "NOT_FOUND",
                ErrorKind::Forbidden => "FORBIDDEN",
                ErrorKind::Unauthorized => "UNAUTHORIZED",
                ErrorKind::Conflict => "CONFLICT",
                ErrorKind::Validation => "VALIDATION_ERROR",
                ErrorKind::Internal => "INTERNAL_ERROR",
            },
        }
    }
}
