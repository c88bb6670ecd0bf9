//! Error types for access-right and role validation

use lms_org::UserCategory;
use thiserror::Error;

/// Validation errors for access-right patterns and role definitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RbacError {
    /// Access right string is empty
    #[error("Access right must not be empty")]
    EmptyRight,

    /// A segment contains characters outside `[a-z0-9_-]`
    #[error("Invalid segment '{segment}' in access right '{right}'")]
    InvalidSegment {
        /// Offending right
        right: String,
        /// Offending segment
        segment: String,
    },

    /// `*` used anywhere but the final segment
    #[error("Wildcard must be the final segment in access right '{0}'")]
    MisplacedWildcard(String),

    /// Wrong number of segments for the pattern
    #[error("Access right '{0}' must be '*', 'domain:*' or 'domain:resource:action[:own]'")]
    MalformedRight(String),

    /// Role name does not follow the naming rules
    #[error("Invalid role name '{0}': expected lower-case kebab-case, at most 64 characters")]
    InvalidRoleName(String),

    /// Role is not defined in the catalog
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// Role is defined but disabled
    #[error("Role is inactive: {0}")]
    InactiveRole(String),

    /// Role belongs to a different user category
    #[error("Role '{role}' belongs to category {expected}, not {actual}")]
    CategoryMismatch {
        /// Role name
        role: String,
        /// Category owning the role
        expected: UserCategory,
        /// Category requested
        actual: UserCategory,
    },
}

/// Result type for RBAC validation.
pub type RbacResult<T> = Result<T, RbacError>;
