//! Error types for organization model operations

use thiserror::Error;
use uuid::Uuid;

/// Errors raised while validating organizational structure or membership data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrgError {
    /// A department cannot be its own parent
    #[error("Department {0} cannot be its own parent")]
    SelfParent(Uuid),

    /// Assigning the parent would create a cycle in the hierarchy
    #[error("Assigning parent {parent_id} to department {department_id} would create a cycle")]
    CycleDetected {
        /// Department being re-parented
        department_id: Uuid,
        /// Proposed parent
        parent_id: Uuid,
    },

    /// Referenced department does not exist
    #[error("Department not found: {0}")]
    DepartmentNotFound(Uuid),

    /// A membership must carry at least one role
    #[error("Membership must carry at least one role")]
    EmptyRoleSet,

    /// Malformed role name
    #[error("Invalid role name: {0}")]
    InvalidRoleName(String),

    /// Malformed department field
    #[error("Invalid department: {0}")]
    InvalidDepartment(String),
}

impl OrgError {
    /// Whether this error signals a structural conflict (as opposed to bad input).
    pub fn is_conflict(&self) -> bool {
        matches!(self, OrgError::SelfParent(_) | OrgError::CycleDetected { .. })
    }
}

/// Result type for organization model operations.
pub type OrgResult<T> = Result<T, OrgError>;
