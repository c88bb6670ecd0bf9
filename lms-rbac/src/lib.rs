//! # LMS RBAC
//!
//! This crate provides the access-right model for the LMS access core:
//! right parsing and wildcard matching, role definitions, and the catalog
//! that expands role names into rights.
//!
//! ## Overview
//!
//! The lms-rbac crate handles:
//! - **Access Rights**: `domain:resource:action` strings with wildcards
//! - **Right Sets**: Collections of rights held by a role or a user
//! - **Roles**: Named right bundles owned by a user category
//! - **Catalog**: Built-in roles plus `resolve_access_rights`
//!
//! ## Architecture
//!
//! ```text
//! AccessRight grammar:
//!   "*"                            - everything
//!   "content:*"                    - every right in a domain
//!   "content:courses:*"            - every action on a resource
//!   "content:courses:update"       - one action
//!   "content:courses:update:own"   - one action on resources the user created
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lms_rbac::{RoleCatalog, INSTRUCTOR};
//!
//! let catalog = RoleCatalog::builtin();
//! let rights = catalog.resolve_access_rights([INSTRUCTOR]);
//!
//! assert!(rights.has_str("content:courses:update"));
//! assert!(rights.has_str("content:courses:update:own"));
//! assert!(!rights.has_str("org:members:manage"));
//! ```
//!
//! ## Built-in Roles
//!
//! | Role | Category | Rights |
//! |------|----------|--------|
//! | `learner` | learner | read content, own progress |
//! | `instructor` | staff | read/update content, read progress |
//! | `content-admin` | staff | `content:*` |
//! | `analyst` | staff | `analytics:*` |
//! | `department-admin` | staff | content, learning, analytics, members |
//! | `system-admin` | global-admin | `*` |
//! | `support-admin` | global-admin | members and reports |

pub mod catalog;
pub mod error;
pub mod right;
pub mod role;

// Re-export main types for convenience
pub use catalog::{
    RoleCatalog, ANALYST, CONTENT_ADMIN, DEPARTMENT_ADMIN, INSTRUCTOR, LEARNER, SUPPORT_ADMIN,
    SYSTEM_ADMIN,
};
pub use error::{RbacError, RbacResult};
pub use right::{AccessRight, AccessRightSet, ALL_RIGHTS, OWN_QUALIFIER};
pub use role::{validate_role_name, RoleDefinition, MAX_ROLE_NAME_LEN};
