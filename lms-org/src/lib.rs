//! # LMS Organization Model
//!
//! This crate provides the organizational data model for the LMS access core:
//! departments nested under departments, the user categories a person can
//! hold, and the department-scoped memberships that carry role names.
//!
//! ## Overview
//!
//! The lms-org crate handles:
//! - **Departments**: Organizational units with visibility and cascade flags
//! - **Hierarchy**: Forest traversal (ancestors, descendants) with cycle guards
//! - **Categories**: Learner, staff and global-admin user classifications
//! - **Memberships**: User-department records with role sets and per-category details
//! - **Users**: The identity-store view of a user (existence + categories)
//!
//! ## Architecture
//!
//! ```text
//! UserRecord (categories)
//!   └─ DepartmentMembership ─→ Department
//!        ├─ roles                 ├─ parent_id ─→ Department ...
//!        └─ MembershipDetails     └─ require_explicit_membership
//!             (learner | staff | global_admin)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lms_org::{Department, DepartmentMembership, DepartmentTree, MembershipDetails};
//! use uuid::Uuid;
//!
//! let root = Department::new("Engineering", "ENG");
//! let child = Department::new("Robotics", "ENG-ROB").with_parent(root.id);
//! let tree = DepartmentTree::new(vec![root.clone(), child.clone()]);
//! assert_eq!(tree.descendants_of(root.id).len(), 2);
//!
//! let user_id = Uuid::now_v7();
//! let membership = DepartmentMembership::new(
//!     user_id,
//!     root.id,
//!     MembershipDetails::staff(),
//!     ["instructor"],
//! );
//! assert!(membership.has_role("instructor"));
//! ```
//!
//! ## Feature Flags
//!
//! - `serde`: Serialization support (enabled by default)

pub mod category;
pub mod department;
pub mod error;
pub mod hierarchy;
pub mod membership;
pub mod user;

// Re-export main types for convenience
pub use category::UserCategory;
pub use department::{Department, DepartmentRef};
pub use error::{OrgError, OrgResult};
pub use hierarchy::DepartmentTree;
pub use membership::{DepartmentMembership, MembershipDetails, MembershipSummary};
pub use user::UserRecord;
