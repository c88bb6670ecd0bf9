//! Department domain models
//!
//! Departments are the organizational units of the LMS. They nest under one
//! another to form a forest and scope both content and role memberships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrgError, OrgResult};

/// An organizational unit.
///
/// # Architecture
///
/// ```text
/// Department (root, parent_id = None)
///   ├─ Department (child)
///   │    └─ Department (grandchild)
///   └─ Department (child, require_explicit_membership = true)
/// ```
///
/// `require_explicit_membership` marks a cascade boundary: roles held in an
/// ancestor never flow through a department that carries the flag.
///
/// # Examples
///
/// ```
/// use lms_org::Department;
///
/// let dept = Department::new("School of Nursing", "nur");
/// assert_eq!(dept.code, "NUR");
/// assert!(dept.is_root());
/// assert!(dept.is_traversable());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Department {
    /// Unique identifier
    pub id: Uuid,

    /// Human-readable name
    pub name: String,

    /// Short upper-case code (unique across the LMS)
    pub code: String,

    /// Parent department, `None` for roots
    pub parent_id: Option<Uuid>,

    /// Whether the department is active
    pub is_active: bool,

    /// Whether the department is shown in listings and traversals
    pub is_visible: bool,

    /// Blocks role cascading through this department
    #[serde(default)]
    pub require_explicit_membership: bool,

    /// When the department was created
    pub created_at: DateTime<Utc>,

    /// When the department was last updated
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency version, bumped on every write
    #[serde(default)]
    pub version: u64,
}

impl Department {
    /// Creates a new active, visible root department.
    ///
    /// # Arguments
    ///
    /// * `name` - Display name
    /// * `code` - Short code, normalized to upper case
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            code: code.into().trim().to_uppercase(),
            parent_id: None,
            is_active: true,
            is_visible: true,
            require_explicit_membership: false,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Set the parent department.
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Require explicit membership (blocks role cascading through this node).
    pub fn with_explicit_membership(mut self) -> Self {
        self.require_explicit_membership = true;
        self
    }

    /// Hide the department from traversals and listings.
    pub fn hidden(mut self) -> Self {
        self.is_visible = false;
        self
    }

    /// Check if this is a root department.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Active and visible departments are the only ones returned by traversals.
    pub fn is_traversable(&self) -> bool {
        self.is_active && self.is_visible
    }

    /// Validate name and code.
    ///
    /// Codes are 2-32 characters of upper-case letters, digits, `-` or `_`.
    pub fn validate(&self) -> OrgResult<()> {
        if self.name.trim().is_empty() {
            return Err(OrgError::InvalidDepartment("name must not be empty".to_string()));
        }
        let code_ok = (2..=32).contains(&self.code.len())
            && self
                .code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !code_ok {
            return Err(OrgError::InvalidDepartment(format!(
                "code '{}' must be 2-32 characters of A-Z, 0-9, '-' or '_'",
                self.code
            )));
        }
        if self.parent_id == Some(self.id) {
            return Err(OrgError::SelfParent(self.id));
        }
        Ok(())
    }

    /// Record a write: bump the version and timestamp.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Lightweight identity view of this department.
    pub fn to_ref(&self) -> DepartmentRef {
        DepartmentRef {
            id: self.id,
            name: self.name.clone(),
            code: self.code.clone(),
        }
    }
}

/// Department identity used in denormalized listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepartmentRef {
    /// Department ID
    pub id: Uuid,

    /// Department name
    pub name: String,

    /// Department code
    pub code: String,
}
