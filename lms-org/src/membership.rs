//! Membership domain models
//!
//! This module provides the membership entity that links a user to a
//! department under one user category. Memberships carry the role names that
//! the access core expands into rights.
//!
//! Learner, staff and global-admin memberships share one shape
//! ([`DepartmentMembership`]) and differ only in their tagged
//! [`MembershipDetails`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::category::UserCategory;
use crate::department::{Department, DepartmentRef};
use crate::error::{OrgError, OrgResult};

/// Category-specific fields of a membership.
///
/// The variant tag determines the membership's [`UserCategory`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum MembershipDetails {
    /// Learner enrollment
    Learner {
        /// Intake or cohort label
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cohort: Option<String>,
    },

    /// Staff appointment
    Staff {
        /// Job title within the department
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,

        /// HR employee number
        #[serde(default, skip_serializing_if = "Option::is_none")]
        employee_number: Option<String>,
    },

    /// Global administration seat (master department only)
    GlobalAdmin,
}

impl MembershipDetails {
    /// Learner details with no cohort.
    pub fn learner() -> Self {
        Self::Learner { cohort: None }
    }

    /// Staff details with no title.
    pub fn staff() -> Self {
        Self::Staff {
            title: None,
            employee_number: None,
        }
    }

    /// Global-admin details.
    pub fn global_admin() -> Self {
        Self::GlobalAdmin
    }

    /// Default details for a category.
    pub fn for_category(category: UserCategory) -> Self {
        match category {
            UserCategory::Learner => Self::learner(),
            UserCategory::Staff => Self::staff(),
            UserCategory::GlobalAdmin => Self::global_admin(),
        }
    }

    /// The category this variant belongs to.
    pub fn category(&self) -> UserCategory {
        match self {
            Self::Learner { .. } => UserCategory::Learner,
            Self::Staff { .. } => UserCategory::Staff,
            Self::GlobalAdmin => UserCategory::GlobalAdmin,
        }
    }
}

/// A user's membership in a department.
///
/// Memberships are never hard-deleted; removal deactivates them so the audit
/// trail stays continuous.
///
/// # Examples
///
/// ```
/// use uuid::Uuid;
/// use lms_org::{DepartmentMembership, MembershipDetails, UserCategory};
///
/// let membership = DepartmentMembership::new(
///     Uuid::now_v7(),
///     Uuid::now_v7(),
///     MembershipDetails::learner(),
///     ["learner"],
/// );
/// assert_eq!(membership.category(), UserCategory::Learner);
/// assert!(membership.is_effective_now());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepartmentMembership {
    /// Unique membership ID
    pub id: Uuid,

    /// User ID
    pub user_id: Uuid,

    /// Department ID
    pub department_id: Uuid,

    /// Role names held in the department
    pub roles: BTreeSet<String>,

    /// Whether this is the user's primary membership for its category
    #[serde(default)]
    pub is_primary: bool,

    /// When the user joined
    pub joined_at: DateTime<Utc>,

    /// Optional expiry after which the membership no longer counts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Whether the membership is active
    pub is_active: bool,

    /// Category-specific fields
    pub details: MembershipDetails,

    /// Who granted the membership (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_by: Option<Uuid>,

    /// When the membership was last changed
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency version, bumped on every write
    #[serde(default)]
    pub version: u64,
}

impl DepartmentMembership {
    /// Creates a new active membership.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The user ID
    /// * `department_id` - The department ID
    /// * `details` - Category-specific details (determines the category)
    /// * `roles` - Role names held in the department
    pub fn new<I, S>(user_id: Uuid, department_id: Uuid, details: MembershipDetails, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            department_id,
            roles: roles.into_iter().map(Into::into).collect(),
            is_primary: false,
            joined_at: now,
            expires_at: None,
            is_active: true,
            details,
            assigned_by: None,
            updated_at: now,
            version: 1,
        }
    }

    /// Mark as the primary membership for its category.
    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        self
    }

    /// Set an expiry time.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set who granted this membership.
    pub fn with_assigned_by(mut self, actor_id: Uuid) -> Self {
        self.assigned_by = Some(actor_id);
        self
    }

    /// The membership's category, derived from its details.
    pub fn category(&self) -> UserCategory {
        self.details.category()
    }

    /// Active and not expired at `now`.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |expires_at| expires_at > now)
    }

    /// Active and not expired right now.
    pub fn is_effective_now(&self) -> bool {
        self.is_effective(Utc::now())
    }

    /// Check if the membership carries a role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Add a role. Returns `true` if it was not already present.
    pub fn add_role(&mut self, role: impl Into<String>) -> bool {
        self.roles.insert(role.into())
    }

    /// Remove a role. Returns `true` if it was present.
    pub fn remove_role(&mut self, role: &str) -> bool {
        self.roles.remove(role)
    }

    /// Soft-deactivate the membership.
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.is_primary = false;
    }

    /// Record a write: bump the version and timestamp.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Check structural invariants (non-empty role set).
    pub fn validate(&self) -> OrgResult<()> {
        if self.roles.is_empty() {
            return Err(OrgError::EmptyRoleSet);
        }
        if let Some(bad) = self.roles.iter().find(|r| r.trim().is_empty()) {
            return Err(OrgError::InvalidRoleName(bad.clone()));
        }
        Ok(())
    }
}

/// Denormalized membership listing entry, aggregated across categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MembershipSummary {
    /// Membership ID
    pub membership_id: Uuid,

    /// Category of the membership
    pub category: UserCategory,

    /// Department identity
    pub department: DepartmentRef,

    /// Role names, sorted
    pub roles: Vec<String>,

    /// Primary flag
    pub is_primary: bool,

    /// When the user joined
    pub joined_at: DateTime<Utc>,

    /// Optional expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl MembershipSummary {
    /// Build a summary from a membership and its department.
    pub fn new(membership: &DepartmentMembership, department: &Department) -> Self {
        Self {
            membership_id: membership.id,
            category: membership.category(),
            department: department.to_ref(),
            roles: membership.roles.iter().cloned().collect(),
            is_primary: membership.is_primary,
            joined_at: membership.joined_at,
            expires_at: membership.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_membership_creation() {
        let user_id = Uuid::now_v7();
        let dept_id = Uuid::now_v7();
        let membership =
            DepartmentMembership::new(user_id, dept_id, MembershipDetails::staff(), ["instructor"]);

        assert_eq!(membership.user_id, user_id);
        assert_eq!(membership.department_id, dept_id);
        assert_eq!(membership.category(), UserCategory::Staff);
        assert!(membership.has_role("instructor"));
        assert!(!membership.is_primary);
        assert_eq!(membership.version, 1);
    }

    #[test]
    fn test_membership_expiry() {
        let now = Utc::now();
        let membership = DepartmentMembership::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            MembershipDetails::learner(),
            ["learner"],
        )
        .with_expiry(now + Duration::days(1));

        assert!(membership.is_effective(now));
        assert!(!membership.is_effective(now + Duration::days(2)));
    }

    #[test]
    fn test_membership_roles() {
        let mut membership = DepartmentMembership::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            MembershipDetails::staff(),
            ["instructor"],
        );

        assert!(membership.add_role("analyst"));
        assert!(!membership.add_role("analyst"));
        assert!(membership.remove_role("instructor"));
        assert!(!membership.remove_role("instructor"));
        assert!(membership.validate().is_ok());

        membership.remove_role("analyst");
        assert_eq!(membership.validate(), Err(OrgError::EmptyRoleSet));
    }

    #[test]
    fn test_deactivate_clears_primary() {
        let mut membership = DepartmentMembership::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            MembershipDetails::staff(),
            ["instructor"],
        )
        .with_primary(true);

        membership.deactivate();
        assert!(!membership.is_active);
        assert!(!membership.is_primary);
        assert!(!membership.is_effective_now());
    }

    #[test]
    fn test_details_tagging() {
        let details = MembershipDetails::Staff {
            title: Some("Lecturer".to_string()),
            employee_number: None,
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["category"], "staff");
        assert_eq!(json["title"], "Lecturer");

        let admin: MembershipDetails =
            serde_json::from_str(r#"{"category":"global_admin"}"#).unwrap();
        assert_eq!(admin.category(), UserCategory::GlobalAdmin);
    }

    #[test]
    fn test_summary() {
        let dept = Department::new("Chemistry", "CHEM");
        let membership = DepartmentMembership::new(
            Uuid::now_v7(),
            dept.id,
            MembershipDetails::learner(),
            ["learner"],
        )
        .with_primary(true);

        let summary = MembershipSummary::new(&membership, &dept);
        assert_eq!(summary.department.code, "CHEM");
        assert_eq!(summary.roles, vec!["learner".to_string()]);
        assert!(summary.is_primary);
        assert_eq!(summary.category, UserCategory::Learner);
    }
}
