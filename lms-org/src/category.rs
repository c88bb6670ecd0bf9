//! User categories
//!
//! Every LMS user holds one or more top-level categories, independent of any
//! department. Each category has its own membership shape and its own set of
//! valid role names.

use serde::{Deserialize, Serialize};

/// Top-level classification of a user.
///
/// # Membership Model
///
/// - **Learner**: Enrolled in departments to consume content; roles cascade
/// - **Staff**: Teaches or administers departments; roles cascade
/// - **GlobalAdmin**: Platform administrators; membership only in the master
///   department and never cascades
///
/// # Examples
///
/// ```
/// use lms_org::UserCategory;
///
/// assert!(UserCategory::Staff.cascades());
/// assert!(!UserCategory::GlobalAdmin.cascades());
/// assert_eq!(UserCategory::parse("global-admin"), Some(UserCategory::GlobalAdmin));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserCategory {
    /// Course consumer
    Learner,

    /// Instructor, content author or department administrator
    Staff,

    /// Platform-wide administrator
    GlobalAdmin,
}

impl UserCategory {
    /// All categories, in resolution order.
    pub fn all() -> [UserCategory; 3] {
        [Self::Learner, Self::Staff, Self::GlobalAdmin]
    }

    /// Categories whose memberships are department-scoped and may cascade.
    pub fn department_scoped() -> [UserCategory; 2] {
        [Self::Learner, Self::Staff]
    }

    /// Whether roles held in this category cascade down the department tree.
    pub fn cascades(&self) -> bool {
        !matches!(self, Self::GlobalAdmin)
    }

    /// Parse a category from its string form.
    ///
    /// Accepts snake_case, kebab-case and a few common aliases, case-insensitively.
    ///
    /// # Examples
    ///
    /// ```
    /// use lms_org::UserCategory;
    ///
    /// assert_eq!(UserCategory::parse("STAFF"), Some(UserCategory::Staff));
    /// assert_eq!(UserCategory::parse("global_admin"), Some(UserCategory::GlobalAdmin));
    /// assert_eq!(UserCategory::parse("student"), Some(UserCategory::Learner));
    /// assert_eq!(UserCategory::parse("guest"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "learner" | "student" => Some(Self::Learner),
            "staff" => Some(Self::Staff),
            "global_admin" | "global-admin" | "globaladmin" => Some(Self::GlobalAdmin),
            _ => None,
        }
    }

    /// Get string representation of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Learner => "learner",
            Self::Staff => "staff",
            Self::GlobalAdmin => "global_admin",
        }
    }

    /// Get a human-readable display name for the category.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Learner => "Learner",
            Self::Staff => "Staff",
            Self::GlobalAdmin => "Global Admin",
        }
    }
}

impl std::fmt::Display for UserCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
