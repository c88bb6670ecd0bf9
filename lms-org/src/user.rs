//! Identity-store view of a user
//!
//! Authentication itself lives outside this workspace; the access core only
//! needs to know whether a user exists, is active, and which categories they
//! hold.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::category::UserCategory;

/// A user as seen by the access core.
///
/// # Examples
///
/// ```
/// use lms_org::{UserCategory, UserRecord};
/// use uuid::Uuid;
///
/// let user = UserRecord::new(Uuid::now_v7(), [UserCategory::Staff, UserCategory::GlobalAdmin]);
/// assert!(user.is_global_admin());
/// assert!(user.has_category(UserCategory::Staff));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    /// User ID
    pub id: Uuid,

    /// Categories held by the user
    pub categories: BTreeSet<UserCategory>,

    /// Whether the account is active
    pub is_active: bool,
}

impl UserRecord {
    /// Creates an active user with the given categories.
    pub fn new(id: Uuid, categories: impl IntoIterator<Item = UserCategory>) -> Self {
        Self {
            id,
            categories: categories.into_iter().collect(),
            is_active: true,
        }
    }

    /// Check whether the user holds a category.
    pub fn has_category(&self, category: UserCategory) -> bool {
        self.categories.contains(&category)
    }

    /// Check whether the user holds the global-admin category.
    pub fn is_global_admin(&self) -> bool {
        self.has_category(UserCategory::GlobalAdmin)
    }

    /// Department-scoped categories held by the user (learner, staff).
    pub fn department_categories(&self) -> Vec<UserCategory> {
        self.categories
            .iter()
            .copied()
            .filter(UserCategory::cascades)
            .collect()
    }
}
