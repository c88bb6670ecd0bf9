//! Role catalog
//!
//! The catalog maps role names to their definitions and expands role sets
//! into access rights. [`RoleCatalog::builtin`] carries the roles every LMS
//! deployment starts with; deployments may register more.

use std::collections::BTreeMap;

use lms_org::UserCategory;
use serde::{Deserialize, Serialize};

use crate::error::{RbacError, RbacResult};
use crate::right::AccessRightSet;
use crate::role::{validate_role_name, RoleDefinition};

/// Learner role name.
pub const LEARNER: &str = "learner";
/// Instructor role name.
pub const INSTRUCTOR: &str = "instructor";
/// Content administrator role name.
pub const CONTENT_ADMIN: &str = "content-admin";
/// Analyst role name.
pub const ANALYST: &str = "analyst";
/// Department administrator role name (subject to the last-admin guard).
pub const DEPARTMENT_ADMIN: &str = "department-admin";
/// System administrator role name (holds `*`).
pub const SYSTEM_ADMIN: &str = "system-admin";
/// Support administrator role name.
pub const SUPPORT_ADMIN: &str = "support-admin";

/// Registry of role definitions keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleCatalog {
    roles: BTreeMap<String, RoleDefinition>,
}

impl RoleCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the built-in roles.
    ///
    /// # Examples
    ///
    /// ```
    /// use lms_rbac::{RoleCatalog, SYSTEM_ADMIN};
    ///
    /// let catalog = RoleCatalog::builtin();
    /// let rights = catalog.resolve_access_rights([SYSTEM_ADMIN]);
    /// assert!(rights.has_str("org:departments:delete"));
    /// ```
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for role in builtin_roles() {
            catalog.roles.insert(role.name.clone(), role);
        }
        catalog
    }

    /// Register or replace a role definition.
    pub fn register(&mut self, role: RoleDefinition) -> RbacResult<()> {
        validate_role_name(&role.name)?;
        self.roles.insert(role.name.clone(), role);
        Ok(())
    }

    /// Look up a role by name.
    pub fn get(&self, name: &str) -> Option<&RoleDefinition> {
        self.roles.get(name)
    }

    /// Iterate over every role, active or not.
    pub fn roles(&self) -> impl Iterator<Item = &RoleDefinition> {
        self.roles.values()
    }

    /// Number of roles in the catalog.
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Check if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Active roles for a category, in sort order.
    pub fn roles_for(&self, category: UserCategory) -> Vec<&RoleDefinition> {
        let mut roles: Vec<&RoleDefinition> = self
            .roles
            .values()
            .filter(|r| r.category == category && r.is_active)
            .collect();
        roles.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)));
        roles
    }

    /// Union of the rights of the named roles.
    ///
    /// Unknown and inactive roles contribute nothing.
    pub fn resolve_access_rights<I, S>(&self, roles: I) -> AccessRightSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rights = AccessRightSet::new();
        for name in roles {
            if let Some(role) = self.roles.get(name.as_ref()).filter(|r| r.is_active) {
                rights.merge(&role.access_rights);
            }
        }
        rights
    }

    /// Check that a role may be assigned to a membership of `category`.
    ///
    /// # Errors
    ///
    /// - `InvalidRoleName` if the name is malformed
    /// - `UnknownRole` / `InactiveRole` if the role cannot be granted
    /// - `CategoryMismatch` if the role belongs to another category
    pub fn validate_assignment(&self, name: &str, category: UserCategory) -> RbacResult<&RoleDefinition> {
        validate_role_name(name)?;
        let role = self
            .roles
            .get(name)
            .ok_or_else(|| RbacError::UnknownRole(name.to_string()))?;
        if !role.is_active {
            return Err(RbacError::InactiveRole(name.to_string()));
        }
        if role.category != category {
            return Err(RbacError::CategoryMismatch {
                role: name.to_string(),
                expected: role.category,
                actual: category,
            });
        }
        Ok(role)
    }
}

impl FromIterator<RoleDefinition> for RoleCatalog {
    fn from_iter<T: IntoIterator<Item = RoleDefinition>>(iter: T) -> Self {
        Self {
            roles: iter.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }
}

fn builtin(name: &str, category: UserCategory, sort_order: i32, rights: &[&str]) -> RoleDefinition {
    RoleDefinition {
        name: name.to_string(),
        category,
        access_rights: AccessRightSet::from_strings(rights),
        sort_order,
        is_active: true,
    }
}

fn builtin_roles() -> Vec<RoleDefinition> {
    vec![
        builtin(
            LEARNER,
            UserCategory::Learner,
            10,
            &[
                "content:courses:read",
                "content:modules:read",
                "content:units:read",
                "learning:progress:read:own",
                "learning:progress:write:own",
                "learning:events:write:own",
            ],
        ),
        builtin(
            INSTRUCTOR,
            UserCategory::Staff,
            10,
            &[
                "content:courses:read",
                "content:courses:update",
                "content:modules:read",
                "content:modules:update",
                "content:units:read",
                "content:units:update",
                "learning:progress:read",
                "analytics:reports:read",
                "content:courses:delete:own",
            ],
        ),
        builtin(
            CONTENT_ADMIN,
            UserCategory::Staff,
            20,
            &["content:*", "analytics:reports:read"],
        ),
        builtin(
            ANALYST,
            UserCategory::Staff,
            30,
            &["analytics:*", "content:courses:read"],
        ),
        builtin(
            DEPARTMENT_ADMIN,
            UserCategory::Staff,
            40,
            &[
                "content:*",
                "learning:*",
                "analytics:*",
                "org:members:manage",
                "org:departments:read",
                "org:settings:update",
            ],
        ),
        builtin(SYSTEM_ADMIN, UserCategory::GlobalAdmin, 10, &["*"]),
        builtin(
            SUPPORT_ADMIN,
            UserCategory::GlobalAdmin,
            20,
            &[
                "org:members:read",
                "org:members:manage",
                "org:departments:read",
                "analytics:reports:read",
            ],
        ),
    ]
}
