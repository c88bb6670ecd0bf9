//! Role definitions
//!
//! A role is a named bundle of access rights owned by one user category.

use lms_org::UserCategory;
use serde::{Deserialize, Serialize};

use crate::error::{RbacError, RbacResult};
use crate::right::{AccessRight, AccessRightSet};

/// Maximum role name length.
pub const MAX_ROLE_NAME_LEN: usize = 64;

/// Validate a role name: lower-case kebab-case, starting with a letter.
///
/// # Examples
///
/// ```
/// use lms_rbac::validate_role_name;
///
/// assert!(validate_role_name("content-admin").is_ok());
/// assert!(validate_role_name("Content Admin").is_err());
/// assert!(validate_role_name("-admin").is_err());
/// ```
pub fn validate_role_name(name: &str) -> RbacResult<()> {
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let rest_valid = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if !starts_with_letter || !rest_valid || name.len() > MAX_ROLE_NAME_LEN {
        return Err(RbacError::InvalidRoleName(name.to_string()));
    }
    Ok(())
}

/// A named set of access rights for one user category.
///
/// # Examples
///
/// ```
/// use lms_org::UserCategory;
/// use lms_rbac::RoleDefinition;
///
/// let role = RoleDefinition::new("grader", UserCategory::Staff, &["learning:progress:read"])
///     .unwrap()
///     .with_sort_order(40);
/// assert!(role.grants("learning:progress:read"));
/// assert!(!role.grants("learning:progress:write"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleDefinition {
    /// Role name (unique within the catalog)
    pub name: String,

    /// Category that may hold the role
    pub category: UserCategory,

    /// Rights granted by the role
    pub access_rights: AccessRightSet,

    /// Display ordering
    #[serde(default)]
    pub sort_order: i32,

    /// Inactive roles grant nothing
    pub is_active: bool,
}

impl RoleDefinition {
    /// Create an active role, validating its name and every right.
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid name or a malformed right.
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        category: UserCategory,
        rights: &[S],
    ) -> RbacResult<Self> {
        let name = name.into();
        validate_role_name(&name)?;
        let access_rights = AccessRightSet::try_from_strings(rights)?;

        Ok(Self {
            name,
            category,
            access_rights,
            sort_order: 0,
            is_active: true,
        })
    }

    /// Set the display order.
    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Mark the role inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Re-check the name and every right.
    ///
    /// Definitions built with [`Self::new`] always pass; this guards ones
    /// that arrive deserialized.
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid name or a malformed right.
    pub fn validate(&self) -> RbacResult<()> {
        validate_role_name(&self.name)?;
        for right in self.access_rights.iter() {
            AccessRight::parse(right)?;
        }
        Ok(())
    }

    /// Check if this active role grants a right.
    pub fn grants(&self, right: &str) -> bool {
        self.is_active && self.access_rights.has_str(right)
    }
}
