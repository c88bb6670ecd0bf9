//! Role resolution
//!
//! Answers "which roles does this user hold in this department, for this
//! category". Department-scoped categories cascade upward through parents
//! until a direct membership is found; a direct membership replaces what
//! would cascade, it never merges with it. Cascading into a department is
//! blocked when the department or its parent requires explicit membership.
//! The global-admin category only ever looks at the master department.
//!
//! Absent or inactive users, departments and memberships resolve to an empty
//! role set. Store failures are returned as errors.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use lms_org::{
    Department, DepartmentMembership, DepartmentRef, DepartmentTree, MembershipSummary,
    UserCategory,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::AccessResult;
use crate::hierarchy::HierarchyService;
use crate::store::AccessStore;

/// Roles resolved for one department, with where they came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedRoles {
    /// Role names, sorted
    pub roles: Vec<String>,

    /// Department holding the membership the roles came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_department_id: Option<Uuid>,

    /// Whether the roles cascaded from an ancestor
    pub inherited: bool,
}

impl ResolvedRoles {
    fn direct(department_id: Uuid, roles: &BTreeSet<String>) -> Self {
        Self {
            roles: roles.iter().cloned().collect(),
            source_department_id: Some(department_id),
            inherited: false,
        }
    }

    fn inherited_from(department_id: Uuid, roles: &BTreeSet<String>) -> Self {
        Self {
            inherited: true,
            ..Self::direct(department_id, roles)
        }
    }

    /// Check if no roles were resolved.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// A department a user can see, with the roles they hold there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisibleDepartment {
    /// Department identity
    pub department: DepartmentRef,

    /// Parent department
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,

    /// Roles held in the department, sorted
    pub roles: Vec<String>,

    /// Whether the roles cascaded from the parent
    pub inherited: bool,
}

/// Resolves roles from memberships and the hierarchy.
#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn AccessStore>,
    hierarchy: Arc<HierarchyService>,
    master_department_id: Uuid,
}

impl std::fmt::Debug for RoleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleResolver")
            .field("master_department_id", &self.master_department_id)
            .finish_non_exhaustive()
    }
}

impl RoleResolver {
    /// Create a resolver.
    ///
    /// # Arguments
    ///
    /// * `store` - Persisted users and memberships
    /// * `hierarchy` - Department snapshot source
    /// * `master_department_id` - Department holding global-admin memberships
    pub fn new(
        store: Arc<dyn AccessStore>,
        hierarchy: Arc<HierarchyService>,
        master_department_id: Uuid,
    ) -> Self {
        Self {
            store,
            hierarchy,
            master_department_id,
        }
    }

    /// The master department ID.
    pub fn master_department_id(&self) -> Uuid {
        self.master_department_id
    }

    /// Roles a user holds in a department for a category.
    pub async fn resolve_roles(
        &self,
        user_id: Uuid,
        department_id: Uuid,
        category: UserCategory,
    ) -> AccessResult<Vec<String>> {
        Ok(self
            .resolve_with_source(user_id, department_id, category)
            .await?
            .roles)
    }

    /// Roles a user holds in a department, with their source.
    #[instrument(skip(self))]
    pub async fn resolve_with_source(
        &self,
        user_id: Uuid,
        department_id: Uuid,
        category: UserCategory,
    ) -> AccessResult<ResolvedRoles> {
        let Some(memberships) = self.effective_memberships(user_id, category).await? else {
            return Ok(ResolvedRoles::default());
        };

        if category == UserCategory::GlobalAdmin {
            let resolved = memberships
                .get(&self.master_department_id)
                .map(|m| ResolvedRoles::direct(self.master_department_id, &m.roles))
                .unwrap_or_default();
            debug!(roles = ?resolved.roles, "Resolved master department roles");
            return Ok(resolved);
        }

        let tree = self.hierarchy.tree().await?;
        let resolved = cascade(&tree, &memberships, department_id);
        debug!(
            roles = ?resolved.roles,
            source = ?resolved.source_department_id,
            inherited = resolved.inherited,
            "Resolved department roles"
        );
        Ok(resolved)
    }

    /// Departments a user can see for a category.
    ///
    /// Each department with a direct membership is listed with its roles.
    /// Unless it requires explicit membership, its immediate children are
    /// listed too, carrying the same roles as inherited. Children that
    /// require explicit membership, or hold their own membership, are not
    /// listed as inherited. Results are ordered by department code.
    #[instrument(skip(self))]
    pub async fn resolve_visible_departments(
        &self,
        user_id: Uuid,
        category: UserCategory,
    ) -> AccessResult<Vec<VisibleDepartment>> {
        let Some(memberships) = self.effective_memberships(user_id, category).await? else {
            return Ok(Vec::new());
        };
        let tree = self.hierarchy.tree().await?;

        let mut visible: HashMap<Uuid, VisibleDepartment> = HashMap::new();
        for membership in memberships.values() {
            if category == UserCategory::GlobalAdmin
                && membership.department_id != self.master_department_id
            {
                continue;
            }
            let Some(dept) = tree.get(membership.department_id).filter(|d| d.is_traversable())
            else {
                continue;
            };
            let roles: Vec<String> = membership.roles.iter().cloned().collect();
            visible.insert(dept.id, visible_entry(dept, roles.clone(), false));

            if !category.cascades() || dept.require_explicit_membership {
                continue;
            }
            for child in tree.children_of(dept.id) {
                if child.require_explicit_membership || memberships.contains_key(&child.id) {
                    continue;
                }
                visible
                    .entry(child.id)
                    .or_insert_with(|| visible_entry(child, roles.clone(), true));
            }
        }

        let mut result: Vec<VisibleDepartment> = visible.into_values().collect();
        result.sort_by(|a, b| {
            a.department
                .code
                .cmp(&b.department.code)
                .then_with(|| a.department.id.cmp(&b.department.id))
        });
        Ok(result)
    }

    /// Every effective membership of a user across all categories.
    ///
    /// Memberships in departments missing from the hierarchy are skipped.
    #[instrument(skip(self))]
    pub async fn resolve_all_memberships(&self, user_id: Uuid) -> AccessResult<Vec<MembershipSummary>> {
        let memberships = self.store.memberships_for_user(user_id).await?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }
        let tree = self.hierarchy.tree().await?;

        let mut summaries: Vec<MembershipSummary> = memberships
            .iter()
            .filter(|m| m.is_effective_now())
            .filter_map(|m| tree.get(m.department_id).map(|d| MembershipSummary::new(m, d)))
            .collect();
        summaries.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.department.code.cmp(&b.department.code))
                .then_with(|| a.membership_id.cmp(&b.membership_id))
        });
        Ok(summaries)
    }

    /// Effective memberships of a user in one category, keyed by department.
    ///
    /// `None` when the user is absent, inactive, or lacks the category.
    async fn effective_memberships(
        &self,
        user_id: Uuid,
        category: UserCategory,
    ) -> AccessResult<Option<HashMap<Uuid, DepartmentMembership>>> {
        let Some(user) = self.store.get_user(user_id).await? else {
            debug!(user_id = %user_id, "Unknown user resolves to no roles");
            return Ok(None);
        };
        if !user.is_active || !user.has_category(category) {
            return Ok(None);
        }

        let memberships = self
            .store
            .memberships_for_user(user_id)
            .await?
            .into_iter()
            .filter(|m| m.category() == category && m.is_effective_now())
            .map(|m| (m.department_id, m))
            .collect();
        Ok(Some(memberships))
    }
}

fn visible_entry(dept: &Department, roles: Vec<String>, inherited: bool) -> VisibleDepartment {
    VisibleDepartment {
        department: dept.to_ref(),
        parent_id: dept.parent_id,
        roles,
        inherited,
    }
}

/// Walk upward from `department_id` until a direct membership is found or
/// cascading is blocked.
fn cascade(
    tree: &DepartmentTree,
    memberships: &HashMap<Uuid, DepartmentMembership>,
    department_id: Uuid,
) -> ResolvedRoles {
    let mut visited = HashSet::new();
    let mut current = department_id;

    loop {
        if !visited.insert(current) {
            debug!(department_id = %current, "Cycle in department hierarchy, stopping cascade");
            return ResolvedRoles::default();
        }
        let Some(dept) = tree.get(current).filter(|d| d.is_active) else {
            return ResolvedRoles::default();
        };

        if let Some(membership) = memberships.get(&current) {
            return if current == department_id {
                ResolvedRoles::direct(current, &membership.roles)
            } else {
                ResolvedRoles::inherited_from(current, &membership.roles)
            };
        }

        if dept.require_explicit_membership {
            return ResolvedRoles::default();
        }
        match tree.parent_of(current) {
            Some(parent) if !parent.require_explicit_membership => current = parent.id,
            _ => return ResolvedRoles::default(),
        }
    }
}
