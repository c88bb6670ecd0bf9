//! Membership administration
//!
//! Role grants, removals, replacements and role definitions. Each
//! membership write:
//!
//! 1. Validates role names, categories and the last-admin invariant against
//!    current store data, rejecting violations before anything is written
//! 2. Opens a permission-cache mutation window for the affected user
//! 3. Writes one [`MembershipBatch`] whose version checks and last-admin
//!    guard the store evaluates atomically
//! 4. Closes the window (whether or not the write succeeded)
//! 5. Records an audit event
//!
//! Role-definition writes bump the permission-cache epoch instead, since
//! they change the rights of every holder.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lms_events::{AuditEvent, AuditEventKind, AuditSink};
use lms_org::{DepartmentMembership, MembershipDetails, OrgError, UserCategory};
use lms_rbac::{validate_role_name, RbacError, RoleCatalog, RoleDefinition, DEPARTMENT_ADMIN};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::audit;
use crate::cache::PermissionCache;
use crate::error::{AccessError, AccessResult};
use crate::store::{AccessStore, MembershipBatch, StoreError};

/// A request to grant a role in a department.
///
/// The membership category is taken from the role definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleAssignment {
    /// User receiving the role
    pub user_id: Uuid,

    /// Department the role applies to
    pub department_id: Uuid,

    /// Role name
    pub role: String,

    /// Make this the user's primary membership for the category
    #[serde(default)]
    pub is_primary: bool,

    /// Optional expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    /// Create an assignment.
    pub fn new(user_id: Uuid, department_id: Uuid, role: impl Into<String>) -> Self {
        Self {
            user_id,
            department_id,
            role: role.into(),
            is_primary: false,
            expires_at: None,
        }
    }

    /// Mark as primary.
    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        self
    }

    /// Set an expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Writes memberships on behalf of administrators.
#[derive(Clone)]
pub struct MembershipAdmin {
    store: Arc<dyn AccessStore>,
    cache: PermissionCache,
    audit: Arc<dyn AuditSink>,
    master_department_id: Uuid,
}

impl std::fmt::Debug for MembershipAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipAdmin")
            .field("master_department_id", &self.master_department_id)
            .finish_non_exhaustive()
    }
}

impl MembershipAdmin {
    /// Create the admin service.
    pub fn new(
        store: Arc<dyn AccessStore>,
        cache: PermissionCache,
        audit: Arc<dyn AuditSink>,
        master_department_id: Uuid,
    ) -> Self {
        Self {
            store,
            cache,
            audit,
            master_department_id,
        }
    }

    /// Grant a role.
    ///
    /// Adds the role to the user's effective membership of the role's
    /// category in the department, or creates that membership.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the user, department or role does not exist
    /// - `Validation` if the role name is malformed, the role is inactive,
    ///   the user lacks the role's category, the department is inactive, or
    ///   a global-admin role targets a department other than the master
    /// - `Conflict` if the membership changed concurrently
    #[instrument(skip(self, assignment), fields(user_id = %assignment.user_id, department_id = %assignment.department_id, role = %assignment.role))]
    pub async fn assign_role(
        &self,
        actor_id: Uuid,
        assignment: RoleAssignment,
    ) -> AccessResult<DepartmentMembership> {
        validate_role_name(&assignment.role)?;

        let user = self
            .store
            .get_user(assignment.user_id)
            .await?
            .ok_or_else(|| AccessError::NotFound(format!("User {}", assignment.user_id)))?;
        if !user.is_active {
            return Err(AccessError::Validation(format!("User {} is inactive", user.id)));
        }

        let department = self
            .store
            .get_department(assignment.department_id)
            .await?
            .ok_or_else(|| AccessError::NotFound(format!("Department {}", assignment.department_id)))?;
        if !department.is_active {
            return Err(AccessError::Validation(format!(
                "Department {} is inactive",
                department.code
            )));
        }

        let catalog = self.catalog().await?;
        let category = catalog
            .get(&assignment.role)
            .map(|role| role.category)
            .ok_or_else(|| RbacError::UnknownRole(assignment.role.clone()))?;
        catalog.validate_assignment(&assignment.role, category)?;

        if !user.has_category(category) {
            return Err(AccessError::Validation(format!(
                "User {} does not hold the {} category",
                user.id,
                category.as_str()
            )));
        }
        if category == UserCategory::GlobalAdmin && department.id != self.master_department_id {
            return Err(AccessError::Validation(
                "Global-admin roles can only be granted in the master department".to_string(),
            ));
        }

        let ticket = self.cache.begin_mutation(user.id).await;
        let result = self.write_assignment(actor_id, &assignment, category).await;
        self.cache.end_mutation(ticket).await;
        let (membership, created) = result?;

        info!(membership_id = %membership.id, created, "Role assigned");
        audit::record(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventKind::RoleAssigned)
                .with_actor(actor_id)
                .with_subject(membership.user_id)
                .with_department(membership.department_id)
                .with_membership(membership.id)
                .with_payload(json!({
                    "role": assignment.role,
                    "category": category,
                    "is_primary": membership.is_primary,
                    "expires_at": membership.expires_at,
                    "created": created,
                })),
        )
        .await;

        Ok(membership)
    }

    /// Remove a membership (soft-deactivate).
    ///
    /// Removing an already inactive membership is a no-op.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the membership does not exist or belongs to another user
    /// - `Conflict` if it is the department's last active department-admin
    ///   membership, or it changed concurrently
    #[instrument(skip(self))]
    pub async fn remove_role(&self, actor_id: Uuid, user_id: Uuid, membership_id: Uuid) -> AccessResult<()> {
        let membership = self.membership_of(user_id, membership_id).await?;
        if !membership.is_active {
            debug!("Membership already inactive");
            return Ok(());
        }
        let mut updated = membership.clone();
        updated.deactivate();
        let mut batch = MembershipBatch::new().update(updated, membership.version);
        if membership.is_effective_now() && membership.has_role(DEPARTMENT_ADMIN) {
            self.guard_last_admin(&membership).await?;
            batch = batch.retaining(membership.department_id, DEPARTMENT_ADMIN);
        }

        let ticket = self.cache.begin_mutation(user_id).await;
        let result = self.write_one(batch).await;
        self.cache.end_mutation(ticket).await;
        let updated = result?;

        info!(version = updated.version, "Membership removed");
        audit::record(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventKind::RoleRemoved)
                .with_actor(actor_id)
                .with_subject(user_id)
                .with_department(updated.department_id)
                .with_membership(updated.id)
                .with_payload(json!({
                    "roles": membership.roles,
                    "category": membership.category(),
                })),
        )
        .await;

        Ok(())
    }

    /// Replace a membership's role set.
    ///
    /// # Errors
    ///
    /// - `Validation` if the set is empty, a role is malformed or inactive,
    ///   a role belongs to another category, or the membership is inactive
    /// - `NotFound` if the membership or a role does not exist
    /// - `Conflict` if `expected_version` is stale, or the change would drop
    ///   the department's last department-admin
    #[instrument(skip(self, roles))]
    pub async fn update_roles(
        &self,
        actor_id: Uuid,
        membership_id: Uuid,
        roles: Vec<String>,
        expected_version: u64,
    ) -> AccessResult<DepartmentMembership> {
        let roles: BTreeSet<String> = roles.into_iter().map(|r| r.trim().to_string()).collect();
        if roles.is_empty() {
            return Err(OrgError::EmptyRoleSet.into());
        }

        let membership = self
            .store
            .get_membership(membership_id)
            .await?
            .ok_or_else(|| AccessError::NotFound(format!("Membership {}", membership_id)))?;
        if membership.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "membership",
                id: membership_id,
                expected: expected_version,
                actual: membership.version,
            }
            .into());
        }
        if !membership.is_active {
            return Err(AccessError::Validation(format!(
                "Membership {} is inactive",
                membership_id
            )));
        }

        let catalog = self.catalog().await?;
        for role in &roles {
            catalog.validate_assignment(role, membership.category())?;
        }
        let drops_admin = membership.is_effective_now()
            && membership.has_role(DEPARTMENT_ADMIN)
            && !roles.contains(DEPARTMENT_ADMIN);
        if drops_admin {
            self.guard_last_admin(&membership).await?;
        }

        let mut updated = membership.clone();
        updated.roles = roles;
        updated.validate()?;
        let mut batch = MembershipBatch::new().update(updated, expected_version);
        if drops_admin {
            batch = batch.retaining(membership.department_id, DEPARTMENT_ADMIN);
        }

        let ticket = self.cache.begin_mutation(membership.user_id).await;
        let result = self.write_one(batch).await;
        self.cache.end_mutation(ticket).await;
        let updated = result?;

        info!(version = updated.version, "Membership roles replaced");
        audit::record(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventKind::RolesUpdated)
                .with_actor(actor_id)
                .with_subject(updated.user_id)
                .with_department(updated.department_id)
                .with_membership(updated.id)
                .with_payload(json!({
                    "before": membership.roles,
                    "after": updated.roles,
                })),
        )
        .await;

        Ok(updated)
    }

    /// Create or replace a role definition.
    ///
    /// Bumps the permission-cache epoch, so every cached grant is dropped.
    ///
    /// # Errors
    ///
    /// - `Validation` if the name or a right is malformed, or the role
    ///   already exists under another category
    #[instrument(skip(self, role), fields(role = %role.name))]
    pub async fn upsert_role(&self, actor_id: Uuid, role: RoleDefinition) -> AccessResult<RoleDefinition> {
        role.validate()?;

        let catalog = self.catalog().await?;
        let previous = catalog.get(&role.name).cloned();
        if let Some(previous) = &previous {
            if previous.category != role.category {
                return Err(AccessError::Validation(format!(
                    "Role {} belongs to category {} and cannot move to {}",
                    role.name,
                    previous.category.as_str(),
                    role.category.as_str()
                )));
            }
        }

        let stored = self.store.upsert_role(role).await?;
        self.cache.bump_epoch().await;

        let created = previous.is_none();
        let previous_rights = previous.map(|p| p.access_rights);
        info!(created, is_active = stored.is_active, "Role definition written");
        audit::record(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventKind::RoleDefined)
                .with_actor(actor_id)
                .with_payload(json!({
                    "role": stored.name,
                    "category": stored.category,
                    "is_active": stored.is_active,
                    "access_rights": stored.access_rights,
                    "previous_rights": previous_rights,
                    "created": created,
                })),
        )
        .await;

        Ok(stored)
    }

    async fn catalog(&self) -> AccessResult<RoleCatalog> {
        Ok(self.store.list_roles().await?.into_iter().collect())
    }

    async fn membership_of(&self, user_id: Uuid, membership_id: Uuid) -> AccessResult<DepartmentMembership> {
        self.store
            .get_membership(membership_id)
            .await?
            .filter(|m| m.user_id == user_id)
            .ok_or_else(|| AccessError::NotFound(format!("Membership {}", membership_id)))
    }

    async fn write_one(&self, batch: MembershipBatch) -> AccessResult<DepartmentMembership> {
        self.store
            .write_memberships(batch)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AccessError::Internal("Membership batch returned no records".to_string()))
    }

    /// Reject the change early if `membership` holds the department's only
    /// effective department-admin role. The store repeats the check
    /// atomically with the write.
    async fn guard_last_admin(&self, membership: &DepartmentMembership) -> AccessResult<()> {
        let others = self
            .store
            .memberships_in_department(membership.department_id)
            .await?
            .into_iter()
            .filter(|m| {
                m.id != membership.id && m.is_effective_now() && m.has_role(DEPARTMENT_ADMIN)
            })
            .count();
        if others == 0 {
            debug!(membership_id = %membership.id, "Last department-admin membership");
            return Err(StoreError::LastRoleHolder {
                department_id: membership.department_id,
                role: DEPARTMENT_ADMIN.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Add the role to an existing membership or create one. Returns the
    /// stored membership and whether it was created.
    ///
    /// Moving the primary flag demotes the user's other primaries of the
    /// category in the same batch, so either every write lands or none does.
    async fn write_assignment(
        &self,
        actor_id: Uuid,
        assignment: &RoleAssignment,
        category: UserCategory,
    ) -> AccessResult<(DepartmentMembership, bool)> {
        let memberships = self.store.memberships_for_user(assignment.user_id).await?;
        let existing = memberships.iter().find(|m| {
            m.department_id == assignment.department_id
                && m.category() == category
                && m.is_effective_now()
        });

        let (mut batch, membership_id, primary, created) = match existing {
            Some(current) => {
                let mut updated = current.clone();
                updated.add_role(assignment.role.clone());
                if assignment.is_primary {
                    updated.is_primary = true;
                }
                if assignment.expires_at.is_some() {
                    updated.expires_at = assignment.expires_at;
                }
                updated.assigned_by = Some(actor_id);
                let primary = updated.is_primary;
                (
                    MembershipBatch::new().update(updated, current.version),
                    current.id,
                    primary,
                    false,
                )
            }
            None => {
                let mut membership = DepartmentMembership::new(
                    assignment.user_id,
                    assignment.department_id,
                    MembershipDetails::for_category(category),
                    [assignment.role.clone()],
                )
                .with_primary(assignment.is_primary)
                .with_assigned_by(actor_id);
                if let Some(expires_at) = assignment.expires_at {
                    membership = membership.with_expiry(expires_at);
                }
                let (id, primary) = (membership.id, membership.is_primary);
                (MembershipBatch::new().insert(membership), id, primary, true)
            }
        };

        if primary {
            for other in memberships.iter().filter(|m| {
                m.id != membership_id && m.is_primary && m.category() == category
            }) {
                let mut demoted = other.clone();
                demoted.is_primary = false;
                batch = batch.update(demoted, other.version);
                debug!(membership_id = %other.id, "Primary flag moved");
            }
        }

        Ok((self.write_one(batch).await?, created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::error::ErrorKind;
    use crate::memory::InMemoryStore;
    use crate::store::{DepartmentStore, MembershipStore, RoleStore, StoreResult, UserDirectory};
    use async_trait::async_trait;
    use lms_events::MemoryAuditSink;
    use lms_org::{Department, UserRecord};
    use lms_rbac::{CONTENT_ADMIN, INSTRUCTOR, LEARNER, SYSTEM_ADMIN};
    use std::time::Duration;

    /// Store that yields after membership list reads, letting a concurrent
    /// task run between a writer's precondition check and its write.
    #[derive(Clone)]
    struct YieldingStore {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl DepartmentStore for YieldingStore {
        async fn get_department(&self, id: Uuid) -> StoreResult<Option<Department>> {
            self.inner.get_department(id).await
        }

        async fn list_departments(&self) -> StoreResult<Vec<Department>> {
            self.inner.list_departments().await
        }

        async fn insert_department(&self, department: Department) -> StoreResult<Department> {
            self.inner.insert_department(department).await
        }

        async fn update_department(&self, department: Department, expected_version: u64) -> StoreResult<Department> {
            self.inner.update_department(department, expected_version).await
        }
    }

    #[async_trait]
    impl MembershipStore for YieldingStore {
        async fn get_membership(&self, id: Uuid) -> StoreResult<Option<DepartmentMembership>> {
            self.inner.get_membership(id).await
        }

        async fn memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<DepartmentMembership>> {
            let read = self.inner.memberships_for_user(user_id).await;
            tokio::task::yield_now().await;
            read
        }

        async fn memberships_in_department(&self, department_id: Uuid) -> StoreResult<Vec<DepartmentMembership>> {
            let read = self.inner.memberships_in_department(department_id).await;
            tokio::task::yield_now().await;
            read
        }

        async fn write_memberships(&self, batch: MembershipBatch) -> StoreResult<Vec<DepartmentMembership>> {
            self.inner.write_memberships(batch).await
        }
    }

    #[async_trait]
    impl RoleStore for YieldingStore {
        async fn list_roles(&self) -> StoreResult<Vec<RoleDefinition>> {
            self.inner.list_roles().await
        }

        async fn upsert_role(&self, role: RoleDefinition) -> StoreResult<RoleDefinition> {
            self.inner.upsert_role(role).await
        }
    }

    #[async_trait]
    impl UserDirectory for YieldingStore {
        async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserRecord>> {
            self.inner.get_user(id).await
        }
    }

    fn yielding_admin(f: &Fixture) -> MembershipAdmin {
        let store = YieldingStore {
            inner: f.store.clone(),
        };
        MembershipAdmin::new(Arc::new(store), f.cache.clone(), f.audit.clone(), f.master.id)
    }

    struct Fixture {
        store: InMemoryStore,
        cache: PermissionCache,
        audit: Arc<MemoryAuditSink>,
        admin: MembershipAdmin,
        master: Department,
        dept: Department,
        actor: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::with_builtin_roles();
        let cache = PermissionCache::new(Arc::new(MemoryCacheStore::new()), Duration::from_secs(900));
        let audit = Arc::new(MemoryAuditSink::new());

        let master = Department::new("Platform", "MASTER");
        let dept = Department::new("Biology", "BIO");
        store.insert_department(master.clone()).await.unwrap();
        store.insert_department(dept.clone()).await.unwrap();

        let admin = MembershipAdmin::new(Arc::new(store.clone()), cache.clone(), audit.clone(), master.id);
        Fixture {
            store,
            cache,
            audit,
            admin,
            master,
            dept,
            actor: Uuid::now_v7(),
        }
    }

    async fn staff_user(store: &InMemoryStore) -> Uuid {
        let id = Uuid::now_v7();
        store.put_user(UserRecord::new(id, [UserCategory::Staff])).await;
        id
    }

    #[tokio::test]
    async fn test_assign_creates_then_extends() {
        let f = fixture().await;
        let user = staff_user(&f.store).await;

        let first = f
            .admin
            .assign_role(f.actor, RoleAssignment::new(user, f.dept.id, INSTRUCTOR))
            .await
            .unwrap();
        let second = f
            .admin
            .assign_role(f.actor, RoleAssignment::new(user, f.dept.id, CONTENT_ADMIN))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.has_role(INSTRUCTOR) && second.has_role(CONTENT_ADMIN));
        assert_eq!(second.version, first.version + 1);
        assert_eq!(second.category(), UserCategory::Staff);

        let events = f.audit.events_of_kind(AuditEventKind::RoleAssigned).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].subject_user_id, Some(user));
        assert_eq!(events[0].actor_id, Some(f.actor));

        // Two writes, each bracketed by a begin/end pair
        assert_eq!(f.cache.user_version(user).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_assign_rejections() {
        let f = fixture().await;
        let user = staff_user(&f.store).await;

        let missing_user = f
            .admin
            .assign_role(f.actor, RoleAssignment::new(Uuid::now_v7(), f.dept.id, INSTRUCTOR))
            .await
            .unwrap_err();
        assert_eq!(missing_user.kind(), ErrorKind::NotFound);

        let unknown = f
            .admin
            .assign_role(f.actor, RoleAssignment::new(user, f.dept.id, "wizard"))
            .await
            .unwrap_err();
        assert_eq!(unknown.error_code(), "UNKNOWN_ROLE");

        let malformed = f
            .admin
            .assign_role(f.actor, RoleAssignment::new(user, f.dept.id, "Bad Role"))
            .await
            .unwrap_err();
        assert_eq!(malformed.kind(), ErrorKind::Validation);

        // Staff user cannot take a learner role
        let wrong_category = f
            .admin
            .assign_role(f.actor, RoleAssignment::new(user, f.dept.id, LEARNER))
            .await
            .unwrap_err();
        assert_eq!(wrong_category.kind(), ErrorKind::Validation);

        let admin_user = Uuid::now_v7();
        f.store
            .put_user(UserRecord::new(admin_user, [UserCategory::GlobalAdmin]))
            .await;
        let outside_master = f
            .admin
            .assign_role(f.actor, RoleAssignment::new(admin_user, f.dept.id, SYSTEM_ADMIN))
            .await
            .unwrap_err();
        assert_eq!(outside_master.kind(), ErrorKind::Validation);
        assert!(f
            .admin
            .assign_role(f.actor, RoleAssignment::new(admin_user, f.master.id, SYSTEM_ADMIN))
            .await
            .is_ok());

        assert!(f.store.memberships_for_user(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_primary_moves() {
        let f = fixture().await;
        let user = staff_user(&f.store).await;
        let other = Department::new("Chemistry", "CHEM");
        f.store.insert_department(other.clone()).await.unwrap();

        let first = f
            .admin
            .assign_role(
                f.actor,
                RoleAssignment::new(user, f.dept.id, INSTRUCTOR).with_primary(true),
            )
            .await
            .unwrap();
        let second = f
            .admin
            .assign_role(
                f.actor,
                RoleAssignment::new(user, other.id, INSTRUCTOR).with_primary(true),
            )
            .await
            .unwrap();

        assert!(second.is_primary);
        let first = f.store.get_membership(first.id).await.unwrap().unwrap();
        assert!(!first.is_primary);
    }

    #[tokio::test]
    async fn test_last_admin_guard() {
        let f = fixture().await;
        let alice = staff_user(&f.store).await;
        let bob = staff_user(&f.store).await;

        let alice_m = f
            .admin
            .assign_role(f.actor, RoleAssignment::new(alice, f.dept.id, DEPARTMENT_ADMIN))
            .await
            .unwrap();

        let err = f.admin.remove_role(f.actor, alice, alice_m.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let stored = f.store.get_membership(alice_m.id).await.unwrap().unwrap();
        assert!(stored.is_active);
        assert_eq!(stored.version, alice_m.version);

        let err = f
            .admin
            .update_roles(f.actor, alice_m.id, vec![INSTRUCTOR.to_string()], alice_m.version)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // A second admin lifts the guard
        f.admin
            .assign_role(f.actor, RoleAssignment::new(bob, f.dept.id, DEPARTMENT_ADMIN))
            .await
            .unwrap();
        f.admin.remove_role(f.actor, alice, alice_m.id).await.unwrap();
        let stored = f.store.get_membership(alice_m.id).await.unwrap().unwrap();
        assert!(!stored.is_active);

        // Idempotent
        f.admin.remove_role(f.actor, alice, alice_m.id).await.unwrap();
        assert_eq!(f.audit.events_of_kind(AuditEventKind::RoleRemoved).await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_roles() {
        let f = fixture().await;
        let user = staff_user(&f.store).await;
        let m = f
            .admin
            .assign_role(f.actor, RoleAssignment::new(user, f.dept.id, INSTRUCTOR))
            .await
            .unwrap();

        let updated = f
            .admin
            .update_roles(
                f.actor,
                m.id,
                vec![CONTENT_ADMIN.to_string(), "analyst".to_string()],
                m.version,
            )
            .await
            .unwrap();
        assert!(!updated.has_role(INSTRUCTOR));
        assert_eq!(updated.roles.len(), 2);

        let stale = f
            .admin
            .update_roles(f.actor, m.id, vec![INSTRUCTOR.to_string()], m.version)
            .await
            .unwrap_err();
        assert_eq!(stale.error_code(), "VERSION_CONFLICT");

        let empty = f
            .admin
            .update_roles(f.actor, m.id, Vec::new(), updated.version)
            .await
            .unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::Validation);

        let cross = f
            .admin
            .update_roles(f.actor, m.id, vec![LEARNER.to_string()], updated.version)
            .await
            .unwrap_err();
        assert_eq!(cross.kind(), ErrorKind::Validation);

        let events = f.audit.events_of_kind(AuditEventKind::RolesUpdated).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_other_users_membership_is_not_found() {
        let f = fixture().await;
        let user = staff_user(&f.store).await;
        let m = f
            .admin
            .assign_role(f.actor, RoleAssignment::new(user, f.dept.id, INSTRUCTOR))
            .await
            .unwrap();

        let err = f
            .admin
            .remove_role(f.actor, Uuid::now_v7(), m.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_concurrent_admin_removals_keep_one_admin() {
        let f = fixture().await;
        let alice = staff_user(&f.store).await;
        let bob = staff_user(&f.store).await;
        let alice_m = f
            .admin
            .assign_role(f.actor, RoleAssignment::new(alice, f.dept.id, DEPARTMENT_ADMIN))
            .await
            .unwrap();
        let bob_m = f
            .admin
            .assign_role(f.actor, RoleAssignment::new(bob, f.dept.id, DEPARTMENT_ADMIN))
            .await
            .unwrap();

        // Both removals pass the early check before either writes
        let admin = yielding_admin(&f);
        let (a, b) = tokio::join!(
            admin.remove_role(f.actor, alice, alice_m.id),
            admin.remove_role(f.actor, bob, bob_m.id),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find_map(Result::err).unwrap();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.error_code(), "LAST_ROLE_HOLDER");

        let admins = f
            .store
            .memberships_in_department(f.dept.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.is_effective_now() && m.has_role(DEPARTMENT_ADMIN))
            .count();
        assert_eq!(admins, 1);
        assert_eq!(f.audit.events_of_kind(AuditEventKind::RoleRemoved).await.len(), 1);
    }

    #[tokio::test]
    async fn test_primary_move_conflict_writes_nothing() {
        let f = fixture().await;
        let user = staff_user(&f.store).await;
        let other = Department::new("Chemistry", "CHEM");
        f.store.insert_department(other.clone()).await.unwrap();
        let first = f
            .admin
            .assign_role(
                f.actor,
                RoleAssignment::new(user, f.dept.id, INSTRUCTOR).with_primary(true),
            )
            .await
            .unwrap();

        // The current primary is edited while the move is in flight
        let admin = yielding_admin(&f);
        let (moved, edited) = tokio::join!(
            admin.assign_role(
                f.actor,
                RoleAssignment::new(user, other.id, INSTRUCTOR).with_primary(true),
            ),
            admin.update_roles(f.actor, first.id, vec![CONTENT_ADMIN.to_string()], first.version),
        );

        assert!(edited.is_ok());
        let err = moved.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.error_code(), "VERSION_CONFLICT");

        let memberships = f.store.memberships_for_user(user).await.unwrap();
        assert_eq!(memberships.len(), 1);
        assert!(memberships[0].is_primary);
        assert!(memberships[0].has_role(CONTENT_ADMIN));
    }

    #[tokio::test]
    async fn test_upsert_role_invalidates_every_grant() {
        let f = fixture().await;
        let epoch = f.cache.epoch().await.unwrap();

        let grader = RoleDefinition::new("grader", UserCategory::Staff, &["learning:progress:read"]).unwrap();
        let created = f.admin.upsert_role(f.actor, grader.clone()).await.unwrap();
        assert_eq!(created, grader);
        assert_eq!(f.cache.epoch().await.unwrap(), epoch + 1);

        f.admin.upsert_role(f.actor, grader.clone().inactive()).await.unwrap();
        assert_eq!(f.cache.epoch().await.unwrap(), epoch + 2);
        let stored = f.store.list_roles().await.unwrap();
        assert!(stored.iter().any(|r| r.name == "grader" && !r.is_active));

        let events = f.audit.events_of_kind(AuditEventKind::RoleDefined).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].actor_id, Some(f.actor));
        assert_eq!(events[1].payload["created"], json!(false));

        let mut bad_name = grader.clone();
        bad_name.name = "Grader Role".to_string();
        let err = f.admin.upsert_role(f.actor, bad_name).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let moved = RoleDefinition::new("grader", UserCategory::Learner, &["learning:progress:read"]).unwrap();
        let err = f.admin.upsert_role(f.actor, moved).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        // Rejected writes leave the epoch alone
        assert_eq!(f.cache.epoch().await.unwrap(), epoch + 2);
    }
}
