//! In-memory store
//!
//! Reference implementation of every persistence trait. Used by tests and by
//! embedders that keep access data in process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lms_org::{Department, DepartmentMembership, UserRecord};
use lms_rbac::{RoleCatalog, RoleDefinition};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{
    DepartmentStore, MembershipBatch, MembershipStore, MembershipWrite, RoleStore, StoreError,
    StoreResult, UserDirectory,
};

/// In-memory implementation of [`crate::store::AccessStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    departments: Arc<RwLock<HashMap<Uuid, Department>>>,
    memberships: Arc<RwLock<HashMap<Uuid, DepartmentMembership>>>,
    roles: Arc<RwLock<HashMap<String, RoleDefinition>>>,
    users: Arc<RwLock<HashMap<Uuid, UserRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Create an empty store with no roles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with the built-in roles.
    pub fn with_builtin_roles() -> Self {
        let store = Self::new();
        let roles = RoleCatalog::builtin()
            .roles()
            .map(|role| (role.name.clone(), role.clone()))
            .collect();
        Self {
            roles: Arc::new(RwLock::new(roles)),
            ..store
        }
    }

    /// Insert or replace a user record.
    pub async fn put_user(&self, user: UserRecord) {
        self.users.write().await.insert(user.id, user);
    }

    /// Simulate an outage: every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DepartmentStore for InMemoryStore {
    async fn get_department(&self, id: Uuid) -> StoreResult<Option<Department>> {
        self.check_available()?;
        Ok(self.departments.read().await.get(&id).cloned())
    }

    async fn list_departments(&self) -> StoreResult<Vec<Department>> {
        self.check_available()?;
        Ok(self.departments.read().await.values().cloned().collect())
    }

    async fn insert_department(&self, department: Department) -> StoreResult<Department> {
        self.check_available()?;
        let mut departments = self.departments.write().await;
        if departments.contains_key(&department.id) {
            return Err(StoreError::Duplicate {
                entity: "department",
                id: department.id,
            });
        }
        departments.insert(department.id, department.clone());
        Ok(department)
    }

    async fn update_department(
        &self,
        mut department: Department,
        expected_version: u64,
    ) -> StoreResult<Department> {
        self.check_available()?;
        let mut departments = self.departments.write().await;
        let stored = departments.get(&department.id).ok_or(StoreError::NotFound {
            entity: "department",
            id: department.id,
        })?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "department",
                id: department.id,
                expected: expected_version,
                actual: stored.version,
            });
        }
        department.version = expected_version;
        department.touch();
        departments.insert(department.id, department.clone());
        Ok(department)
    }
}

#[async_trait]
impl MembershipStore for InMemoryStore {
    async fn get_membership(&self, id: Uuid) -> StoreResult<Option<DepartmentMembership>> {
        self.check_available()?;
        Ok(self.memberships.read().await.get(&id).cloned())
    }

    async fn memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<DepartmentMembership>> {
        self.check_available()?;
        let mut memberships: Vec<DepartmentMembership> = self
            .memberships
            .read()
            .await
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        memberships.sort_by_key(|m| m.id);
        Ok(memberships)
    }

    async fn memberships_in_department(
        &self,
        department_id: Uuid,
    ) -> StoreResult<Vec<DepartmentMembership>> {
        self.check_available()?;
        let mut memberships: Vec<DepartmentMembership> = self
            .memberships
            .read()
            .await
            .values()
            .filter(|m| m.department_id == department_id)
            .cloned()
            .collect();
        memberships.sort_by_key(|m| m.id);
        Ok(memberships)
    }

    async fn write_memberships(&self, batch: MembershipBatch) -> StoreResult<Vec<DepartmentMembership>> {
        self.check_available()?;
        let mut memberships = self.memberships.write().await;

        // Stage every write against the current map before touching it
        let mut staged: HashMap<Uuid, DepartmentMembership> = HashMap::new();
        let mut order = Vec::with_capacity(batch.writes.len());
        for write in batch.writes {
            match write {
                MembershipWrite::Insert(membership) => {
                    if memberships.contains_key(&membership.id) || staged.contains_key(&membership.id) {
                        return Err(StoreError::Duplicate {
                            entity: "membership",
                            id: membership.id,
                        });
                    }
                    order.push(membership.id);
                    staged.insert(membership.id, membership);
                }
                MembershipWrite::Update {
                    mut membership,
                    expected_version,
                } => {
                    let current = staged
                        .get(&membership.id)
                        .or_else(|| memberships.get(&membership.id))
                        .ok_or(StoreError::NotFound {
                            entity: "membership",
                            id: membership.id,
                        })?;
                    if current.version != expected_version {
                        return Err(StoreError::VersionConflict {
                            entity: "membership",
                            id: membership.id,
                            expected: expected_version,
                            actual: current.version,
                        });
                    }
                    membership.version = expected_version;
                    membership.touch();
                    order.push(membership.id);
                    staged.insert(membership.id, membership);
                }
            }
        }

        for guard in &batch.guards {
            let held = memberships
                .values()
                .filter(|m| !staged.contains_key(&m.id))
                .chain(staged.values())
                .any(|m| {
                    m.department_id == guard.department_id
                        && m.is_effective_now()
                        && m.has_role(&guard.role)
                });
            if !held {
                return Err(StoreError::LastRoleHolder {
                    department_id: guard.department_id,
                    role: guard.role.clone(),
                });
            }
        }

        let stored = order.iter().filter_map(|id| staged.get(id).cloned()).collect();
        memberships.extend(staged);
        Ok(stored)
    }
}

#[async_trait]
impl RoleStore for InMemoryStore {
    async fn list_roles(&self) -> StoreResult<Vec<RoleDefinition>> {
        self.check_available()?;
        Ok(self.roles.read().await.values().cloned().collect())
    }

    async fn upsert_role(&self, role: RoleDefinition) -> StoreResult<RoleDefinition> {
        self.check_available()?;
        self.roles.write().await.insert(role.name.clone(), role.clone());
        Ok(role)
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserRecord>> {
        self.check_available()?;
        Ok(self.users.read().await.get(&id).cloned())
    }
}
