//! Department hierarchy service
//!
//! Serves [`DepartmentTree`] snapshots from the cache store (structural TTL)
//! and owns the department write path. Every write validates the forest
//! invariant against fresh store data before anything is persisted, then
//! drops the cached snapshot and bumps the permission-cache epoch.
//!
//! Snapshots are tagged with the epoch read before the tree was loaded. A
//! snapshot whose tag differs from the current epoch is never served, so a
//! reader that loaded before a write cannot republish the old tree.

use std::sync::Arc;
use std::time::Duration;

use lms_events::{AuditEvent, AuditEventKind, AuditSink};
use lms_org::{Department, DepartmentTree, UserCategory};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::audit;
use crate::cache::{PermissionCache, KEY_PREFIX};
use crate::error::{AccessError, AccessResult};
use crate::store::{AccessStore, StoreError};

/// Cached tree plus the epoch it was loaded under.
#[derive(Debug, Serialize, Deserialize)]
struct HierarchySnapshot {
    epoch: u64,
    tree: DepartmentTree,
}

/// Department hierarchy reads and writes.
#[derive(Clone)]
pub struct HierarchyService {
    store: Arc<dyn AccessStore>,
    cache: PermissionCache,
    audit: Arc<dyn AuditSink>,
    ttl: Duration,
}

impl std::fmt::Debug for HierarchyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchyService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl HierarchyService {
    /// Create a hierarchy service.
    ///
    /// # Arguments
    ///
    /// * `store` - Persisted departments and memberships
    /// * `cache` - Permission cache (its store also holds the tree snapshot)
    /// * `audit` - Sink for department write events
    /// * `ttl` - Lifetime of the cached tree snapshot
    pub fn new(
        store: Arc<dyn AccessStore>,
        cache: PermissionCache,
        audit: Arc<dyn AuditSink>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            audit,
            ttl,
        }
    }

    /// Current tree snapshot.
    ///
    /// Served from the cache store when possible; cache failures fall back
    /// to the persisted store.
    pub async fn tree(&self) -> AccessResult<DepartmentTree> {
        let key = tree_key();
        let cache = self.cache.store();

        let epoch = match self.cache.epoch().await {
            Ok(epoch) => epoch,
            Err(e) => {
                warn!(error = %e, "Hierarchy cache unavailable, loading from store");
                return self.load_tree().await;
            }
        };

        match cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<HierarchySnapshot>(&raw) {
                Ok(snapshot) if snapshot.epoch == epoch => {
                    let mut tree = snapshot.tree;
                    tree.reindex();
                    debug!(departments = tree.len(), epoch, "Hierarchy snapshot cache hit");
                    return Ok(tree);
                }
                Ok(snapshot) => {
                    debug!(cached_epoch = snapshot.epoch, epoch, "Discarding stale hierarchy snapshot")
                }
                Err(e) => warn!(error = %e, "Discarding undecodable hierarchy snapshot"),
            },
            Ok(None) => debug!("Hierarchy snapshot cache miss"),
            Err(e) => warn!(error = %e, "Hierarchy cache unavailable, loading from store"),
        }

        let tree = self.load_tree().await?;
        match self.cache.epoch().await {
            Ok(current) if current == epoch => {}
            Ok(current) => {
                debug!(epoch, current, "Hierarchy changed while loading, snapshot not cached");
                return Ok(tree);
            }
            Err(e) => {
                warn!(error = %e, "Failed to cache hierarchy snapshot");
                return Ok(tree);
            }
        }

        let snapshot = HierarchySnapshot { epoch, tree };
        match serde_json::to_string(&snapshot) {
            Ok(raw) => {
                if let Err(e) = cache.set(&key, raw, self.ttl).await {
                    warn!(error = %e, "Failed to cache hierarchy snapshot");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode hierarchy snapshot"),
        }
        Ok(snapshot.tree)
    }

    /// Drop the cached snapshot and invalidate every cached grant.
    pub async fn invalidate(&self) {
        if let Err(e) = self.cache.store().delete(&tree_key()).await {
            warn!(error = %e, "Failed to evict hierarchy snapshot");
        }
        self.cache.bump_epoch().await;
    }

    /// Look up a department in the current snapshot.
    pub async fn department(&self, id: Uuid) -> AccessResult<Option<Department>> {
        Ok(self.tree().await?.get(id).cloned())
    }

    /// The department plus every active, visible transitive child.
    pub async fn descendants_of(&self, department_id: Uuid) -> AccessResult<Vec<Uuid>> {
        Ok(self.tree().await?.descendants_of(department_id))
    }

    /// Parent chain, nearest first.
    pub async fn ancestors_of(&self, department_id: Uuid) -> AccessResult<Vec<Uuid>> {
        Ok(self.tree().await?.ancestors_of(department_id))
    }

    /// Whether a user's direct membership in a department makes them a
    /// top-level member there.
    ///
    /// True when the user holds an effective learner or staff membership in
    /// the department and the department is a root of scope (no parent, or
    /// a parent that requires explicit membership).
    pub async fn is_top_level_member(&self, user_id: Uuid, department_id: Uuid) -> AccessResult<bool> {
        let memberships = self.store.memberships_for_user(user_id).await?;
        let is_member = memberships.iter().any(|m| {
            m.department_id == department_id
                && m.category() != UserCategory::GlobalAdmin
                && m.is_effective_now()
        });
        if !is_member {
            return Ok(false);
        }
        Ok(self.tree().await?.is_scope_root(department_id))
    }

    /// Create a department.
    ///
    /// # Errors
    ///
    /// - `Validation` if the name or code is malformed
    /// - `NotFound` if the parent does not exist
    /// - `Conflict` if the code is taken
    #[instrument(skip(self, department), fields(department_id = %department.id, code = %department.code))]
    pub async fn create_department(
        &self,
        actor_id: Uuid,
        department: Department,
    ) -> AccessResult<Department> {
        department.validate()?;

        let existing = self.store.list_departments().await?;
        if existing.iter().any(|d| d.code == department.code) {
            return Err(AccessError::Conflict(format!(
                "Department code {} is already in use",
                department.code
            )));
        }
        let tree = DepartmentTree::new(existing);
        tree.validate_parent(department.id, department.parent_id)?;

        let created = self.store.insert_department(department).await?;
        self.invalidate().await;

        info!(parent_id = ?created.parent_id, "Department created");
        audit::record(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventKind::DepartmentCreated)
                .with_actor(actor_id)
                .with_department(created.id)
                .with_payload(json!({
                    "code": created.code,
                    "name": created.name,
                    "parent_id": created.parent_id,
                    "require_explicit_membership": created.require_explicit_membership,
                })),
        )
        .await;

        Ok(created)
    }

    /// Move a department under a new parent (or make it a root).
    ///
    /// The cycle check and the version check both run before the write.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the department or the new parent does not exist
    /// - `Conflict` on self-parenting, a would-be cycle, or a stale version
    #[instrument(skip(self))]
    pub async fn set_department_parent(
        &self,
        actor_id: Uuid,
        department_id: Uuid,
        parent_id: Option<Uuid>,
        expected_version: u64,
    ) -> AccessResult<Department> {
        let tree = self.load_tree().await?;
        let current = tree
            .get(department_id)
            .cloned()
            .ok_or_else(|| AccessError::NotFound(format!("Department {}", department_id)))?;

        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "department",
                id: department_id,
                expected: expected_version,
                actual: current.version,
            }
            .into());
        }
        tree.validate_parent(department_id, parent_id)?;

        let previous_parent = current.parent_id;
        let mut updated = current;
        updated.parent_id = parent_id;
        let updated = self.store.update_department(updated, expected_version).await?;
        self.invalidate().await;

        info!(previous_parent = ?previous_parent, "Department reparented");
        audit::record(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventKind::DepartmentReparented)
                .with_actor(actor_id)
                .with_department(department_id)
                .with_payload(json!({
                    "previous_parent_id": previous_parent,
                    "parent_id": parent_id,
                    "version": updated.version,
                })),
        )
        .await;

        Ok(updated)
    }

    async fn load_tree(&self) -> AccessResult<DepartmentTree> {
        Ok(DepartmentTree::new(self.store.list_departments().await?))
    }
}

fn tree_key() -> String {
    format!("{}:hierarchy", KEY_PREFIX)
}
