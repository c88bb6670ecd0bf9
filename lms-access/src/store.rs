//! Persistence interfaces
//!
//! The access core reads and writes departments, memberships and role
//! definitions through these traits, and asks a user directory who exists.
//! Writes to existing records carry the version the caller read; a store
//! must refuse the write when the stored version differs.
//!
//! Membership writes that must land together go through
//! [`MembershipStore::write_memberships`]. A store checks every version and
//! every [`RoleHolderGuard`] of a batch under one lock (or one transaction)
//! and writes nothing if any check fails.

use async_trait::async_trait;
use lms_org::{Department, DepartmentMembership, UserRecord};
use lms_rbac::RoleDefinition;
use thiserror::Error;
use uuid::Uuid;

/// Persistence error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record does not exist
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Record ID
        id: Uuid,
    },

    /// Optimistic concurrency check failed
    #[error("{entity} {id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        /// Entity kind
        entity: &'static str,
        /// Record ID
        id: Uuid,
        /// Version the caller read
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// Record already exists
    #[error("{entity} {id} already exists")]
    Duplicate {
        /// Entity kind
        entity: &'static str,
        /// Record ID
        id: Uuid,
    },

    /// A guarded batch would leave a department without a holder of a role
    #[error("department {department_id} would be left without an effective {role}")]
    LastRoleHolder {
        /// Department losing its last holder
        department_id: Uuid,
        /// Guarded role
        role: String,
    },

    /// Store cannot be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// One write inside a [`MembershipBatch`].
#[derive(Debug, Clone)]
pub enum MembershipWrite {
    /// Insert a new membership
    Insert(DepartmentMembership),
    /// Replace a membership whose stored version equals `expected_version`
    Update {
        /// New state
        membership: DepartmentMembership,
        /// Version the caller read
        expected_version: u64,
    },
}

/// Requires a department to keep at least one effective membership holding
/// `role` once a batch is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleHolderGuard {
    /// Department to check
    pub department_id: Uuid,
    /// Role that must keep a holder
    pub role: String,
}

/// Membership writes applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct MembershipBatch {
    /// Writes, in order
    pub writes: Vec<MembershipWrite>,
    /// Checked against the post-batch state
    pub guards: Vec<RoleHolderGuard>,
}

impl MembershipBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an insert.
    pub fn insert(mut self, membership: DepartmentMembership) -> Self {
        self.writes.push(MembershipWrite::Insert(membership));
        self
    }

    /// Add a versioned update.
    pub fn update(mut self, membership: DepartmentMembership, expected_version: u64) -> Self {
        self.writes.push(MembershipWrite::Update {
            membership,
            expected_version,
        });
        self
    }

    /// Require the department to keep an effective holder of `role`.
    pub fn retaining(mut self, department_id: Uuid, role: impl Into<String>) -> Self {
        self.guards.push(RoleHolderGuard {
            department_id,
            role: role.into(),
        });
        self
    }
}

/// Department persistence.
#[async_trait]
pub trait DepartmentStore: Send + Sync {
    /// Get a department by ID.
    async fn get_department(&self, id: Uuid) -> StoreResult<Option<Department>>;

    /// List every department, including inactive and hidden ones.
    async fn list_departments(&self) -> StoreResult<Vec<Department>>;

    /// Insert a new department.
    async fn insert_department(&self, department: Department) -> StoreResult<Department>;

    /// Replace a department if its stored version equals `expected_version`.
    ///
    /// Returns the stored record with its version bumped.
    async fn update_department(
        &self,
        department: Department,
        expected_version: u64,
    ) -> StoreResult<Department>;
}

/// Membership persistence.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Get a membership by ID.
    async fn get_membership(&self, id: Uuid) -> StoreResult<Option<DepartmentMembership>>;

    /// Every membership of a user, in any state and category.
    async fn memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<DepartmentMembership>>;

    /// Every membership in a department, in any state and category.
    async fn memberships_in_department(
        &self,
        department_id: Uuid,
    ) -> StoreResult<Vec<DepartmentMembership>>;

    /// Apply a batch atomically.
    ///
    /// Every version check and guard is evaluated before anything is
    /// written. Returns the stored records in write order, with the
    /// versions of updated records bumped.
    ///
    /// # Errors
    ///
    /// - `Duplicate` if an inserted ID exists
    /// - `NotFound` if an updated record does not exist
    /// - `VersionConflict` if an update's expected version is stale
    /// - `LastRoleHolder` if a guard fails on the post-batch state
    async fn write_memberships(&self, batch: MembershipBatch) -> StoreResult<Vec<DepartmentMembership>>;

    /// Insert a new membership.
    async fn insert_membership(
        &self,
        membership: DepartmentMembership,
    ) -> StoreResult<DepartmentMembership> {
        single(self.write_memberships(MembershipBatch::new().insert(membership)).await?)
    }

    /// Replace a membership if its stored version equals `expected_version`.
    ///
    /// Returns the stored record with its version bumped.
    async fn update_membership(
        &self,
        membership: DepartmentMembership,
        expected_version: u64,
    ) -> StoreResult<DepartmentMembership> {
        single(
            self.write_memberships(MembershipBatch::new().update(membership, expected_version))
                .await?,
        )
    }
}

fn single(mut stored: Vec<DepartmentMembership>) -> StoreResult<DepartmentMembership> {
    stored
        .pop()
        .ok_or_else(|| StoreError::Backend("membership batch returned no records".to_string()))
}

/// Role definition persistence.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Every role definition, active or not.
    async fn list_roles(&self) -> StoreResult<Vec<RoleDefinition>>;

    /// Insert or replace a role definition.
    async fn upsert_role(&self, role: RoleDefinition) -> StoreResult<RoleDefinition>;
}

/// Identity-store view of users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Get a user by ID.
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserRecord>>;
}

/// Everything the access core persists or reads.
pub trait AccessStore: DepartmentStore + MembershipStore + RoleStore + UserDirectory {}

impl<T> AccessStore for T where T: DepartmentStore + MembershipStore + RoleStore + UserDirectory {}
