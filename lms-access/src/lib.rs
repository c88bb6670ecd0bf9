//! # LMS Access
//!
//! This crate is the department-scoped access core of the LMS: it decides
//! which roles a user holds in a department, what those roles allow, and
//! when a global admin may act with elevated rights.
//!
//! ## Overview
//!
//! The lms-access crate handles:
//! - **Role Resolution**: Direct memberships, upward cascading, explicit-membership boundaries
//! - **Authorization**: Global, scope, resource and ownership checks with reason codes
//! - **Hierarchy**: Cached department snapshots, cycle-safe department writes
//! - **Membership Admin**: Grants, removals, replacements and role definitions with the last-admin guard
//! - **Permission Cache**: Versioned per-user grants with torn-read protection
//! - **Escalation**: Admin sessions issued against a second credential
//!
//! ## Architecture
//!
//! ```text
//!                        ┌─────────────────┐
//!  identity token ──────→│  AccessControl  │←────── admin token
//!                        └────────┬────────┘
//!          ┌──────────────┬───────┴───────┬──────────────────┐
//!          ▼              ▼               ▼                  ▼
//!  AccessRightResolver  RoleResolver  MembershipAdmin  AdminSessionManager
//!          │              │               │
//!          ▼              ▼               ▼
//!   PermissionCache  HierarchyService  AuditSink
//!          │              │
//!          └──── CacheStore / AccessStore
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lms_access::{AccessConfig, AccessControl, Collaborators, InMemoryStore};
//! use lms_auth::{IdentityVerifier, MemoryCredentialStore};
//! use lms_org::UserCategory;
//! use uuid::Uuid;
//!
//! async fn example(identity: Arc<dyn IdentityVerifier>) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AccessConfig::from_env()?;
//!     let access = AccessControl::new(
//!         config,
//!         Collaborators::new(
//!             Arc::new(InMemoryStore::with_builtin_roles()),
//!             Arc::new(MemoryCredentialStore::new()),
//!             identity,
//!         ),
//!     )?;
//!
//!     let roles = access
//!         .resolve_roles(Uuid::now_v7(), Uuid::now_v7(), UserCategory::Staff)
//!         .await?;
//!     assert!(roles.is_empty());
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Semantics
//!
//! Missing users, departments and memberships resolve to no roles. Store
//! failures surface as internal errors. Cache failures fall back to direct
//! resolution and never block a mutation.

pub mod admin;
mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod memory;
pub mod resolver;
pub mod rights;
pub mod service;
pub mod store;

// Re-export main types for convenience
pub use admin::{MembershipAdmin, RoleAssignment};
pub use cache::{
    CacheError, CacheResult, CacheSlot, CacheStore, MemoryCacheStore, MutationTicket,
    PermissionCache, PermissionCacheEntry, PermissionCacheStats, RoleGrant,
};
pub use config::{AccessConfig, AdminTokenSettings, ConfigError, EscalationSettings};
pub use error::{AccessError, AccessResult, ErrorKind};
pub use hierarchy::HierarchyService;
pub use memory::InMemoryStore;
pub use resolver::{ResolvedRoles, RoleResolver, VisibleDepartment};
pub use rights::{
    AccessRightResolver, AuthSubject, AuthorizationDecision, AuthorizeOptions, DecisionReason,
    ResourceRef,
};
pub use service::{AccessControl, AdminContext, Collaborators, EscalationGrant};
pub use store::{
    AccessStore, DepartmentStore, MembershipBatch, MembershipStore, MembershipWrite,
    RoleHolderGuard, RoleStore, StoreError, StoreResult, UserDirectory,
};

#[cfg(feature = "redis")]
pub use cache::RedisCacheStore;
