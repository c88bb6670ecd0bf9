//! End-to-end tests for the access core.
//!
//! Every test drives [`AccessControl`] through its public operations against
//! the in-memory store, the in-process cache store, a memory audit sink and a
//! fake identity verifier.
//!
//! Covered:
//! 1. Role cascading, explicit-membership boundaries, direct override
//! 2. Right resolution and the authorize pipeline
//! 3. Escalation, two-credential enforcement, revocation
//! 4. Membership mutations, last-admin guard, cache freshness
//! 5. Degraded infrastructure

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use lms_access::{
    AccessConfig, AccessControl, AuthSubject, AuthorizeOptions, Collaborators, DecisionReason,
    ErrorKind, InMemoryStore, MemoryCacheStore, ResourceRef, RoleAssignment,
};
use lms_auth::{
    AuthError, AuthResult, EscalationState, IdentityVerifier, MemoryCredentialStore, Principal,
};
use lms_events::{AuditEventKind, MemoryAuditSink};
use lms_org::{Department, UserCategory, UserRecord};
use lms_rbac::{RoleDefinition, CONTENT_ADMIN, DEPARTMENT_ADMIN, INSTRUCTOR, SYSTEM_ADMIN};
use tokio::sync::RwLock;
use uuid::Uuid;

const SECRET: &str = "test-secret-key-for-admin-tokens-minimum-32-chars";
const ESCALATION_PASSWORD: &str = "second-factor-passphrase";

/// Identity verifier that accepts tokens registered by the fixture.
#[derive(Default)]
struct FakeIdentity {
    tokens: RwLock<HashMap<String, Uuid>>,
}

#[async_trait]
impl IdentityVerifier for FakeIdentity {
    async fn verify_identity(&self, token: &str) -> AuthResult<Principal> {
        self.tokens
            .read()
            .await
            .get(token)
            .map(|user_id| Principal::new(*user_id))
            .ok_or_else(|| AuthError::InvalidToken("unknown identity token".to_string()))
    }
}

/// Test fixture wiring the access core to in-memory collaborators.
struct TestFixture {
    /// Persisted data.
    store: InMemoryStore,
    /// Cache store.
    cache_store: MemoryCacheStore,
    /// Audit trail.
    audit: Arc<MemoryAuditSink>,
    /// Escalation credentials.
    credentials: MemoryCredentialStore,
    /// Identity tokens.
    identity: Arc<FakeIdentity>,
    /// Master department.
    master: Department,
    /// Acting administrator for writes.
    actor: Uuid,
    /// System under test.
    access: AccessControl,
}

impl TestFixture {
    /// Create a fixture with the built-in roles and a master department.
    async fn new() -> Self {
        let store = InMemoryStore::with_builtin_roles();
        let cache_store = MemoryCacheStore::new();
        let audit = Arc::new(MemoryAuditSink::new());
        let credentials = MemoryCredentialStore::new();
        let identity = Arc::new(FakeIdentity::default());

        let master = Department::new("Platform Administration", "MASTER");
        let config = AccessConfig::new(master.id, SECRET);
        let collaborators = Collaborators::new(
            Arc::new(store.clone()),
            Arc::new(credentials.clone()),
            identity.clone(),
        )
        .with_cache_store(Arc::new(cache_store.clone()))
        .with_audit(audit.clone());
        let access = AccessControl::new(config, collaborators).unwrap();

        let actor = Uuid::now_v7();
        let master = access.create_department(actor, master).await.unwrap();

        Self {
            store,
            cache_store,
            audit,
            credentials,
            identity,
            master,
            actor,
            access,
        }
    }

    /// Register a user and return their ID.
    async fn user(&self, categories: &[UserCategory]) -> Uuid {
        let id = Uuid::now_v7();
        self.store
            .put_user(UserRecord::new(id, categories.iter().copied()))
            .await;
        id
    }

    /// Register a global admin holding `system-admin` in the master department.
    async fn global_admin(&self) -> Uuid {
        let id = self.user(&[UserCategory::Staff, UserCategory::GlobalAdmin]).await;
        self.credentials
            .set_password(id, ESCALATION_PASSWORD)
            .await
            .unwrap();
        self.grant(id, self.master.id, SYSTEM_ADMIN).await;
        id
    }

    /// Issue an identity token for a user.
    async fn identity_token(&self, user_id: Uuid) -> String {
        let token = format!("identity-{}", user_id);
        self.identity
            .tokens
            .write()
            .await
            .insert(token.clone(), user_id);
        token
    }

    /// Create a department.
    async fn department(&self, code: &str, parent: Option<&Department>, explicit: bool) -> Department {
        let mut department = Department::new(format!("Department {}", code), code);
        if let Some(parent) = parent {
            department = department.with_parent(parent.id);
        }
        if explicit {
            department = department.with_explicit_membership();
        }
        self.access.create_department(self.actor, department).await.unwrap()
    }

    /// Grant a role.
    async fn grant(&self, user_id: Uuid, department_id: Uuid, role: &str) -> lms_org::DepartmentMembership {
        self.access
            .assign_role(self.actor, RoleAssignment::new(user_id, department_id, role))
            .await
            .unwrap()
    }

    /// Staff roles of a user in a department.
    async fn staff_roles(&self, user_id: Uuid, department_id: Uuid) -> Vec<String> {
        self.access
            .resolve_roles(user_id, department_id, UserCategory::Staff)
            .await
            .unwrap()
    }
}

// =============================================================================
// Role cascading
// =============================================================================

/// A direct membership in the parent cascades into a child without one.
#[tokio::test]
async fn test_roles_cascade_from_parent() {
    let fixture = TestFixture::new().await;
    let root = fixture.department("ROOT", None, false).await;
    let child = fixture.department("CHILD", Some(&root), false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, root.id, INSTRUCTOR).await;

    assert_eq!(fixture.staff_roles(staff, child.id).await, vec![INSTRUCTOR]);
}

/// A parent requiring explicit membership hands nothing down.
#[tokio::test]
async fn test_parent_flag_blocks_cascade() {
    let fixture = TestFixture::new().await;
    let root = fixture.department("ROOT", None, true).await;
    let child = fixture.department("CHILD", Some(&root), false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, root.id, DEPARTMENT_ADMIN).await;

    assert!(fixture.staff_roles(staff, child.id).await.is_empty());
    assert_eq!(fixture.staff_roles(staff, root.id).await, vec![DEPARTMENT_ADMIN]);
}

/// A child requiring explicit membership refuses inherited roles.
#[tokio::test]
async fn test_child_flag_blocks_cascade() {
    let fixture = TestFixture::new().await;
    let root = fixture.department("ROOT", None, false).await;
    let child = fixture.department("CHILD", Some(&root), true).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, root.id, INSTRUCTOR).await;

    assert!(fixture.staff_roles(staff, child.id).await.is_empty());
}

/// A direct membership replaces what would cascade.
#[tokio::test]
async fn test_direct_membership_overrides_cascade() {
    let fixture = TestFixture::new().await;
    let root = fixture.department("ROOT", None, false).await;
    let child = fixture.department("CHILD", Some(&root), false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, root.id, INSTRUCTOR).await;
    fixture.grant(staff, child.id, CONTENT_ADMIN).await;

    assert_eq!(fixture.staff_roles(staff, child.id).await, vec![CONTENT_ADMIN]);
    assert_eq!(fixture.staff_roles(staff, root.id).await, vec![INSTRUCTOR]);
}

/// Absent data resolves to no roles rather than an error.
#[tokio::test]
async fn test_missing_records_resolve_empty() {
    let fixture = TestFixture::new().await;
    let root = fixture.department("ROOT", None, false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, root.id, INSTRUCTOR).await;

    assert!(fixture.staff_roles(Uuid::now_v7(), root.id).await.is_empty());
    assert!(fixture.staff_roles(staff, Uuid::now_v7()).await.is_empty());
    // Wrong category
    assert!(fixture
        .access
        .resolve_roles(staff, root.id, UserCategory::Learner)
        .await
        .unwrap()
        .is_empty());

    // Deactivated user
    let mut record = UserRecord::new(staff, [UserCategory::Staff]);
    record.is_active = false;
    fixture.store.put_user(record).await;
    fixture.access.invalidate_user(staff).await;
    assert!(fixture.staff_roles(staff, root.id).await.is_empty());
}

/// Visible departments are stable between reads and include inherited children.
#[tokio::test]
async fn test_visible_departments_idempotent() {
    let fixture = TestFixture::new().await;
    let root = fixture.department("ROOT", None, false).await;
    let open = fixture.department("ROOT-OPEN", Some(&root), false).await;
    let closed = fixture.department("ROOT-CLOSED", Some(&root), true).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, root.id, INSTRUCTOR).await;

    let first = fixture
        .access
        .resolve_visible_departments(staff, UserCategory::Staff)
        .await
        .unwrap();
    let second = fixture
        .access
        .resolve_visible_departments(staff, UserCategory::Staff)
        .await
        .unwrap();
    assert_eq!(first, second);

    let ids: BTreeSet<Uuid> = first.iter().map(|v| v.department.id).collect();
    assert_eq!(ids, BTreeSet::from([root.id, open.id]));
    assert!(!ids.contains(&closed.id));

    let inherited = first.iter().find(|v| v.department.id == open.id).unwrap();
    assert!(inherited.inherited);
    assert_eq!(inherited.roles, vec![INSTRUCTOR]);
    assert_eq!(inherited.parent_id, Some(root.id));
}

/// Memberships across categories are listed together.
#[tokio::test]
async fn test_all_memberships_aggregated() {
    let fixture = TestFixture::new().await;
    let root = fixture.department("ROOT", None, false).await;
    let admin = fixture.global_admin().await;
    fixture.grant(admin, root.id, INSTRUCTOR).await;

    let summaries = fixture.access.resolve_all_memberships(admin).await.unwrap();
    let categories: Vec<UserCategory> = summaries.iter().map(|s| s.category).collect();
    assert_eq!(categories, vec![UserCategory::Staff, UserCategory::GlobalAdmin]);
    assert_eq!(summaries[1].department.id, fixture.master.id);
}

/// Top-level membership follows the scope roots of the tree.
#[tokio::test]
async fn test_top_level_membership_and_descendants() {
    let fixture = TestFixture::new().await;
    let root = fixture.department("ROOT", None, false).await;
    let child = fixture.department("CHILD", Some(&root), false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, root.id, INSTRUCTOR).await;
    fixture.grant(staff, child.id, INSTRUCTOR).await;

    assert!(fixture.access.is_top_level_member(staff, root.id).await.unwrap());
    assert!(!fixture.access.is_top_level_member(staff, child.id).await.unwrap());
    assert_eq!(
        fixture.access.descendants_of(root.id).await.unwrap(),
        vec![root.id, child.id]
    );
}

/// Reparenting changes what cascades.
#[tokio::test]
async fn test_reparent_changes_cascade() {
    let fixture = TestFixture::new().await;
    let left = fixture.department("LEFT", None, false).await;
    let right = fixture.department("RIGHT", None, false).await;
    let leaf = fixture.department("LEAF", Some(&left), false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, left.id, INSTRUCTOR).await;

    let rights = fixture.access.department_rights(staff, leaf.id).await.unwrap();
    assert!(rights.has_str("content:courses:update"));

    fixture
        .access
        .set_department_parent(fixture.actor, leaf.id, Some(right.id), leaf.version)
        .await
        .unwrap();

    assert!(fixture.staff_roles(staff, leaf.id).await.is_empty());
    let rights = fixture.access.department_rights(staff, leaf.id).await.unwrap();
    assert!(rights.is_empty());

    let cycle = fixture
        .access
        .set_department_parent(fixture.actor, right.id, Some(leaf.id), right.version)
        .await
        .unwrap_err();
    assert_eq!(cycle.kind(), ErrorKind::Conflict);
}

// =============================================================================
// Rights and authorization
// =============================================================================

/// `system-admin` maps to `*`, which authorizes any right.
#[tokio::test]
async fn test_system_admin_wildcard() {
    let fixture = TestFixture::new().await;
    let rights = fixture
        .access
        .resolve_access_rights(&[SYSTEM_ADMIN])
        .await
        .unwrap();
    assert!(rights.is_unrestricted());

    let admin = fixture.global_admin().await;
    let identity = fixture.identity_token(admin).await;
    let grant = fixture
        .access
        .escalate(admin, ESCALATION_PASSWORD)
        .await
        .unwrap();
    let subject = fixture
        .access
        .authenticate(&identity, Some(&grant.admin_token))
        .await
        .unwrap();
    assert!(subject.is_escalated());

    for required in [
        "content:courses:manage",
        "org:departments:delete",
        "billing:invoices:refund:own",
        "reports",
        "system:settings",
        "a:b:c:d:e",
    ] {
        let decision = fixture
            .access
            .authorize(&subject, required, &AuthorizeOptions::new())
            .await
            .unwrap();
        assert!(decision.allowed, "{} should be allowed", required);
        assert_eq!(decision.reason, DecisionReason::GlobalRight);
    }

    // Rights outside the right grammar pass the admin gate as well
    for required in ["reports", "system:settings"] {
        assert!(fixture
            .access
            .authorize_admin(&identity, &grant.admin_token, required)
            .await
            .is_ok());
    }
}

/// Only a validated admin session yields global rights.
#[tokio::test]
async fn test_global_rights_require_escalation() {
    let fixture = TestFixture::new().await;
    let dept = fixture.department("DEPT", None, false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, dept.id, DEPARTMENT_ADMIN).await;
    let identity = fixture.identity_token(staff).await;

    let subject = fixture.access.authenticate(&identity, None).await.unwrap();
    assert!(!subject.is_escalated());
    assert!(subject.admin_rights().is_none());

    let decision = fixture
        .access
        .authorize(&subject, "org:departments:delete", &AuthorizeOptions::new())
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, DecisionReason::NoMatchingRight);

    // A made-up admin token is refused rather than ignored
    let err = fixture
        .access
        .authenticate(&identity, Some("forged.admin.token"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

/// A scoped check matches exactly what the department's roles resolve to.
#[tokio::test]
async fn test_scope_check_matches_resolved_rights() {
    let fixture = TestFixture::new().await;
    let dept = fixture.department("DEPT", None, false).await;
    let instructor = fixture.user(&[UserCategory::Staff]).await;
    let content_admin = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(instructor, dept.id, INSTRUCTOR).await;
    fixture.grant(content_admin, dept.id, CONTENT_ADMIN).await;

    let required = "content:courses:manage";
    let options = AuthorizeOptions::new().with_scope(dept.id);

    for user in [instructor, content_admin] {
        let roles = fixture.staff_roles(user, dept.id).await;
        let expected = fixture
            .access
            .resolve_access_rights(roles.as_slice())
            .await
            .unwrap()
            .has_str(required);
        let decision = fixture
            .access
            .authorize(&AuthSubject::user(user), required, &options)
            .await
            .unwrap();
        assert_eq!(decision.allowed, expected);
    }

    let denied = fixture
        .access
        .authorize(&AuthSubject::user(instructor), required, &options)
        .await
        .unwrap();
    assert_eq!(denied.reason, DecisionReason::NoMatchingRight);

    let allowed = fixture
        .access
        .authorize(&AuthSubject::user(content_admin), required, &options)
        .await
        .unwrap();
    assert_eq!(allowed.reason, DecisionReason::ScopeRight);
}

/// Resource department, ownership fallback and malformed rights.
#[tokio::test]
async fn test_resource_and_ownership_checks() {
    let fixture = TestFixture::new().await;
    let root = fixture.department("ROOT", None, false).await;
    let child = fixture.department("CHILD", Some(&root), false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, root.id, INSTRUCTOR).await;
    let subject = AuthSubject::user(staff);

    // Cascaded through the resource's department
    let decision = fixture
        .access
        .authorize(
            &subject,
            "content:courses:update",
            &AuthorizeOptions::new().with_resource(ResourceRef::in_department(child.id)),
        )
        .await
        .unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.reason, DecisionReason::ResourceRight);

    // Instructors may only delete courses they created
    let own = AuthorizeOptions::new()
        .with_resource(ResourceRef::in_department(child.id).created_by(staff));
    let decision = fixture
        .access
        .authorize(&subject, "content:courses:delete", &own)
        .await
        .unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.reason, DecisionReason::OwnershipRight);

    let foreign = AuthorizeOptions::new()
        .with_resource(ResourceRef::in_department(child.id).created_by(Uuid::now_v7()));
    let decision = fixture
        .access
        .authorize(&subject, "content:courses:delete", &foreign)
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, DecisionReason::NoMatchingRight);

    let decision = fixture
        .access
        .authorize(&subject, "Content::courses", &own)
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, DecisionReason::InvalidRight);

    // No scope, no resource, no admin session
    let decision = fixture
        .access
        .authorize(&subject, "content:courses:read", &AuthorizeOptions::new())
        .await
        .unwrap();
    assert!(!decision.allowed);
}

// =============================================================================
// Escalation
// =============================================================================

/// Users outside the global-admin category cannot escalate.
#[tokio::test]
async fn test_escalation_requires_global_admin() {
    let fixture = TestFixture::new().await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture
        .credentials
        .set_password(staff, ESCALATION_PASSWORD)
        .await
        .unwrap();

    let err = fixture
        .access
        .escalate(staff, ESCALATION_PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(fixture.access.escalation_status(staff).await, EscalationState::None);

    let denied = fixture.audit.events_of_kind(AuditEventKind::EscalationDenied).await;
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].subject_user_id, Some(staff));
}

/// A wrong password fails every time and never creates a session.
#[tokio::test]
async fn test_wrong_escalation_password_twice() {
    let fixture = TestFixture::new().await;
    let admin = fixture.global_admin().await;

    for _ in 0..2 {
        let err = fixture.access.escalate(admin, "wrong-password").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.error_code(), "INVALID_ESCALATION_PASSWORD");
        assert_eq!(fixture.access.escalation_status(admin).await, EscalationState::None);
    }

    let failed = fixture.audit.events_of_kind(AuditEventKind::EscalationFailed).await;
    assert_eq!(failed.len(), 2);
    assert!(fixture
        .audit
        .events_of_kind(AuditEventKind::EscalationGranted)
        .await
        .is_empty());
}

/// A global admin without a master-department membership gets no session.
#[tokio::test]
async fn test_escalation_without_master_membership() {
    let fixture = TestFixture::new().await;
    let admin = fixture.user(&[UserCategory::GlobalAdmin]).await;
    fixture
        .credentials
        .set_password(admin, ESCALATION_PASSWORD)
        .await
        .unwrap();

    let err = fixture
        .access
        .escalate(admin, ESCALATION_PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(fixture.access.escalation_status(admin).await, EscalationState::None);
}

/// Admin-tier calls need both tokens; deescalation revokes the admin token.
#[tokio::test]
async fn test_escalation_lifecycle() {
    let fixture = TestFixture::new().await;
    let admin = fixture.global_admin().await;
    let identity = fixture.identity_token(admin).await;

    let grant = fixture
        .access
        .escalate(admin, ESCALATION_PASSWORD)
        .await
        .unwrap();
    assert_eq!(grant.roles, vec![SYSTEM_ADMIN]);
    assert!(grant.access_rights.is_unrestricted());
    assert!(grant.expires_in > 0 && grant.expires_in <= 900);
    assert_eq!(fixture.access.escalation_status(admin).await, EscalationState::Active);

    let context = fixture
        .access
        .authorize_admin(&identity, &grant.admin_token, "org:departments:delete")
        .await
        .unwrap();
    assert_eq!(context.session.id, grant.session_id);

    // The admin token alone is not enough
    let err = fixture
        .access
        .require_admin("not-an-identity-token", &grant.admin_token)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    // Another user's identity token does not pair with this admin token
    let other = fixture.user(&[UserCategory::Staff]).await;
    let other_identity = fixture.identity_token(other).await;
    let err = fixture
        .access
        .require_admin(&other_identity, &grant.admin_token)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "SUBJECT_MISMATCH");

    // Snapshot rights flow into ordinary authorization
    let subject = fixture
        .access
        .authenticate(&identity, Some(&grant.admin_token))
        .await
        .unwrap();
    let decision = fixture
        .access
        .authorize(&subject, "content:courses:manage", &AuthorizeOptions::new())
        .await
        .unwrap();
    assert_eq!(decision.reason, DecisionReason::GlobalRight);

    fixture.access.deescalate(admin, admin).await.unwrap();
    let err = fixture
        .access
        .require_admin(&identity, &grant.admin_token)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(fixture.access.escalation_status(admin).await, EscalationState::Revoked);

    // Idempotent
    fixture.access.deescalate(admin, admin).await.unwrap();
    assert_eq!(
        fixture
            .audit
            .events_of_kind(AuditEventKind::Deescalated)
            .await
            .len(),
        2
    );
}

/// Under the single-session policy a new escalation revokes the previous token.
#[tokio::test]
async fn test_new_escalation_replaces_previous_session() {
    let fixture = TestFixture::new().await;
    let admin = fixture.global_admin().await;
    let identity = fixture.identity_token(admin).await;

    let first = fixture.access.escalate(admin, ESCALATION_PASSWORD).await.unwrap();
    let second = fixture.access.escalate(admin, ESCALATION_PASSWORD).await.unwrap();

    let err = fixture
        .access
        .require_admin(&identity, &first.admin_token)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "SESSION_REVOKED");
    assert!(fixture
        .access
        .require_admin(&identity, &second.admin_token)
        .await
        .is_ok());
}

/// Role changes during a session do not alter its snapshot.
#[tokio::test]
async fn test_session_snapshot_is_not_rederived() {
    let fixture = TestFixture::new().await;
    let admin = fixture.global_admin().await;
    let identity = fixture.identity_token(admin).await;
    let grant = fixture.access.escalate(admin, ESCALATION_PASSWORD).await.unwrap();

    let membership = fixture
        .access
        .resolve_all_memberships(admin)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.category == UserCategory::GlobalAdmin)
        .unwrap();
    let stored = fixture
        .access
        .update_roles(
            fixture.actor,
            membership.membership_id,
            vec!["support-admin".to_string()],
            1,
        )
        .await
        .unwrap();
    assert!(stored.has_role("support-admin"));

    let context = fixture
        .access
        .authorize_admin(&identity, &grant.admin_token, "org:departments:delete")
        .await
        .unwrap();
    assert!(context.access_rights().is_unrestricted());
}

// =============================================================================
// Mutations and cache freshness
// =============================================================================

/// The sole department admin cannot be removed.
#[tokio::test]
async fn test_last_admin_removal_rejected() {
    let fixture = TestFixture::new().await;
    let dept = fixture.department("DEPT", None, false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    let membership = fixture.grant(staff, dept.id, DEPARTMENT_ADMIN).await;

    let err = fixture
        .access
        .remove_role(fixture.actor, staff, membership.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let summaries = fixture.access.resolve_all_memberships(staff).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].roles, vec![DEPARTMENT_ADMIN]);
    assert!(fixture
        .audit
        .events_of_kind(AuditEventKind::RoleRemoved)
        .await
        .is_empty());
}

/// A role mutation is visible to the next cached read.
#[tokio::test]
async fn test_role_mutation_refreshes_cached_rights() {
    let fixture = TestFixture::new().await;
    let dept = fixture.department("DEPT", None, false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    let membership = fixture.grant(staff, dept.id, INSTRUCTOR).await;

    let before = fixture.access.department_rights(staff, dept.id).await.unwrap();
    assert!(!before.has_str("content:courses:manage"));
    // Second read is served from cache
    fixture.access.department_rights(staff, dept.id).await.unwrap();
    assert!(fixture.access.cache_stats().await.hits >= 1);

    fixture
        .access
        .update_roles(
            fixture.actor,
            membership.id,
            vec![CONTENT_ADMIN.to_string()],
            membership.version,
        )
        .await
        .unwrap();

    let after = fixture.access.department_rights(staff, dept.id).await.unwrap();
    assert!(after.has_str("content:courses:manage"));
    assert!(!after.has_str("learning:progress:read"));
}

/// Editing a role definition reaches holders whose grants are cached.
#[tokio::test]
async fn test_role_definition_change_refreshes_cached_decisions() {
    let fixture = TestFixture::new().await;
    let dept = fixture.department("DEPT", None, false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, dept.id, INSTRUCTOR).await;
    let subject = AuthSubject::user(staff);
    let options = AuthorizeOptions::new().with_scope(dept.id);

    for _ in 0..2 {
        let decision = fixture
            .access
            .authorize(&subject, "content:courses:update", &options)
            .await
            .unwrap();
        assert!(decision.allowed);
    }
    assert!(fixture.access.cache_stats().await.hits >= 1);

    let narrowed = RoleDefinition::new(INSTRUCTOR, UserCategory::Staff, &["content:courses:read"]).unwrap();
    fixture
        .access
        .upsert_role(fixture.actor, narrowed.clone())
        .await
        .unwrap();
    let decision = fixture
        .access
        .authorize(&subject, "content:courses:update", &options)
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, DecisionReason::NoMatchingRight);

    fixture
        .access
        .upsert_role(fixture.actor, narrowed.inactive())
        .await
        .unwrap();
    let decision = fixture
        .access
        .authorize(&subject, "content:courses:read", &options)
        .await
        .unwrap();
    assert!(!decision.allowed);

    assert_eq!(
        fixture
            .audit
            .events_of_kind(AuditEventKind::RoleDefined)
            .await
            .len(),
        2
    );
}

/// Concurrent writers holding the same version: exactly one wins.
#[tokio::test]
async fn test_concurrent_updates_conflict() {
    let fixture = TestFixture::new().await;
    let dept = fixture.department("DEPT", None, false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    let membership = fixture.grant(staff, dept.id, INSTRUCTOR).await;

    let first = fixture
        .access
        .update_roles(fixture.actor, membership.id, vec![CONTENT_ADMIN.to_string()], membership.version)
        .await;
    let second = fixture
        .access
        .update_roles(fixture.actor, membership.id, vec!["analyst".to_string()], membership.version)
        .await;

    assert!(first.is_ok());
    assert_eq!(second.unwrap_err().error_code(), "VERSION_CONFLICT");
    assert_eq!(fixture.staff_roles(staff, dept.id).await, vec![CONTENT_ADMIN]);
}

// =============================================================================
// Degraded infrastructure
// =============================================================================

/// Cache outages fall back to direct resolution and never block writes.
#[tokio::test]
async fn test_cache_outage_degrades_to_direct_resolution() {
    let fixture = TestFixture::new().await;
    let dept = fixture.department("DEPT", None, false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, dept.id, CONTENT_ADMIN).await;

    fixture.cache_store.set_unavailable(true);

    let decision = fixture
        .access
        .authorize(
            &AuthSubject::user(staff),
            "content:courses:manage",
            &AuthorizeOptions::new().with_scope(dept.id),
        )
        .await
        .unwrap();
    assert!(decision.allowed);

    let membership = fixture.grant(staff, dept.id, INSTRUCTOR).await;
    assert!(membership.has_role(INSTRUCTOR));
    assert!(fixture.access.cache_stats().await.fallbacks >= 1);
}

/// Store outages surface as internal errors, never as an allow.
#[tokio::test]
async fn test_store_outage_is_internal_error() {
    let fixture = TestFixture::new().await;
    let dept = fixture.department("DEPT", None, false).await;
    let staff = fixture.user(&[UserCategory::Staff]).await;
    fixture.grant(staff, dept.id, CONTENT_ADMIN).await;

    fixture.store.set_unavailable(true);
    fixture.access.invalidate_user(staff).await;

    let err = fixture
        .access
        .authorize(
            &AuthSubject::user(staff),
            "content:courses:manage",
            &AuthorizeOptions::new().with_scope(dept.id),
        )
        .await
        .unwrap_err();
    assert!(err.is_server_error());
    assert_eq!(err.status_code(), 500);
}
