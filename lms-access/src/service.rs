//! Access control facade
//!
//! [`AccessControl`] wires the hierarchy, role resolver, right resolver,
//! membership admin, permission cache and escalation subsystem together and
//! exposes the operations controllers call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lms_auth::{
    AdminSession, AdminSessionManager, AdminTokenService, AuthError, EscalationCredentialStore,
    EscalationState, EscalationVerifier, IdentityVerifier, Principal,
};
use lms_events::{AuditEvent, AuditEventKind, AuditSink, TracingAuditSink};
use lms_org::{Department, DepartmentMembership, MembershipSummary, UserCategory};
use lms_rbac::{AccessRightSet, RoleDefinition};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::admin::{MembershipAdmin, RoleAssignment};
use crate::audit;
use crate::cache::{CacheStore, MemoryCacheStore, PermissionCache, PermissionCacheStats};
use crate::config::AccessConfig;
use crate::error::{AccessError, AccessResult};
use crate::hierarchy::HierarchyService;
use crate::resolver::{RoleResolver, VisibleDepartment};
use crate::rights::{AccessRightResolver, AuthSubject, AuthorizationDecision, AuthorizeOptions};
use crate::store::AccessStore;

/// External collaborators the access core depends on.
#[derive(Clone)]
pub struct Collaborators {
    /// Persisted departments, memberships, roles and users
    pub store: Arc<dyn AccessStore>,

    /// Escalation password hashes
    pub credentials: Arc<dyn EscalationCredentialStore>,

    /// Identity token verification
    pub identity: Arc<dyn IdentityVerifier>,

    /// Key-value cache (defaults to in-process)
    pub cache_store: Arc<dyn CacheStore>,

    /// Audit sink (defaults to tracing output)
    pub audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Collaborators with an in-process cache and a tracing audit sink.
    pub fn new(
        store: Arc<dyn AccessStore>,
        credentials: Arc<dyn EscalationCredentialStore>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            store,
            credentials,
            identity,
            cache_store: Arc::new(MemoryCacheStore::new()),
            audit: Arc::new(TracingAuditSink),
        }
    }

    /// Use a different cache store.
    pub fn with_cache_store(mut self, cache_store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = cache_store;
        self
    }

    /// Use a different audit sink.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Use Redis as the cache store.
    #[cfg(feature = "redis")]
    pub async fn with_redis_cache(self, redis_url: &str) -> AccessResult<Self> {
        let cache = crate::cache::RedisCacheStore::new(redis_url).await?;
        Ok(self.with_cache_store(Arc::new(cache)))
    }
}

/// Result of a successful escalation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationGrant {
    /// Signed admin token
    pub admin_token: String,

    /// Seconds until the idle window closes
    pub expires_in: i64,

    /// Absolute end of the session
    pub expires_at: DateTime<Utc>,

    /// Session ID
    pub session_id: Uuid,

    /// Roles snapshotted at issuance
    pub roles: Vec<String>,

    /// Rights snapshotted at issuance
    pub access_rights: AccessRightSet,
}

/// A request that presented both credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminContext {
    /// Identity behind the identity token
    pub principal: Principal,

    /// Active admin session
    pub session: AdminSession,
}

impl AdminContext {
    /// Rights snapshotted when the session was issued.
    pub fn access_rights(&self) -> &AccessRightSet {
        &self.session.access_rights
    }
}

/// Department-scoped access control with admin escalation.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use lms_access::{AccessConfig, AccessControl, AuthSubject, AuthorizeOptions, Collaborators, InMemoryStore};
/// use lms_auth::{IdentityVerifier, MemoryCredentialStore};
///
/// async fn example(identity: Arc<dyn IdentityVerifier>) -> Result<(), Box<dyn std::error::Error>> {
///     let config = AccessConfig::from_env()?;
///     let collaborators = Collaborators::new(
///         Arc::new(InMemoryStore::with_builtin_roles()),
///         Arc::new(MemoryCredentialStore::new()),
///         identity,
///     );
///     let access = AccessControl::new(config, collaborators)?;
///
///     let subject = access.authenticate("identity-token", None).await?;
///     let decision = access
///         .authorize(&subject, "content:courses:read", &AuthorizeOptions::new())
///         .await?;
///     println!("allowed: {}", decision.allowed);
///     Ok(())
/// }
/// ```
pub struct AccessControl {
    config: AccessConfig,
    store: Arc<dyn AccessStore>,
    cache: PermissionCache,
    hierarchy: Arc<HierarchyService>,
    roles: Arc<RoleResolver>,
    rights: AccessRightResolver,
    admin: MembershipAdmin,
    sessions: AdminSessionManager,
    tokens: AdminTokenService,
    verifier: EscalationVerifier,
    identity: Arc<dyn IdentityVerifier>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for AccessControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessControl")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AccessControl {
    /// Build the access core.
    ///
    /// # Errors
    ///
    /// `Config` if the configuration is invalid, `Auth` if the admin token
    /// secret is rejected.
    pub fn new(config: AccessConfig, collaborators: Collaborators) -> AccessResult<Self> {
        config.validate()?;
        let Collaborators {
            store,
            credentials,
            identity,
            cache_store,
            audit,
        } = collaborators;

        let tokens = AdminTokenService::new(config.token_config())?;
        let sessions = AdminSessionManager::new(config.session_config());
        let cache = PermissionCache::new(cache_store, config.rights_ttl());
        let hierarchy = Arc::new(HierarchyService::new(
            store.clone(),
            cache.clone(),
            audit.clone(),
            config.hierarchy_ttl(),
        ));
        let roles = Arc::new(RoleResolver::new(
            store.clone(),
            hierarchy.clone(),
            config.master_department_id,
        ));
        let rights = AccessRightResolver::new(store.clone(), roles.clone(), cache.clone());
        let admin = MembershipAdmin::new(
            store.clone(),
            cache.clone(),
            audit.clone(),
            config.master_department_id,
        );

        info!(
            master_department_id = %config.master_department_id,
            session_policy = config.escalation.session_policy.as_str(),
            "Access control initialized"
        );

        Ok(Self {
            config,
            store,
            cache,
            hierarchy,
            roles,
            rights,
            admin,
            sessions,
            tokens,
            verifier: EscalationVerifier::new(credentials),
            identity,
            audit,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Hierarchy service.
    pub fn hierarchy(&self) -> &HierarchyService {
        &self.hierarchy
    }

    /// Permission cache statistics.
    pub async fn cache_stats(&self) -> PermissionCacheStats {
        self.cache.stats().await
    }

    // --- Resolution ---

    /// Roles a user holds in a department for a category.
    #[instrument(skip(self))]
    pub async fn resolve_roles(
        &self,
        user_id: Uuid,
        department_id: Uuid,
        category: UserCategory,
    ) -> AccessResult<Vec<String>> {
        self.roles.resolve_roles(user_id, department_id, category).await
    }

    /// Union of the rights of the named roles.
    pub async fn resolve_access_rights<S: AsRef<str>>(&self, roles: &[S]) -> AccessResult<AccessRightSet> {
        self.rights.resolve_access_rights(roles).await
    }

    /// Rights a user holds in a department (learner and staff combined),
    /// served from the permission cache.
    #[instrument(skip(self))]
    pub async fn department_rights(&self, user_id: Uuid, department_id: Uuid) -> AccessResult<AccessRightSet> {
        Ok(self
            .rights
            .department_grant(user_id, department_id)
            .await?
            .access_rights)
    }

    /// Decide whether a subject holds a right.
    pub async fn authorize(
        &self,
        subject: &AuthSubject,
        required: &str,
        options: &AuthorizeOptions,
    ) -> AccessResult<AuthorizationDecision> {
        self.rights.authorize(subject, required, options).await
    }

    /// Departments a user can see for a category.
    #[instrument(skip(self))]
    pub async fn resolve_visible_departments(
        &self,
        user_id: Uuid,
        category: UserCategory,
    ) -> AccessResult<Vec<VisibleDepartment>> {
        self.roles.resolve_visible_departments(user_id, category).await
    }

    /// Every effective membership of a user across categories.
    pub async fn resolve_all_memberships(&self, user_id: Uuid) -> AccessResult<Vec<MembershipSummary>> {
        self.roles.resolve_all_memberships(user_id).await
    }

    /// The department plus every active, visible transitive child.
    pub async fn descendants_of(&self, department_id: Uuid) -> AccessResult<Vec<Uuid>> {
        self.hierarchy.descendants_of(department_id).await
    }

    /// Whether a user is a top-level member of a department.
    pub async fn is_top_level_member(&self, user_id: Uuid, department_id: Uuid) -> AccessResult<bool> {
        self.hierarchy.is_top_level_member(user_id, department_id).await
    }

    // --- Writes ---

    /// Create a department.
    pub async fn create_department(&self, actor_id: Uuid, department: Department) -> AccessResult<Department> {
        self.hierarchy.create_department(actor_id, department).await
    }

    /// Move a department under a new parent.
    pub async fn set_department_parent(
        &self,
        actor_id: Uuid,
        department_id: Uuid,
        parent_id: Option<Uuid>,
        expected_version: u64,
    ) -> AccessResult<Department> {
        self.hierarchy
            .set_department_parent(actor_id, department_id, parent_id, expected_version)
            .await
    }

    /// Grant a role.
    pub async fn assign_role(
        &self,
        actor_id: Uuid,
        assignment: RoleAssignment,
    ) -> AccessResult<DepartmentMembership> {
        self.admin.assign_role(actor_id, assignment).await
    }

    /// Remove a membership.
    pub async fn remove_role(&self, actor_id: Uuid, user_id: Uuid, membership_id: Uuid) -> AccessResult<()> {
        self.admin.remove_role(actor_id, user_id, membership_id).await
    }

    /// Replace a membership's role set.
    pub async fn update_roles(
        &self,
        actor_id: Uuid,
        membership_id: Uuid,
        roles: Vec<String>,
        expected_version: u64,
    ) -> AccessResult<DepartmentMembership> {
        self.admin
            .update_roles(actor_id, membership_id, roles, expected_version)
            .await
    }

    /// Create or replace a role definition; every cached grant is dropped.
    pub async fn upsert_role(&self, actor_id: Uuid, role: RoleDefinition) -> AccessResult<RoleDefinition> {
        self.admin.upsert_role(actor_id, role).await
    }

    /// Drop a user's cached grants.
    pub async fn invalidate_user(&self, user_id: Uuid) {
        self.cache.invalidate_user(user_id).await;
    }

    // --- Escalation ---

    /// Escalate a global admin.
    ///
    /// Takes a snapshot of the user's master-department roles and rights and
    /// issues an admin session carrying it.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the user does not exist or is inactive
    /// - `Forbidden` if the user is not a global admin, or holds no active
    ///   master-department roles
    /// - `Unauthorized` (`InvalidEscalationPassword`) if the password fails;
    ///   no session is created
    #[instrument(skip(self, escalation_password))]
    pub async fn escalate(&self, user_id: Uuid, escalation_password: &str) -> AccessResult<EscalationGrant> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| AccessError::NotFound(format!("User {}", user_id)))?;

        if !user.is_global_admin() {
            warn!("Escalation denied: not a global admin");
            self.record_escalation(AuditEventKind::EscalationDenied, user_id, json!({ "reason": "not_global_admin" }))
                .await;
            return Err(AuthError::Forbidden("User is not a global admin".to_string()).into());
        }

        if let Err(e) = self.verifier.verify(user_id, escalation_password).await {
            if matches!(e, AuthError::InvalidEscalationPassword) {
                warn!("Escalation failed: invalid escalation password");
                self.record_escalation(
                    AuditEventKind::EscalationFailed,
                    user_id,
                    json!({ "reason": "invalid_escalation_password" }),
                )
                .await;
            }
            return Err(e.into());
        }

        let grant = self.rights.global_grant(user_id).await?;
        if grant.roles.is_empty() || grant.access_rights.is_empty() {
            warn!("Escalation denied: no active master-department roles");
            self.record_escalation(
                AuditEventKind::EscalationDenied,
                user_id,
                json!({ "reason": "no_master_membership" }),
            )
            .await;
            return Err(AuthError::Forbidden("No active global-admin roles".to_string()).into());
        }

        let issued = self
            .sessions
            .issue(user_id, grant.roles.clone(), grant.access_rights.clone(), &self.tokens)
            .await?;
        let session = issued.session;

        info!(session_id = %session.id, roles = ?session.roles, "Escalation granted");
        self.record_escalation(
            AuditEventKind::EscalationGranted,
            user_id,
            json!({
                "session_id": session.id,
                "roles": session.roles,
                "expires_at": session.expires_at,
                "absolute_expires_at": session.absolute_expires_at,
            }),
        )
        .await;

        Ok(EscalationGrant {
            admin_token: issued.token,
            expires_in: session.expires_in(Utc::now()),
            expires_at: session.absolute_expires_at,
            session_id: session.id,
            roles: session.roles,
            access_rights: session.access_rights,
        })
    }

    /// Revoke a user's admin sessions. Idempotent.
    #[instrument(skip(self))]
    pub async fn deescalate(&self, actor_id: Uuid, user_id: Uuid) -> AccessResult<()> {
        let revoked = self.sessions.revoke_user(user_id).await;
        info!(revoked, "Deescalated");
        audit::record(
            self.audit.as_ref(),
            AuditEvent::new(AuditEventKind::Deescalated)
                .with_actor(actor_id)
                .with_subject(user_id)
                .with_payload(json!({ "revoked_sessions": revoked })),
        )
        .await;
        Ok(())
    }

    /// Escalation state of a user.
    pub async fn escalation_status(&self, user_id: Uuid) -> EscalationState {
        self.sessions.status(user_id).await
    }

    /// Validate both credentials of an admin-tier request.
    ///
    /// Extends the session's idle window on success.
    ///
    /// # Errors
    ///
    /// `Unauthorized` if either token is invalid, they name different users,
    /// or the session is not active.
    pub async fn require_admin(&self, identity_token: &str, admin_token: &str) -> AccessResult<AdminContext> {
        let principal = self.identity.verify_identity(identity_token).await?;
        self.admin_context(principal, admin_token).await
    }

    /// Validate both credentials and check the session's snapshot rights.
    ///
    /// # Errors
    ///
    /// As [`Self::require_admin`], plus `Forbidden` if the snapshot lacks
    /// the right.
    #[instrument(skip(self, identity_token, admin_token))]
    pub async fn authorize_admin(
        &self,
        identity_token: &str,
        admin_token: &str,
        required: &str,
    ) -> AccessResult<AdminContext> {
        let context = self.require_admin(identity_token, admin_token).await?;
        let rights = context.access_rights();
        if !(rights.is_unrestricted() || rights.has_str(required)) {
            return Err(AccessError::Forbidden(format!(
                "Admin session lacks {}",
                required
            )));
        }
        Ok(context)
    }

    /// Build the subject for [`Self::authorize`] from request credentials.
    ///
    /// An admin token, when present, must be valid; its snapshot rights are
    /// attached as global rights.
    pub async fn authenticate(
        &self,
        identity_token: &str,
        admin_token: Option<&str>,
    ) -> AccessResult<AuthSubject> {
        let principal = self.identity.verify_identity(identity_token).await?;
        let subject = AuthSubject::user(principal.user_id);
        match admin_token {
            Some(token) => {
                let context = self.admin_context(principal, token).await?;
                Ok(subject.with_admin_rights(context.session.access_rights))
            }
            None => Ok(subject),
        }
    }

    /// Drop finished admin sessions. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        self.sessions.purge_expired().await
    }

    async fn admin_context(&self, principal: Principal, admin_token: &str) -> AccessResult<AdminContext> {
        let claims = self.tokens.validate_token(admin_token)?;
        if claims.user_id() != Some(principal.user_id) {
            return Err(AuthError::SubjectMismatch.into());
        }
        let session = self.sessions.validate(&claims, admin_token).await?;
        Ok(AdminContext { principal, session })
    }

    async fn record_escalation(&self, kind: AuditEventKind, user_id: Uuid, payload: serde_json::Value) {
        audit::record(
            self.audit.as_ref(),
            AuditEvent::new(kind)
                .with_actor(user_id)
                .with_subject(user_id)
                .with_department(self.config.master_department_id)
                .with_payload(payload),
        )
        .await;
    }
}
