//! Access-right resolution and authorization
//!
//! Rights come from role definitions in the [`RoleStore`]. Department grants
//! (the union over the learner and staff categories a user holds) and the
//! master-department global-admin grant are read through the
//! [`PermissionCache`].
//!
//! [`AccessRightResolver::authorize`] checks, in order: the rights of a
//! validated admin session, the scope department, the resource's owning
//! department, and finally the own-scoped variant of the right when the
//! user created the resource. Anything else is denied.
//!
//! [`RoleStore`]: crate::store::RoleStore

use std::collections::BTreeSet;
use std::sync::Arc;

use lms_org::UserCategory;
use lms_rbac::{AccessRight, AccessRightSet, RoleCatalog};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::cache::{CacheSlot, PermissionCache, RoleGrant};
use crate::error::AccessResult;
use crate::resolver::RoleResolver;
use crate::store::AccessStore;

/// Who is asking.
///
/// Admin rights can only be attached by
/// [`AccessControl::authenticate`](crate::AccessControl::authenticate) after
/// the admin token and its session have been validated. Subjects built any
/// other way carry department grants only.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuthSubject {
    /// User ID
    pub user_id: Uuid,

    #[serde(skip_serializing_if = "Option::is_none")]
    admin_rights: Option<AccessRightSet>,
}

impl AuthSubject {
    /// A subject without an admin session.
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            admin_rights: None,
        }
    }

    pub(crate) fn with_admin_rights(mut self, rights: AccessRightSet) -> Self {
        self.admin_rights = Some(rights);
        self
    }

    /// Rights of the validated admin session, if one is attached.
    pub fn admin_rights(&self) -> Option<&AccessRightSet> {
        self.admin_rights.as_ref()
    }

    /// Check if an admin session is attached.
    pub fn is_escalated(&self) -> bool {
        self.admin_rights.is_some()
    }
}

/// A resource being acted on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRef {
    /// Department owning the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<Uuid>,

    /// User who created the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
}

impl ResourceRef {
    /// A resource owned by a department.
    pub fn in_department(department_id: Uuid) -> Self {
        Self {
            department_id: Some(department_id),
            created_by: None,
        }
    }

    /// Set the creator.
    pub fn created_by(mut self, user_id: Uuid) -> Self {
        self.created_by = Some(user_id);
        self
    }
}

/// Optional context for an authorization check.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizeOptions {
    /// Department the action is scoped to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Uuid>,

    /// Resource the action targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
}

impl AuthorizeOptions {
    /// No scope and no resource.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope the check to a department.
    pub fn with_scope(mut self, department_id: Uuid) -> Self {
        self.scope = Some(department_id);
        self
    }

    /// Target a resource.
    pub fn with_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }
}

/// Why a decision was reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Granted by the admin session's rights
    GlobalRight,
    /// Granted in the scope department
    ScopeRight,
    /// Granted in the resource's department
    ResourceRight,
    /// Granted through the own-scoped variant on a resource the user created
    OwnershipRight,
    /// Nothing granted the right
    NoMatchingRight,
    /// The required right is malformed
    InvalidRight,
}

impl DecisionReason {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GlobalRight => "global_right",
            Self::ScopeRight => "scope_right",
            Self::ResourceRight => "resource_right",
            Self::OwnershipRight => "ownership_right",
            Self::NoMatchingRight => "no_matching_right",
            Self::InvalidRight => "invalid_right",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizationDecision {
    /// Whether the action is allowed
    pub allowed: bool,

    /// Why
    pub reason: DecisionReason,
}

impl AuthorizationDecision {
    /// An allow.
    pub fn allow(reason: DecisionReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    /// A deny.
    pub fn deny(reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// Maps roles to rights and makes authorization decisions.
#[derive(Clone)]
pub struct AccessRightResolver {
    store: Arc<dyn AccessStore>,
    roles: Arc<RoleResolver>,
    cache: PermissionCache,
}

impl std::fmt::Debug for AccessRightResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessRightResolver").finish_non_exhaustive()
    }
}

impl AccessRightResolver {
    /// Create a resolver.
    pub fn new(store: Arc<dyn AccessStore>, roles: Arc<RoleResolver>, cache: PermissionCache) -> Self {
        Self { store, roles, cache }
    }

    /// Current role catalog.
    pub async fn catalog(&self) -> AccessResult<RoleCatalog> {
        Ok(self.store.list_roles().await?.into_iter().collect())
    }

    /// Union of the rights of the named roles.
    ///
    /// Unknown and inactive roles contribute nothing.
    pub async fn resolve_access_rights<S: AsRef<str>>(&self, roles: &[S]) -> AccessResult<AccessRightSet> {
        Ok(self.catalog().await?.resolve_access_rights(roles))
    }

    /// Roles and rights a user holds in a department, across the learner and
    /// staff categories, read through the cache.
    pub async fn department_grant(&self, user_id: Uuid, department_id: Uuid) -> AccessResult<RoleGrant> {
        self.cache
            .read_through(user_id, CacheSlot::Department(department_id), || {
                self.compute_department_grant(user_id, department_id)
            })
            .await
    }

    /// Roles and rights from the user's master-department global-admin
    /// membership, read through the cache.
    pub async fn global_grant(&self, user_id: Uuid) -> AccessResult<RoleGrant> {
        self.cache
            .read_through(user_id, CacheSlot::Global, || self.compute_global_grant(user_id))
            .await
    }

    /// Decide whether a subject holds a right.
    ///
    /// An admin session holding `*` is allowed any string. Otherwise
    /// malformed rights are denied with [`DecisionReason::InvalidRight`].
    /// Only store failures produce an error.
    #[instrument(skip(self, subject, options), fields(user_id = %subject.user_id))]
    pub async fn authorize(
        &self,
        subject: &AuthSubject,
        required: &str,
        options: &AuthorizeOptions,
    ) -> AccessResult<AuthorizationDecision> {
        if subject
            .admin_rights
            .as_ref()
            .is_some_and(AccessRightSet::is_unrestricted)
        {
            return Ok(decided(required, AuthorizationDecision::allow(DecisionReason::GlobalRight)));
        }

        let Ok(required) = AccessRight::parse(required) else {
            debug!(required, "Malformed right denied");
            return Ok(AuthorizationDecision::deny(DecisionReason::InvalidRight));
        };

        if subject
            .admin_rights
            .as_ref()
            .is_some_and(|rights| rights.has(&required))
        {
            return Ok(decided(&required, AuthorizationDecision::allow(DecisionReason::GlobalRight)));
        }

        let mut held: Vec<AccessRightSet> = Vec::new();

        if let Some(scope) = options.scope {
            let grant = self.department_grant(subject.user_id, scope).await?;
            if grant.access_rights.has(&required) {
                return Ok(decided(&required, AuthorizationDecision::allow(DecisionReason::ScopeRight)));
            }
            held.push(grant.access_rights);
        }

        if let Some(resource) = &options.resource {
            if let Some(department_id) = resource.department_id {
                let grant = self.department_grant(subject.user_id, department_id).await?;
                if grant.access_rights.has(&required) {
                    return Ok(decided(
                        &required,
                        AuthorizationDecision::allow(DecisionReason::ResourceRight),
                    ));
                }
                held.push(grant.access_rights);
            }

            if resource.created_by == Some(subject.user_id) {
                if let Some(own) = required.own_variant() {
                    if held.iter().any(|rights| rights.has(&own)) {
                        return Ok(decided(
                            &required,
                            AuthorizationDecision::allow(DecisionReason::OwnershipRight),
                        ));
                    }
                }
            }
        }

        Ok(decided(&required, AuthorizationDecision::deny(DecisionReason::NoMatchingRight)))
    }

    async fn compute_department_grant(&self, user_id: Uuid, department_id: Uuid) -> AccessResult<RoleGrant> {
        let mut roles = BTreeSet::new();
        for category in [UserCategory::Learner, UserCategory::Staff] {
            roles.extend(self.roles.resolve_roles(user_id, department_id, category).await?);
        }
        let roles: Vec<String> = roles.into_iter().collect();
        let access_rights = self.resolve_access_rights(roles.as_slice()).await?;
        Ok(RoleGrant::new(roles, access_rights))
    }

    async fn compute_global_grant(&self, user_id: Uuid) -> AccessResult<RoleGrant> {
        let roles = self
            .roles
            .resolve_roles(user_id, self.roles.master_department_id(), UserCategory::GlobalAdmin)
            .await?;
        let access_rights = self.resolve_access_rights(roles.as_slice()).await?;
        Ok(RoleGrant::new(roles, access_rights))
    }
}

fn decided(required: impl std::fmt::Display, decision: AuthorizationDecision) -> AuthorizationDecision {
    debug!(required = %required, allowed = decision.allowed, reason = %decision.reason, "Authorization decided");
    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(DecisionReason::OwnershipRight.as_str(), "ownership_right");
        assert_eq!(
            serde_json::to_value(DecisionReason::NoMatchingRight).unwrap(),
            serde_json::json!("no_matching_right")
        );
        let decision = AuthorizationDecision::allow(DecisionReason::ScopeRight);
        assert_eq!(
            serde_json::to_value(decision).unwrap(),
            serde_json::json!({ "allowed": true, "reason": "scope_right" })
        );
    }

    #[test]
    fn test_options_builders() {
        let dept = Uuid::now_v7();
        let owner = Uuid::now_v7();
        let options = AuthorizeOptions::new()
            .with_scope(dept)
            .with_resource(ResourceRef::in_department(dept).created_by(owner));
        assert_eq!(options.scope, Some(dept));
        assert_eq!(options.resource.unwrap().created_by, Some(owner));

        let subject = AuthSubject::user(owner);
        assert!(!subject.is_escalated());
        assert!(subject.admin_rights().is_none());
        let escalated = subject.with_admin_rights(AccessRightSet::from_strings(&["*"]));
        assert!(escalated.is_escalated());
        assert!(escalated.admin_rights().unwrap().is_unrestricted());
    }

    #[test]
    fn test_subject_serializes_without_admin_rights() {
        let user = Uuid::now_v7();
        assert_eq!(
            serde_json::to_value(AuthSubject::user(user)).unwrap(),
            serde_json::json!({ "user_id": user })
        );
    }
}
