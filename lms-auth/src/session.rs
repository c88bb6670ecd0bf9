//! Admin escalation sessions
//!
//! An escalation session is a short sudo-like window in which a global
//! admin's snapshot rights apply. Sessions move through
//! `None → Active → (Expired | Revoked)`; purging a finished session returns
//! the user to `None`.
//!
//! Each session has two clocks:
//! - an idle window (`ttl`) that qualifying activity slides forward
//! - an absolute cap (`max_lifetime`) that activity never extends

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lms_rbac::AccessRightSet;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::claims::AdminClaims;
use crate::error::{AuthError, AuthResult};
use crate::jwt::{token_fingerprint, AdminTokenService};

/// Escalation state of a user or session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    /// No session on record
    None,
    /// Session usable
    Active,
    /// Idle window or absolute lifetime elapsed
    Expired,
    /// Revoked by deescalation or replaced by a newer session
    Revoked,
}

impl EscalationState {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

/// Whether a user may hold more than one active session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// A new escalation revokes the user's other sessions
    #[default]
    Single,
    /// Sessions coexist until each expires or is revoked
    Multiple,
}

impl SessionPolicy {
    /// Parse from string.
    ///
    /// # Examples
    ///
    /// ```
    /// use lms_auth::SessionPolicy;
    ///
    /// assert_eq!(SessionPolicy::parse("single"), Some(SessionPolicy::Single));
    /// assert_eq!(SessionPolicy::parse("MULTIPLE"), Some(SessionPolicy::Multiple));
    /// assert_eq!(SessionPolicy::parse("many"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "single" => Some(Self::Single),
            "multiple" | "multi" => Some(Self::Multiple),
            _ => None,
        }
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multiple => "multiple",
        }
    }
}

/// Session timing and policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Idle window
    pub ttl: Duration,
    /// Absolute cap from issuance
    pub max_lifetime: Duration,
    /// Concurrent session policy
    pub policy: SessionPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(900),
            max_lifetime: Duration::seconds(3600),
            policy: SessionPolicy::Single,
        }
    }
}

/// An admin escalation session.
///
/// The role and right snapshot is taken at issuance and never re-derived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminSession {
    /// Session ID (the token's `sid`)
    pub id: Uuid,

    /// Escalated user
    pub user_id: Uuid,

    /// SHA-256 fingerprint of the admin token
    pub token_fingerprint: String,

    /// When the session was issued
    pub issued_at: DateTime<Utc>,

    /// Last qualifying activity
    pub last_activity_at: DateTime<Utc>,

    /// End of the current idle window
    pub expires_at: DateTime<Utc>,

    /// Absolute cap
    pub absolute_expires_at: DateTime<Utc>,

    /// Roles held at issuance
    pub roles: Vec<String>,

    /// Rights held at issuance
    pub access_rights: AccessRightSet,

    /// When the session was revoked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl AdminSession {
    /// State at a point in time.
    pub fn state_at(&self, now: DateTime<Utc>) -> EscalationState {
        if self.revoked_at.is_some() {
            EscalationState::Revoked
        } else if now >= self.expires_at || now >= self.absolute_expires_at {
            EscalationState::Expired
        } else {
            EscalationState::Active
        }
    }

    /// State right now.
    pub fn state(&self) -> EscalationState {
        self.state_at(Utc::now())
    }

    /// Check if the session is usable at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) == EscalationState::Active
    }

    /// Seconds until the idle window closes.
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Slide the idle window forward, never past the absolute cap.
    fn extend(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.last_activity_at = now;
        self.expires_at = (now + ttl).min(self.absolute_expires_at);
    }
}

/// A freshly issued session and its token.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// Session record
    pub session: AdminSession,
    /// Signed admin token (only returned once)
    pub token: String,
}

/// Registry of escalation sessions.
///
/// # Example
///
/// ```rust,no_run
/// use lms_auth::{AdminSessionManager, AdminTokenService, SessionConfig};
/// use lms_rbac::AccessRightSet;
/// use uuid::Uuid;
///
/// async fn escalate_example() {
///     let tokens = AdminTokenService::with_secret("an-admin-token-secret-of-at-least-32-bytes").unwrap();
///     let sessions = AdminSessionManager::new(SessionConfig::default());
///
///     let user_id = Uuid::now_v7();
///     let issued = sessions
///         .issue(user_id, vec!["system-admin".into()], AccessRightSet::from_strings(&["*"]), &tokens)
///         .await
///         .unwrap();
///
///     let claims = tokens.validate_token(&issued.token).unwrap();
///     let session = sessions.validate(&claims, &issued.token).await.unwrap();
///     assert_eq!(session.user_id, user_id);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AdminSessionManager {
    config: SessionConfig,
    sessions: Arc<RwLock<HashMap<Uuid, AdminSession>>>,
}

impl AdminSessionManager {
    /// Create a new registry.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Issue a session and its signed token.
    ///
    /// Under [`SessionPolicy::Single`] the user's other active sessions are
    /// revoked in the same write.
    pub async fn issue(
        &self,
        user_id: Uuid,
        roles: Vec<String>,
        access_rights: AccessRightSet,
        tokens: &AdminTokenService,
    ) -> AuthResult<IssuedSession> {
        let now = Utc::now();
        let session_id = Uuid::now_v7();
        let absolute_expires_at = now + self.config.max_lifetime;

        let claims = AdminClaims::new(user_id, session_id, tokens.issuer(), absolute_expires_at);
        let token = tokens.encode_claims(&claims)?;

        let session = AdminSession {
            id: session_id,
            user_id,
            token_fingerprint: token_fingerprint(&token),
            issued_at: now,
            last_activity_at: now,
            expires_at: (now + self.config.ttl).min(absolute_expires_at),
            absolute_expires_at,
            roles,
            access_rights,
            revoked_at: None,
        };

        let mut sessions = self.sessions.write().await;
        if self.config.policy == SessionPolicy::Single {
            let replaced = revoke_where(&mut sessions, now, |s| s.user_id == user_id);
            if replaced > 0 {
                debug!(user_id = %user_id, replaced, "Revoked prior admin sessions");
            }
        }
        sessions.insert(session_id, session.clone());

        info!(user_id = %user_id, session_id = %session_id, "Admin session issued");
        Ok(IssuedSession { session, token })
    }

    /// Validate a decoded token against the registry and record activity.
    pub async fn validate(&self, claims: &AdminClaims, token: &str) -> AuthResult<AdminSession> {
        self.validate_at(claims, token, Utc::now()).await
    }

    /// Validate as of `now`.
    ///
    /// # Errors
    ///
    /// - `MissingClaim` if the token lacks a usable `sid`
    /// - `SessionNotFound` if the session is unknown or belongs to another token
    /// - `SessionRevoked` / `SessionExpired` if the session is finished
    pub async fn validate_at(
        &self,
        claims: &AdminClaims,
        token: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<AdminSession> {
        let session_id = claims
            .session_id()
            .ok_or_else(|| AuthError::MissingClaim("sid".to_string()))?;

        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&session_id).ok_or(AuthError::SessionNotFound)?;

        if claims.user_id() != Some(session.user_id)
            || session.token_fingerprint != token_fingerprint(token)
        {
            return Err(AuthError::SessionNotFound);
        }

        match session.state_at(now) {
            EscalationState::Active => {
                session.extend(now, self.config.ttl);
                Ok(session.clone())
            }
            EscalationState::Revoked => Err(AuthError::SessionRevoked),
            EscalationState::Expired | EscalationState::None => Err(AuthError::SessionExpired),
        }
    }

    /// Revoke every active session of a user.
    ///
    /// # Returns
    ///
    /// Number of sessions revoked (zero is not an error)
    pub async fn revoke_user(&self, user_id: Uuid) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let revoked = revoke_where(&mut sessions, now, |s| s.user_id == user_id);
        if revoked > 0 {
            info!(user_id = %user_id, revoked, "Admin sessions revoked");
        }
        revoked
    }

    /// Revoke one session.
    pub async fn revoke(&self, session_id: Uuid) -> bool {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        revoke_where(&mut sessions, now, |s| s.id == session_id) > 0
    }

    /// The user's active session, if any (most recent first).
    pub async fn active_session(&self, user_id: Uuid) -> Option<AdminSession> {
        let now = Utc::now();
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id && s.is_active_at(now))
            .max_by_key(|s| s.issued_at)
            .cloned()
    }

    /// Escalation state of a user.
    ///
    /// `Active` if any session is usable, otherwise the state of the most
    /// recent session, or `None` when the registry holds nothing for the user.
    pub async fn status(&self, user_id: Uuid) -> EscalationState {
        let now = Utc::now();
        let sessions = self.sessions.read().await;
        let mut latest: Option<&AdminSession> = None;
        for session in sessions.values().filter(|s| s.user_id == user_id) {
            if session.is_active_at(now) {
                return EscalationState::Active;
            }
            if latest.map_or(true, |l| session.issued_at > l.issued_at) {
                latest = Some(session);
            }
        }
        latest.map_or(EscalationState::None, |s| s.state_at(now))
    }

    /// Drop finished sessions. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.is_active_at(now));
        before - sessions.len()
    }

    /// Number of sessions on record.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Check if no sessions are on record.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn revoke_where<F>(sessions: &mut HashMap<Uuid, AdminSession>, now: DateTime<Utc>, pred: F) -> usize
where
    F: Fn(&AdminSession) -> bool,
{
    let mut revoked = 0;
    for session in sessions.values_mut() {
        if pred(session) && session.is_active_at(now) {
            session.revoked_at = Some(now);
            revoked += 1;
        }
    }
    revoked
}
