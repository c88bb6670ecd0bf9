//! Audit event types
//!
//! This module defines the audit envelope emitted for every membership
//! mutation, department write, and admin escalation transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Topic prefix shared by every audit event.
pub const TOPIC_PREFIX: &str = "access";

/// What happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// A role was granted (new membership or role added to an existing one)
    RoleAssigned,
    /// A membership was deactivated
    RoleRemoved,
    /// A membership's role set was replaced
    RolesUpdated,
    /// A role definition was created or changed
    RoleDefined,
    /// A department was created
    DepartmentCreated,
    /// A department was moved under a new parent
    DepartmentReparented,
    /// An admin session was issued
    EscalationGranted,
    /// Escalation refused: the user is not a global admin
    EscalationDenied,
    /// Escalation refused: the escalation password did not verify
    EscalationFailed,
    /// An admin session was revoked
    Deescalated,
}

impl AuditEventKind {
    /// Dotted event type used to build the topic.
    ///
    /// # Examples
    ///
    /// ```
    /// use lms_events::AuditEventKind;
    ///
    /// assert_eq!(AuditEventKind::RoleAssigned.as_str(), "role.assigned");
    /// assert_eq!(AuditEventKind::Deescalated.as_str(), "escalation.revoked");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleAssigned => "role.assigned",
            Self::RoleRemoved => "role.removed",
            Self::RolesUpdated => "role.updated",
            Self::RoleDefined => "role.defined",
            Self::DepartmentCreated => "department.created",
            Self::DepartmentReparented => "department.reparented",
            Self::EscalationGranted => "escalation.granted",
            Self::EscalationDenied => "escalation.denied",
            Self::EscalationFailed => "escalation.failed",
            Self::Deescalated => "escalation.revoked",
        }
    }

    /// Check if this kind concerns admin escalation.
    pub fn is_escalation(&self) -> bool {
        matches!(
            self,
            Self::EscalationGranted | Self::EscalationDenied | Self::EscalationFailed | Self::Deescalated
        )
    }

    /// Check if this kind records a refused attempt.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::EscalationDenied | Self::EscalationFailed)
    }
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event envelope.
///
/// # Examples
///
/// ```
/// use lms_events::{AuditEvent, AuditEventKind};
/// use uuid::Uuid;
///
/// let admin = Uuid::now_v7();
/// let user = Uuid::now_v7();
/// let event = AuditEvent::new(AuditEventKind::RoleAssigned)
///     .with_actor(admin)
///     .with_subject(user)
///     .with_payload(serde_json::json!({ "role": "instructor" }));
///
/// assert_eq!(event.topic(), "access.role.assigned");
/// assert_eq!(event.subject_user_id, Some(user));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: Uuid,

    /// What happened
    pub kind: AuditEventKind,

    /// When it happened
    pub timestamp: DateTime<Utc>,

    /// Who performed the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<Uuid>,

    /// Whose access changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_user_id: Option<Uuid>,

    /// Department affected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<Uuid>,

    /// Membership affected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_id: Option<Uuid>,

    /// Correlation ID for tracing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Event-specific data (roles before/after, session id, reason)
    pub payload: serde_json::Value,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AuditEvent {
    /// Create a new event with an empty payload.
    pub fn new(kind: AuditEventKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            timestamp: Utc::now(),
            actor_id: None,
            subject_user_id: None,
            department_id: None,
            membership_id: None,
            correlation_id: None,
            payload: serde_json::Value::Null,
            metadata: HashMap::new(),
        }
    }

    /// Set the acting user.
    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    /// Set the affected user.
    pub fn with_subject(mut self, user_id: Uuid) -> Self {
        self.subject_user_id = Some(user_id);
        self
    }

    /// Set the affected department.
    pub fn with_department(mut self, department_id: Uuid) -> Self {
        self.department_id = Some(department_id);
        self
    }

    /// Set the affected membership.
    pub fn with_membership(mut self, membership_id: Uuid) -> Self {
        self.membership_id = Some(membership_id);
        self
    }

    /// Set correlation ID.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Get the topic for this event.
    ///
    /// Topics are structured as: `access.{kind}`
    pub fn topic(&self) -> String {
        format!("{}.{}", TOPIC_PREFIX, self.kind.as_str())
    }

    /// Parse the payload into a specific type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
