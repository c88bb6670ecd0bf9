//! # LMS Events
//!
//! This crate provides the audit trail for the LMS access core. Every role
//! mutation, department write and admin escalation transition produces an
//! [`AuditEvent`] that is handed to an [`AuditSink`].
//!
//! ## Overview
//!
//! The lms-events crate handles:
//! - **Event Types**: The audit envelope and the kinds of access changes
//! - **Audit Sink**: The single `record` seam used by the access core
//! - **Memory Sink**: Bounded in-process retention with kind and user queries
//! - **Tracing Sink**: Log-only sink for deployments without an audit store
//!
//! ## Features
//!
//! - `memory` (default): In-memory sink for single-process apps and tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lms_events::{AuditEvent, AuditEventKind, AuditSink, MemoryAuditSink};
//! use uuid::Uuid;
//!
//! async fn audit_example() {
//!     let sink = MemoryAuditSink::new();
//!     let user_id = Uuid::now_v7();
//!
//!     let event = AuditEvent::new(AuditEventKind::EscalationGranted)
//!         .with_subject(user_id);
//!     sink.record(event).await.unwrap();
//!
//!     let recorded = sink.events_for_user(user_id).await;
//!     assert_eq!(recorded[0].kind, AuditEventKind::EscalationGranted);
//! }
//! ```
//!
//! ## Topics
//!
//! Each event carries a topic of the form `access.{subject}.{action}`,
//! written to the log by the tracing sink:
//! - `access.role.assigned`, `access.role.removed`, `access.role.updated`,
//!   `access.role.defined`
//! - `access.department.created`, `access.department.reparented`
//! - `access.escalation.granted`, `access.escalation.denied`,
//!   `access.escalation.failed`, `access.escalation.revoked`

pub mod sink;
pub mod types;

// Re-export main types for convenience
pub use sink::{
    AuditError, AuditResult, AuditSink, AuditSinkStats, MemoryAuditSink, TracingAuditSink,
};
pub use types::{AuditEvent, AuditEventKind, TOPIC_PREFIX};
