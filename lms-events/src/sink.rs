//! Audit sink implementation
//!
//! This module provides the audit sink abstraction and an in-memory
//! implementation that retains recent events for inspection.

use crate::types::{AuditEvent, AuditEventKind};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Audit sink error types.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to record event
    #[error("Failed to record audit event: {0}")]
    RecordError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type for audit sink operations.
pub type AuditResult<T> = Result<T, AuditError>;

/// Audit sink trait.
///
/// Every role mutation and escalation transition is recorded through this
/// trait. Callers treat a failed `record` as non-fatal: the mutation it
/// describes has already been committed.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an event.
    async fn record(&self, event: AuditEvent) -> AuditResult<()>;
}

/// Memory sink statistics.
#[derive(Debug, Clone, Default)]
pub struct AuditSinkStats {
    /// Total events recorded
    pub events_recorded: u64,
    /// Events currently retained
    pub events_retained: usize,
}

/// In-memory audit sink.
///
/// Retains the most recent events up to a fixed capacity. Suitable for
/// single-process deployments and tests.
pub struct MemoryAuditSink {
    /// Retained events, oldest first
    events: Arc<RwLock<VecDeque<AuditEvent>>>,
    /// Statistics
    stats: Arc<RwLock<AuditSinkStats>>,
    /// Maximum retained events
    retention: usize,
}

impl std::fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl MemoryAuditSink {
    /// Create a new in-memory sink retaining 10 000 events.
    pub fn new() -> Self {
        Self::with_retention(10_000)
    }

    /// Create with a custom retention limit.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::new())),
            stats: Arc::new(RwLock::new(AuditSinkStats::default())),
            retention: retention.max(1),
        }
    }

    /// All retained events, oldest first.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.iter().cloned().collect()
    }

    /// Retained events of one kind.
    pub async fn events_of_kind(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Retained events whose subject is `user_id`.
    pub async fn events_for_user(&self, user_id: Uuid) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.subject_user_id == Some(user_id))
            .cloned()
            .collect()
    }

    /// Current statistics.
    pub async fn stats(&self) -> AuditSinkStats {
        self.stats.read().await.clone()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> AuditResult<()> {
        tracing::debug!(event_id = %event.id, topic = %event.topic(), "Recording audit event");

        let retained = {
            let mut events = self.events.write().await;
            events.push_back(event);
            while events.len() > self.retention {
                events.pop_front();
            }
            events.len()
        };

        let mut stats = self.stats.write().await;
        stats.events_recorded += 1;
        stats.events_retained = retained;

        Ok(())
    }
}

/// Sink that only logs events through `tracing`.
///
/// Used when no durable audit store is configured.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> AuditResult<()> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| AuditError::SerializationError(e.to_string()))?;
        tracing::info!(
            event_id = %event.id,
            topic = %event.topic(),
            actor_id = ?event.actor_id,
            subject_user_id = ?event.subject_user_id,
            department_id = ?event.department_id,
            payload = %payload,
            "audit"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retention_and_queries() {
        let sink = MemoryAuditSink::with_retention(2);
        let user = Uuid::now_v7();

        sink.record(AuditEvent::new(AuditEventKind::RoleAssigned).with_subject(user))
            .await
            .unwrap();
        sink.record(AuditEvent::new(AuditEventKind::RoleRemoved).with_subject(user))
            .await
            .unwrap();
        sink.record(AuditEvent::new(AuditEventKind::RoleAssigned))
            .await
            .unwrap();

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AuditEventKind::RoleRemoved);
        assert_eq!(sink.events_for_user(user).await.len(), 1);
        assert_eq!(sink.events_of_kind(AuditEventKind::RoleAssigned).await.len(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let sink = MemoryAuditSink::with_retention(1);
        assert_eq!(sink.stats().await.events_recorded, 0);

        sink.record(AuditEvent::new(AuditEventKind::Deescalated))
            .await
            .unwrap();
        sink.record(AuditEvent::new(AuditEventKind::EscalationGranted))
            .await
            .unwrap();

        let stats = sink.stats().await;
        assert_eq!(stats.events_recorded, 2);
        assert_eq!(stats.events_retained, 1);
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_events() {
        let sink = TracingAuditSink;
        assert!(sink.record(AuditEvent::new(AuditEventKind::RoleAssigned)).await.is_ok());
    }
}
