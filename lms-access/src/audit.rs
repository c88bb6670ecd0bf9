//! Audit helpers

use lms_events::{AuditEvent, AuditSink};
use tracing::warn;

/// Record an audit event. Sink failures are logged, never returned: the
/// change the event describes has already been committed.
pub(crate) async fn record(sink: &dyn AuditSink, event: AuditEvent) {
    let kind = event.kind;
    let event_id = event.id;
    if let Err(e) = sink.record(event).await {
        warn!(event_id = %event_id, kind = %kind, error = %e, "Failed to record audit event");
    }
}
