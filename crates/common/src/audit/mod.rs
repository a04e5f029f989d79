//! Audit trail for admin mutations
//!
//! Every admin-initiated mutation emits an [`AuditEvent`]. Emission is fire
//! and forget: a sink that cannot record an event logs the failure and the
//! originating request proceeds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A recorded admin action against one entity.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub action: &'static str,
    pub target_kind: &'static str,
    pub target_id: Uuid,
    pub actor_id: Uuid,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    fn new(action: &'static str, target_kind: &'static str, target_id: Uuid, actor_id: Uuid) -> Self {
        Self {
            action,
            target_kind,
            target_id,
            actor_id,
            at: Utc::now(),
        }
    }

    pub fn batch(action: &'static str, batch_id: Uuid, actor_id: Uuid) -> Self {
        Self::new(action, "batch", batch_id, actor_id)
    }

    pub fn block_verdict(action: &'static str, block_id: Uuid, actor_id: Uuid) -> Self {
        Self::new(action, "block", block_id, actor_id)
    }

    pub fn content(action: &'static str, content_id: Uuid, actor_id: Uuid) -> Self {
        Self::new(action, "approved_content", content_id, actor_id)
    }

    pub fn exam_question(action: &'static str, question_id: Uuid, actor_id: Uuid) -> Self {
        Self::new(action, "exam_question", question_id, actor_id)
    }
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: AuditEvent);
}

/// Sink that writes events to the structured log under the `audit` target.
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn emit(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            action = event.action,
            target_kind = event.target_kind,
            target_id = %event.target_id,
            actor_id = %event.actor_id,
            at = %event.at,
            "Admin action"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<AuditEvent>>);

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn emit(&self, event: AuditEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn events_carry_target_and_actor() {
        let sink = RecordingSink(Mutex::new(vec![]));
        let block_id = Uuid::new_v4();
        let actor = Uuid::new_v4();

        sink.emit(AuditEvent::block_verdict("approve", block_id, actor))
            .await;

        let events = sink.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "approve");
        assert_eq!(events[0].target_kind, "block");
        assert_eq!(events[0].target_id, block_id);
        assert_eq!(events[0].actor_id, actor);
    }
}
