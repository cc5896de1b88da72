//! Audit trail for gate operations. Every externally visible operation emits
//! exactly one event; the sink is injected so tests can capture the stream.

use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Denied,
    Error,
}

impl AuditOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub request_id: String,
    pub operation: &'static str,
    pub principal_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub outcome: AuditOutcome,
    pub reason: Option<String>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Production sink: structured fields on the `audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let principal = event.principal_id.map(|id| id.to_string());
        let device = event.device_id.map(|id| id.to_string());
        match event.outcome {
            AuditOutcome::Success => info!(
                target: "audit",
                request_id = %event.request_id,
                operation = event.operation,
                principal = principal.as_deref(),
                device = device.as_deref(),
                outcome = event.outcome.as_str(),
            ),
            AuditOutcome::Denied | AuditOutcome::Error => warn!(
                target: "audit",
                request_id = %event.request_id,
                operation = event.operation,
                principal = principal.as_deref(),
                device = device.as_deref(),
                outcome = event.outcome.as_str(),
                reason = event.reason.as_deref(),
            ),
        }
    }
}

/// Test sink that keeps every event for assertions.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_events_in_order() {
        let sink = RecordingAuditSink::new();
        sink.record(AuditEvent {
            request_id: "req-1".to_string(),
            operation: "login",
            principal_id: None,
            device_id: None,
            outcome: AuditOutcome::Denied,
            reason: Some("rate_limited".to_string()),
        });
        sink.record(AuditEvent {
            request_id: "req-2".to_string(),
            operation: "login",
            principal_id: Some(Uuid::new_v4()),
            device_id: None,
            outcome: AuditOutcome::Success,
            reason: None,
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].request_id, "req-1");
        assert_eq!(events[0].outcome, AuditOutcome::Denied);
        assert_eq!(events[1].outcome, AuditOutcome::Success);
    }
}
