//! Audit trail and notification event types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Generated,
    OutcomeUpdated,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::Generated => "generated",
            AuditEvent::OutcomeUpdated => "outcome_updated",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "outcome_updated" => AuditEvent::OutcomeUpdated,
            _ => AuditEvent::Generated,
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: i64,
    pub signal_id: Uuid,
    pub event: AuditEvent,
    pub payload: serde_json::Value,
    pub created_at: i64,
}

/// Events pushed to the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    SignalCommitted,
    SignalExecuted,
    SignalResolved,
    SignalDismissed,
    VerificationFailed,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::SignalCommitted => "signal_committed",
            NotificationEvent::SignalExecuted => "signal_executed",
            NotificationEvent::SignalResolved => "signal_resolved",
            NotificationEvent::SignalDismissed => "signal_dismissed",
            NotificationEvent::VerificationFailed => "verification_failed",
        }
    }
}
