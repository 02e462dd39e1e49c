//! Append-only audit events.
//!
//! RULE: Every state change an auditor would care about lands in the
//! audit_log table as one of these, keyed by context hash and never by
//! raw card id. Variants are added over time, never removed.

use crate::types::{EventId, FreezeId, IncidentId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    ContextEnforced {
        session_token: String,
    },
    ContextSwitched {
        delay_ms: u64,
    },
    CorrelationViolation {
        detail: String,
    },
    TransactionScored {
        event_id: Option<EventId>,
        txn_id: String,
        risk_score: u32,
        risk_level: String,
        anomaly_count: usize,
    },
    SpendingLimitDeclined {
        txn_id: String,
        limit: String,
    },
    IncidentClassified {
        incident_id: IncidentId,
        incident_type: String,
        severity: String,
        confidence: f64,
    },
    ResponseActionExecuted {
        incident_id: IncidentId,
        action_type: String,
        result: String,
    },
    FalsePositiveRecorded {
        incident_id: IncidentId,
        new_rate: f64,
    },
    CardFrozen {
        freeze_id: FreezeId,
        reason: String,
    },
    CardUnfrozen {
        freeze_id: FreezeId,
        actor: String,
    },
    FreezeRolledBack {
        freeze_id: FreezeId,
        detail: String,
    },
}

pub fn event_type_name(event: &AuditEvent) -> &'static str {
    match event {
        AuditEvent::ContextEnforced { .. } => "context_enforced",
        AuditEvent::ContextSwitched { .. } => "context_switched",
        AuditEvent::CorrelationViolation { .. } => "correlation_violation",
        AuditEvent::TransactionScored { .. } => "transaction_scored",
        AuditEvent::SpendingLimitDeclined { .. } => "spending_limit_declined",
        AuditEvent::IncidentClassified { .. } => "incident_classified",
        AuditEvent::ResponseActionExecuted { .. } => "response_action_executed",
        AuditEvent::FalsePositiveRecorded { .. } => "false_positive_recorded",
        AuditEvent::CardFrozen { .. } => "card_frozen",
        AuditEvent::CardUnfrozen { .. } => "card_unfrozen",
        AuditEvent::FreezeRolledBack { .. } => "freeze_rolled_back",
    }
}
