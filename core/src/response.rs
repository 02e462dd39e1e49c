//! Response orchestration.
//!
//! Incident state machine: detected -> (auto-response evaluation) ->
//! mitigated | investigating -> resolved. Auto-response is gated by the
//! card's smoothed false-positive rate; the rate gates automation only,
//! never manual actions. Each response action executes and records
//! independently; one failure never blocks siblings.

use crate::boundary::{FeedbackSink, Notifier};
use crate::clock::Clock;
use crate::config::ResponseConfig;
use crate::error::{FraudError, FraudResult};
use crate::event::AuditEvent;
use crate::incident::{Classification, IncidentSeverity, IncidentStatus, SecurityIncident};
use crate::lifecycle::{CardLifecycleController, FreezeReason};
use crate::store::FraudStore;
use crate::types::{CardId, ContextHash, EventId, IncidentId};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Closed set of response action kinds. Adding a kind means adding a
/// handler arm; there is no default branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseActionKind {
    CardFreeze,
    AlertUser,
    Escalate,
    Investigate,
    Mitigate,
    LogOnly,
}

impl ResponseActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardFreeze => "card_freeze",
            Self::AlertUser => "alert_user",
            Self::Escalate => "escalate",
            Self::Investigate => "investigate",
            Self::Mitigate => "mitigate",
            Self::LogOnly => "log_only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionResult {
    Success,
    Failure,
    Pending,
}

impl ActionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// Row from the `response_action` table.
#[derive(Debug, Clone)]
pub struct ResponseActionRow {
    pub action_id: String,
    pub incident_id: IncidentId,
    pub seq: i64,
    pub action_type: String,
    pub payload: serde_json::Value,
    pub result: ActionResult,
    pub details: String,
    pub executed_at: DateTime<Utc>,
}

// ── False-positive rate store ────────────────────────────────────────────────

struct RateEntry {
    rate: f64,
    updated_at: DateTime<Utc>,
}

/// Per-card smoothed false-positive rate in [0,1], with a bounded TTL.
/// Keyed, explicit, and injected, with a single writer per entry under the
/// map lock, so concurrent incidents on one card never lose an update.
pub struct FalsePositiveRates {
    step: f64,
    ttl_secs: i64,
    inner: Mutex<HashMap<ContextHash, RateEntry>>,
}

impl FalsePositiveRates {
    pub fn new(step: f64, ttl_secs: i64) -> Self {
        Self {
            step,
            ttl_secs,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, ctx: &ContextHash, now: DateTime<Utc>) -> f64 {
        let inner = self.inner.lock().unwrap();
        match inner.get(ctx) {
            Some(entry) if (now - entry.updated_at).num_seconds() < self.ttl_secs => entry.rate,
            _ => 0.0,
        }
    }

    /// Nudge the rate up by the configured step, capped at 1.0.
    pub fn bump(&self, ctx: &ContextHash, now: DateTime<Utc>) -> f64 {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.entry(ctx.clone()).or_insert(RateEntry {
            rate: 0.0,
            updated_at: now,
        });
        if (now - entry.updated_at).num_seconds() >= self.ttl_secs {
            entry.rate = 0.0;
        }
        entry.rate = (entry.rate + self.step).min(1.0);
        entry.updated_at = now;
        entry.rate
    }

    /// Test hook: pin a card's rate directly.
    pub fn set(&self, ctx: &ContextHash, rate: f64, now: DateTime<Utc>) {
        self.inner.lock().unwrap().insert(
            ctx.clone(),
            RateEntry {
                rate,
                updated_at: now,
            },
        );
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

pub struct ResponseOrchestrator {
    config: ResponseConfig,
    clock: Arc<dyn Clock>,
    lifecycle: Arc<CardLifecycleController>,
    notifier: Arc<dyn Notifier>,
    feedback: Arc<dyn FeedbackSink>,
    rates: FalsePositiveRates,
}

impl ResponseOrchestrator {
    pub fn new(
        config: ResponseConfig,
        clock: Arc<dyn Clock>,
        lifecycle: Arc<CardLifecycleController>,
        notifier: Arc<dyn Notifier>,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Self {
        let rates =
            FalsePositiveRates::new(config.false_positive_step, config.false_positive_ttl_secs);
        Self {
            config,
            clock,
            lifecycle,
            notifier,
            feedback,
            rates,
        }
    }

    pub fn rates(&self) -> &FalsePositiveRates {
        &self.rates
    }

    /// Open an incident from a classification and run the auto-response
    /// evaluation. Returns the stored incident in its post-evaluation
    /// state.
    pub fn open_incident(
        &self,
        store: &FraudStore,
        card_id: &CardId,
        ctx: &ContextHash,
        classification: &Classification,
        related_event_ids: Vec<EventId>,
        max_risk_score: u32,
    ) -> FraudResult<SecurityIncident> {
        let now = self.clock.now();
        let incident = SecurityIncident {
            incident_id: Uuid::new_v4().to_string(),
            context_hash: ctx.clone(),
            incident_type: classification.incident_type,
            severity: classification.severity,
            confidence: classification.confidence,
            rationale: classification.rationale.clone(),
            related_event_ids,
            incident_data: json!({ "max_risk_score": max_risk_score }),
            status: IncidentStatus::Detected,
            detected_at: now,
            updated_at: now,
        };
        store.insert_incident(&incident)?;
        store.append_audit(
            ctx,
            &AuditEvent::IncidentClassified {
                incident_id: incident.incident_id.clone(),
                incident_type: incident.incident_type.as_str().to_string(),
                severity: incident.severity.as_str().to_string(),
                confidence: incident.confidence,
            },
            now,
        )?;

        let fp_rate = self.rates.get(ctx, now);
        let gated = !self.config.automation_enabled
            || incident.severity < self.config.auto_severity_threshold
            || fp_rate > self.config.false_positive_ceiling;
        if gated {
            info!(
                "incident {} not auto-responded (automation={}, severity={}, fp_rate={fp_rate:.3})",
                incident.incident_id,
                self.config.automation_enabled,
                incident.severity.as_str()
            );
            store.set_incident_status(&incident.incident_id, IncidentStatus::Investigating, now)?;
            return store
                .get_incident(&incident.incident_id)?
                .ok_or_else(|| FraudError::IncidentNotFound(incident.incident_id.clone()));
        }

        self.auto_respond(store, card_id, &incident)?;
        store
            .get_incident(&incident.incident_id)?
            .ok_or_else(|| FraudError::IncidentNotFound(incident.incident_id.clone()))
    }

    /// Fire the automatic containment actions. Freeze only for critical
    /// severity; alert always; escalate only for critical when enabled.
    fn auto_respond(
        &self,
        store: &FraudStore,
        card_id: &CardId,
        incident: &SecurityIncident,
    ) -> FraudResult<()> {
        let critical = incident.severity == IncidentSeverity::Critical;
        let mut plan = Vec::new();
        if critical {
            plan.push(ResponseActionKind::CardFreeze);
        }
        plan.push(ResponseActionKind::AlertUser);
        let escalated = critical && self.config.escalation_enabled;
        if escalated {
            plan.push(ResponseActionKind::Escalate);
        }

        let mut any_success = false;
        for (seq, kind) in plan.into_iter().enumerate() {
            let result = self.execute_action(store, card_id, incident, seq as i64, kind)?;
            any_success |= result == ActionResult::Success;
        }

        // Escalated incidents stay open for a human; otherwise a
        // successful containment mitigates, and total failure leaves the
        // incident under investigation.
        let status = if escalated || !any_success {
            IncidentStatus::Investigating
        } else {
            IncidentStatus::Mitigated
        };
        store.set_incident_status(&incident.incident_id, status, self.clock.now())?;
        Ok(())
    }

    /// Execute one action and record its outcome. Only storage failures
    /// propagate; the action's own failure is captured in its row.
    pub fn execute_action(
        &self,
        store: &FraudStore,
        card_id: &CardId,
        incident: &SecurityIncident,
        seq: i64,
        kind: ResponseActionKind,
    ) -> FraudResult<ActionResult> {
        let (result, details) = match kind {
            ResponseActionKind::CardFreeze => {
                match self.lifecycle.freeze(
                    store,
                    card_id,
                    FreezeReason::FraudDetected,
                    incident.related_event_ids.first().cloned(),
                ) {
                    Ok(record) => (
                        ActionResult::Success,
                        format!("freeze {} opened", record.freeze_id),
                    ),
                    // Already contained counts as containment.
                    Err(FraudError::AlreadyFrozen) => {
                        (ActionResult::Success, "card already frozen".to_string())
                    }
                    Err(e) => {
                        warn!("card_freeze failed for incident {}: {e}", incident.incident_id);
                        (ActionResult::Failure, e.to_string())
                    }
                }
            }
            ResponseActionKind::AlertUser => {
                let summary = format!(
                    "{} ({}): {}",
                    incident.incident_type.as_str(),
                    incident.severity.as_str(),
                    incident.rationale
                );
                match self.notifier.send_alert(card_id, &summary) {
                    Ok(()) => (ActionResult::Success, "alert dispatched".to_string()),
                    Err(e) => {
                        // Fire-and-forget boundary: log, never escalate.
                        warn!("alert delivery failed: {e}");
                        (ActionResult::Failure, e.to_string())
                    }
                }
            }
            ResponseActionKind::Escalate => (
                ActionResult::Success,
                "escalated for human investigation".to_string(),
            ),
            ResponseActionKind::Investigate => {
                store.set_incident_status(
                    &incident.incident_id,
                    IncidentStatus::Investigating,
                    self.clock.now(),
                )?;
                (ActionResult::Success, "marked investigating".to_string())
            }
            ResponseActionKind::Mitigate => {
                store.set_incident_status(
                    &incident.incident_id,
                    IncidentStatus::Mitigated,
                    self.clock.now(),
                )?;
                (ActionResult::Success, "marked mitigated".to_string())
            }
            ResponseActionKind::LogOnly => {
                info!(
                    "incident {} logged without action: {}",
                    incident.incident_id, incident.rationale
                );
                (ActionResult::Success, "logged".to_string())
            }
        };

        let now = self.clock.now();
        store.insert_response_action(&ResponseActionRow {
            action_id: Uuid::new_v4().to_string(),
            incident_id: incident.incident_id.clone(),
            seq,
            action_type: kind.as_str().to_string(),
            payload: json!({ "severity": incident.severity.as_str() }),
            result,
            details,
            executed_at: now,
        })?;
        store.append_audit(
            &incident.context_hash,
            &AuditEvent::ResponseActionExecuted {
                incident_id: incident.incident_id.clone(),
                action_type: kind.as_str().to_string(),
                result: result.as_str().to_string(),
            },
            now,
        )?;
        Ok(result)
    }

    /// Resolve an incident as a false positive: raise the card's smoothed
    /// rate by the configured step and emit calibration feedback for each
    /// related anomaly event.
    pub fn record_false_positive(
        &self,
        store: &FraudStore,
        incident_id: &IncidentId,
        card_id: &CardId,
    ) -> FraudResult<f64> {
        let incident = store
            .get_incident(incident_id)?
            .ok_or_else(|| FraudError::IncidentNotFound(incident_id.clone()))?;
        let now = self.clock.now();
        store.set_incident_status(incident_id, IncidentStatus::Resolved, now)?;

        let new_rate = self.rates.bump(&incident.context_hash, now);
        for event_id in &incident.related_event_ids {
            if let Err(e) = self
                .feedback
                .record_event_feedback(card_id, event_id, true)
            {
                warn!("feedback emit failed for event {event_id}: {e}");
            }
        }
        store.append_audit(
            &incident.context_hash,
            &AuditEvent::FalsePositiveRecorded {
                incident_id: incident_id.clone(),
                new_rate,
            },
            now,
        )?;
        Ok(new_rate)
    }
}
