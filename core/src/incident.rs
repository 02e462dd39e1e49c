//! Incident classification.
//!
//! Given the cluster of recent anomaly-bearing events for one card, the
//! classifier picks an incident type, severity, confidence, and a
//! rationale. Precedence is fixed: first match wins.

use crate::detectors::{AnomalyKind, Severity, FraudAnomaly, IMPOSSIBLE_TRAVEL_MARKER};
use crate::types::{ContextHash, EventId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Row from the `fraud_event` table.
#[derive(Debug, Clone)]
pub struct FraudEventRow {
    pub event_id: EventId,
    pub context_hash: ContextHash,
    pub txn_id: String,
    pub risk_score: u32,
    pub risk_level: String,
    pub anomalies: Vec<FraudAnomaly>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    AccountTakeover,
    FraudAttempt,
    SuspiciousPattern,
}

impl IncidentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountTakeover => "account_takeover",
            Self::FraudAttempt => "fraud_attempt",
            Self::SuspiciousPattern => "suspicious_pattern",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "account_takeover" => Some(Self::AccountTakeover),
            "fraud_attempt" => Some(Self::FraudAttempt),
            "suspicious_pattern" => Some(Self::SuspiciousPattern),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IncidentSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Detected,
    Mitigated,
    Investigating,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Mitigated => "mitigated",
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "detected" => Some(Self::Detected),
            "mitigated" => Some(Self::Mitigated),
            "investigating" => Some(Self::Investigating),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub incident_type: IncidentType,
    pub severity: IncidentSeverity,
    pub confidence: f64,
    pub rationale: String,
}

/// Classify a cluster of recent events for one card.
///
/// Precedence: account takeover (burst) > impossible travel >
/// multi-signal suspicious pattern > default fraud attempt.
pub fn classify(events: &[FraudEventRow]) -> Classification {
    let max_score = events.iter().map(|e| e.risk_score).max().unwrap_or(0);
    let mean_score = if events.is_empty() {
        0.0
    } else {
        events.iter().map(|e| e.risk_score as f64).sum::<f64>() / events.len() as f64
    };

    // 1. Burst of events: account takeover.
    let anchor = events.iter().map(|e| e.occurred_at).max();
    if let Some(anchor) = anchor {
        let window_start = anchor - Duration::minutes(5);
        let burst = events
            .iter()
            .filter(|e| e.occurred_at >= window_start)
            .count();
        if burst >= 5 {
            let severity = if max_score > 80 {
                IncidentSeverity::Critical
            } else {
                IncidentSeverity::High
            };
            return Classification {
                incident_type: IncidentType::AccountTakeover,
                severity,
                confidence: 0.85,
                rationale: format!(
                    "{burst} anomalous events within 5 minutes (max score {max_score})"
                ),
            };
        }
    }

    // 2. Impossible travel anywhere in the cluster.
    let impossible = events.iter().flat_map(|e| &e.anomalies).find(|a| {
        a.kind == AnomalyKind::Geographic && a.detail.contains(IMPOSSIBLE_TRAVEL_MARKER)
    });
    if let Some(geo) = impossible {
        let severity = if geo.severity == Severity::High {
            IncidentSeverity::Critical
        } else {
            IncidentSeverity::High
        };
        return Classification {
            incident_type: IncidentType::FraudAttempt,
            severity,
            confidence: 0.75,
            rationale: format!("geographic anomaly: {}", geo.detail),
        };
    }

    // 3. Three or more distinct signal types.
    let kinds: HashSet<AnomalyKind> = events
        .iter()
        .flat_map(|e| &e.anomalies)
        .map(|a| a.kind)
        .collect();
    if kinds.len() >= 3 {
        let severity = if mean_score > 70.0 {
            IncidentSeverity::High
        } else if mean_score > 40.0 {
            IncidentSeverity::Medium
        } else {
            IncidentSeverity::Low
        };
        return Classification {
            incident_type: IncidentType::SuspiciousPattern,
            severity,
            confidence: 0.6,
            rationale: format!(
                "{} distinct anomaly types across {} events (mean score {mean_score:.0})",
                kinds.len(),
                events.len()
            ),
        };
    }

    // 4. Default.
    let severity = if max_score > 75 {
        IncidentSeverity::High
    } else {
        IncidentSeverity::Medium
    };
    Classification {
        incident_type: IncidentType::FraudAttempt,
        severity,
        confidence: 0.5,
        rationale: format!("isolated anomalous activity (max score {max_score})"),
    }
}

/// Row from the `security_incident` table.
#[derive(Debug, Clone)]
pub struct SecurityIncident {
    pub incident_id: String,
    pub context_hash: ContextHash,
    pub incident_type: IncidentType,
    pub severity: IncidentSeverity,
    pub confidence: f64,
    pub rationale: String,
    pub related_event_ids: Vec<EventId>,
    pub incident_data: serde_json::Value,
    pub status: IncidentStatus,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
