//! Risk scorer: weighted aggregation of anomaly findings into a single
//! 0–100 score, a risk level, and a recommended action.
//!
//! The level thresholds and the action thresholds are two deliberately
//! independent scales over the same score. The level communicates
//! severity; the action encodes the operational response. Do not merge
//! them.

use crate::config::ScoringConfig;
use crate::detectors::{AnomalyKind, FraudAnomaly};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    None,
    Alert,
    Freeze,
    Decline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAnalysisResult {
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub anomalies: Vec<FraudAnomaly>,
    pub recommended_action: RecommendedAction,
    pub analyzed_at: DateTime<Utc>,
}

fn type_weight(kind: AnomalyKind) -> f64 {
    match kind {
        AnomalyKind::Velocity => 3.0,
        AnomalyKind::Amount => 2.5,
        AnomalyKind::Geographic => 2.5,
        AnomalyKind::Merchant => 1.5,
        AnomalyKind::Pattern => 1.0,
    }
}

/// Score a set of findings. Zero anomalies scores 0. Each anomaly
/// contributes severity weight (1/2/3) x type weight x confidence x 10;
/// the clamped sum is the score, so the score is monotone in any single
/// anomaly's severity or confidence.
pub fn score_anomalies(
    anomalies: &[FraudAnomaly],
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> FraudAnalysisResult {
    let total: f64 = anomalies
        .iter()
        .map(|a| a.severity.weight() * type_weight(a.kind) * a.confidence * 10.0)
        .sum();
    let risk_score = total.round().clamp(0.0, 100.0) as u32;

    let risk_level = if risk_score >= config.level_critical {
        RiskLevel::Critical
    } else if risk_score >= config.level_high {
        RiskLevel::High
    } else if risk_score >= config.level_medium {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    let recommended_action = if risk_score >= config.action_decline {
        RecommendedAction::Decline
    } else if risk_score >= config.action_freeze {
        RecommendedAction::Freeze
    } else if risk_score >= config.action_alert {
        RecommendedAction::Alert
    } else {
        RecommendedAction::None
    };

    FraudAnalysisResult {
        risk_score,
        risk_level,
        anomalies: anomalies.to_vec(),
        recommended_action,
        analyzed_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::Severity;

    fn anomaly(kind: AnomalyKind, severity: Severity, confidence: f64) -> FraudAnomaly {
        FraudAnomaly {
            kind,
            severity,
            detail: String::new(),
            confidence,
        }
    }

    #[test]
    fn empty_set_scores_zero() {
        let r = score_anomalies(&[], &ScoringConfig::default(), Utc::now());
        assert_eq!(r.risk_score, 0);
        assert_eq!(r.risk_level, RiskLevel::Low);
        assert_eq!(r.recommended_action, RecommendedAction::None);
    }

    #[test]
    fn velocity_alone_breaches_fifty() {
        // 3 (severity) x 3 (type) x 0.9 x 10 = 81.
        let r = score_anomalies(
            &[anomaly(AnomalyKind::Velocity, Severity::High, 0.9)],
            &ScoringConfig::default(),
            Utc::now(),
        );
        assert_eq!(r.risk_score, 81);
        assert!(r.risk_score >= 50);
        assert_eq!(r.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn score_monotone_in_confidence_and_severity() {
        let cfg = ScoringConfig::default();
        let base = score_anomalies(
            &[
                anomaly(AnomalyKind::Amount, Severity::Medium, 0.5),
                anomaly(AnomalyKind::Merchant, Severity::Low, 0.5),
            ],
            &cfg,
            Utc::now(),
        )
        .risk_score;
        let more_confident = score_anomalies(
            &[
                anomaly(AnomalyKind::Amount, Severity::Medium, 0.8),
                anomaly(AnomalyKind::Merchant, Severity::Low, 0.5),
            ],
            &cfg,
            Utc::now(),
        )
        .risk_score;
        let more_severe = score_anomalies(
            &[
                anomaly(AnomalyKind::Amount, Severity::High, 0.5),
                anomaly(AnomalyKind::Merchant, Severity::Low, 0.5),
            ],
            &cfg,
            Utc::now(),
        )
        .risk_score;
        assert!(more_confident >= base);
        assert!(more_severe >= base);
    }

    #[test]
    fn amount_high_plus_geo_medium_recommends_freeze() {
        // 3 x 2.5 x 0.8 x 10 = 60, plus 2 x 2.5 x 0.7 x 10 = 35 => 95.
        let r = score_anomalies(
            &[
                anomaly(AnomalyKind::Amount, Severity::High, 0.8),
                anomaly(AnomalyKind::Geographic, Severity::Medium, 0.7),
            ],
            &ScoringConfig::default(),
            Utc::now(),
        );
        assert!(r.risk_score >= 75);
        assert!(matches!(
            r.recommended_action,
            RecommendedAction::Freeze | RecommendedAction::Decline
        ));
    }
}
