//! The five anomaly detectors.
//!
//! RULES:
//!   - Each check is independent: no detector sees another's output,
//!     so results are deterministic regardless of execution order.
//!   - Each check returns zero or one finding.
//!   - A detector error never aborts the analysis; the engine logs it
//!     and treats the detector as abstaining.
//!   - Cold cards (below the sample minimum) make the amount and
//!     geographic checks abstain rather than guess.

use crate::config::{DetectorConfig, PatternConfig};
use crate::error::FraudResult;
use crate::pattern::TransactionPattern;
use crate::transaction::{GeoPoint, Transaction};
use crate::types::ContextHash;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Detail marker the incident classifier keys on.
pub const IMPOSSIBLE_TRAVEL_MARKER: &str = "impossible travel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Velocity,
    Amount,
    Geographic,
    Merchant,
    Pattern,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Velocity => "velocity",
            Self::Amount => "amount",
            Self::Geographic => "geographic",
            Self::Merchant => "merchant",
            Self::Pattern => "pattern",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn weight(&self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 2.0,
            Self::High => 3.0,
        }
    }
}

/// A single finding. Produced once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAnomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub detail: String,
    pub confidence: f64,
}

/// Everything a detector may look at: one transaction and one immutable
/// pattern snapshot.
pub struct DetectorInput<'a> {
    pub context: &'a ContextHash,
    pub transaction: &'a Transaction,
    pub pattern: Option<&'a TransactionPattern>,
}

pub trait AnomalyDetector: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, input: &DetectorInput<'_>) -> FraudResult<Option<FraudAnomaly>>;
}

// ── Velocity ─────────────────────────────────────────────────────────────────

/// Sliding per-card window of transaction timestamps. The window lives
/// in memory only; it is the one detector that carries state between
/// calls, keyed by context hash.
pub struct VelocityDetector {
    window_secs: i64,
    threshold: usize,
    windows: Mutex<HashMap<ContextHash, VecDeque<DateTime<Utc>>>>,
}

impl VelocityDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            window_secs: config.velocity_window_secs,
            threshold: config.velocity_threshold,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl AnomalyDetector for VelocityDetector {
    fn name(&self) -> &'static str {
        "velocity"
    }

    fn check(&self, input: &DetectorInput<'_>) -> FraudResult<Option<FraudAnomaly>> {
        let at = input.transaction.occurred_at;
        let cutoff = at - chrono::Duration::seconds(self.window_secs);

        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(input.context.clone()).or_default();
        while window.front().is_some_and(|t| *t < cutoff) {
            window.pop_front();
        }
        window.push_back(at);
        let count = window.len();

        if count > self.threshold {
            return Ok(Some(FraudAnomaly {
                kind: AnomalyKind::Velocity,
                severity: Severity::High,
                detail: format!(
                    "{count} transactions in the last {} seconds (limit {})",
                    self.window_secs, self.threshold
                ),
                confidence: 0.9,
            }));
        }
        Ok(None)
    }
}

// ── Amount ───────────────────────────────────────────────────────────────────

pub struct AmountDetector {
    medium_multiplier: f64,
    high_multiplier: f64,
    min_samples: u64,
}

impl AmountDetector {
    pub fn new(config: &DetectorConfig, pattern: &PatternConfig) -> Self {
        Self {
            medium_multiplier: config.amount_medium_multiplier,
            high_multiplier: config.amount_high_multiplier,
            min_samples: pattern.min_samples,
        }
    }
}

impl AnomalyDetector for AmountDetector {
    fn name(&self) -> &'static str {
        "amount"
    }

    fn check(&self, input: &DetectorInput<'_>) -> FraudResult<Option<FraudAnomaly>> {
        let Some(pattern) = input.pattern else {
            return Ok(None);
        };
        if pattern.sample_count < self.min_samples || pattern.avg_amount <= 0.0 {
            return Ok(None);
        }

        let ratio = input.transaction.amount / pattern.avg_amount;
        if ratio <= self.medium_multiplier {
            return Ok(None);
        }
        let severity = if ratio > self.high_multiplier {
            Severity::High
        } else {
            Severity::Medium
        };
        Ok(Some(FraudAnomaly {
            kind: AnomalyKind::Amount,
            severity,
            detail: format!(
                "amount {:.2} is {ratio:.1}x the rolling average {:.2} ({} samples)",
                input.transaction.amount, pattern.avg_amount, pattern.sample_count
            ),
            confidence: 0.8,
        }))
    }
}

// ── Geographic ───────────────────────────────────────────────────────────────

/// Earth radius in miles for the haversine distance.
const EARTH_RADIUS_MILES: f64 = 3959.0;

pub fn haversine_miles(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * h.sqrt().asin()
}

pub struct GeographicDetector {
    distance_miles: f64,
    impossible_mph: f64,
    min_samples: u64,
}

impl GeographicDetector {
    pub fn new(config: &DetectorConfig, pattern: &PatternConfig) -> Self {
        Self {
            distance_miles: config.geo_distance_miles,
            impossible_mph: config.geo_impossible_mph,
            min_samples: pattern.min_samples,
        }
    }
}

impl AnomalyDetector for GeographicDetector {
    fn name(&self) -> &'static str {
        "geographic"
    }

    fn check(&self, input: &DetectorInput<'_>) -> FraudResult<Option<FraudAnomaly>> {
        let Some(here) = &input.transaction.merchant_location else {
            return Ok(None);
        };
        let Some(pattern) = input.pattern else {
            return Ok(None);
        };
        if pattern.sample_count < self.min_samples {
            return Ok(None);
        }
        let (Some(last), Some(last_seen)) = (&pattern.last_location, pattern.last_seen) else {
            return Ok(None);
        };

        let distance = haversine_miles(last, here);
        if distance <= self.distance_miles {
            return Ok(None);
        }

        let elapsed_hours =
            ((input.transaction.occurred_at - last_seen).num_seconds().max(1) as f64) / 3600.0;
        let speed = distance / elapsed_hours;
        if speed > self.impossible_mph {
            return Ok(Some(FraudAnomaly {
                kind: AnomalyKind::Geographic,
                severity: Severity::High,
                detail: format!(
                    "{IMPOSSIBLE_TRAVEL_MARKER}: {distance:.0} miles at an implied {speed:.0} mph"
                ),
                confidence: 0.95,
            }));
        }
        Ok(Some(FraudAnomaly {
            kind: AnomalyKind::Geographic,
            severity: Severity::Medium,
            detail: format!("{distance:.0} miles from last known merchant location"),
            confidence: 0.7,
        }))
    }
}

// ── Merchant category ────────────────────────────────────────────────────────

pub struct MerchantDetector {
    high_risk_mccs: std::collections::HashSet<u16>,
    novel_min_samples: u64,
}

impl MerchantDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            high_risk_mccs: config.high_risk_mccs.clone(),
            novel_min_samples: config.novel_category_min_samples,
        }
    }
}

impl AnomalyDetector for MerchantDetector {
    fn name(&self) -> &'static str {
        "merchant"
    }

    fn check(&self, input: &DetectorInput<'_>) -> FraudResult<Option<FraudAnomaly>> {
        let mcc = input.transaction.merchant_category;
        if self.high_risk_mccs.contains(&mcc) {
            return Ok(Some(FraudAnomaly {
                kind: AnomalyKind::Merchant,
                severity: Severity::Medium,
                detail: format!("high-risk merchant category {mcc}"),
                confidence: 0.6,
            }));
        }
        if let Some(pattern) = input.pattern {
            if pattern.sample_count >= self.novel_min_samples && !pattern.seen_category(mcc) {
                return Ok(Some(FraudAnomaly {
                    kind: AnomalyKind::Merchant,
                    severity: Severity::Low,
                    detail: format!(
                        "novel category {mcc} after {} transactions",
                        pattern.sample_count
                    ),
                    confidence: 0.5,
                }));
            }
        }
        Ok(None)
    }
}

// ── Temporal pattern ─────────────────────────────────────────────────────────

pub struct TemporalDetector {
    start_hour: u32,
    end_hour: u32,
}

impl TemporalDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            start_hour: config.late_night_start_hour,
            end_hour: config.late_night_end_hour,
        }
    }
}

impl AnomalyDetector for TemporalDetector {
    fn name(&self) -> &'static str {
        "temporal"
    }

    fn check(&self, input: &DetectorInput<'_>) -> FraudResult<Option<FraudAnomaly>> {
        let hour = input.transaction.occurred_at.hour();
        if hour >= self.start_hour && hour <= self.end_hour {
            return Ok(Some(FraudAnomaly {
                kind: AnomalyKind::Pattern,
                severity: Severity::Low,
                detail: format!("late-night transaction at hour {hour}"),
                confidence: 0.4,
            }));
        }
        Ok(None)
    }
}

/// The full production detector set, in a stable order. Execution order
/// is irrelevant to the outcome; the ordering here only fixes log and
/// result presentation.
pub fn default_detectors(
    config: &DetectorConfig,
    pattern: &PatternConfig,
) -> Vec<Box<dyn AnomalyDetector>> {
    vec![
        Box::new(VelocityDetector::new(config)),
        Box::new(AmountDetector::new(config, pattern)),
        Box::new(GeographicDetector::new(config, pattern)),
        Box::new(MerchantDetector::new(config)),
        Box::new(TemporalDetector::new(config)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // New York to Los Angeles, roughly 2445 miles.
        let nyc = GeoPoint {
            lat: 40.7128,
            lon: -74.0060,
        };
        let la = GeoPoint {
            lat: 34.0522,
            lon: -118.2437,
        };
        let d = haversine_miles(&nyc, &la);
        assert!((d - 2445.0).abs() < 15.0, "got {d}");
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = GeoPoint { lat: 51.5, lon: -0.12 };
        assert!(haversine_miles(&p, &p) < 1e-9);
    }
}
