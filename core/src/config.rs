//! Engine configuration.
//!
//! Every tunable lives here with the documented default. The runner can
//! load overrides from a JSON file; absent fields fall back to defaults
//! via `#[serde(default)]`.

use crate::incident::IncidentSeverity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Lifetime of an enforced context before re-derivation (seconds).
    pub context_ttl_secs: i64,
    /// Anti-correlation stall bounds for switch_context (milliseconds).
    pub switch_delay_min_ms: u64,
    pub switch_delay_max_ms: u64,
    /// Trailing window for the cross-context correlation check (seconds).
    pub correlation_window_secs: i64,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            context_ttl_secs: 900,
            switch_delay_min_ms: 500,
            switch_delay_max_ms: 1500,
            correlation_window_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Fast-cache TTL for a rebuilt pattern (seconds).
    pub cache_ttl_secs: i64,
    /// Max transactions read from the durable store on a rebuild.
    pub rebuild_limit: usize,
    /// Below this sample count the amount/geo detectors abstain.
    pub min_samples: u64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            rebuild_limit: 100,
            min_samples: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Velocity sliding window (seconds) and the count that trips it.
    pub velocity_window_secs: i64,
    pub velocity_threshold: usize,
    /// Amount multipliers over the rolling average.
    pub amount_medium_multiplier: f64,
    pub amount_high_multiplier: f64,
    /// Geographic thresholds: miles from last location, implied mph.
    pub geo_distance_miles: f64,
    pub geo_impossible_mph: f64,
    /// Merchant category codes treated as high risk.
    pub high_risk_mccs: HashSet<u16>,
    /// Sample count needed before "novel category" fires.
    pub novel_category_min_samples: u64,
    /// Late-night window, inclusive hours.
    pub late_night_start_hour: u32,
    pub late_night_end_hour: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            velocity_window_secs: 300,
            velocity_threshold: 5,
            amount_medium_multiplier: 3.0,
            amount_high_multiplier: 6.0,
            geo_distance_miles: 500.0,
            geo_impossible_mph: 600.0,
            // Gambling/betting, pawn, direct-marketing (MLM), dating.
            high_risk_mccs: [7995, 7800, 7801, 7802, 5933, 5962, 5966, 5967, 7273]
                .into_iter()
                .collect(),
            novel_category_min_samples: 10,
            late_night_start_hour: 2,
            late_night_end_hour: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Risk-level thresholds (severity communication).
    pub level_critical: u32,
    pub level_high: u32,
    pub level_medium: u32,
    /// Recommended-action thresholds (operational response).
    /// Deliberately a separate scale from the levels above; never merge.
    pub action_decline: u32,
    pub action_freeze: u32,
    pub action_alert: u32,
    /// Scores at or above this enter the incident path.
    pub incident_threshold: u32,
    /// Analysis results are served from cache this long (seconds).
    pub result_cache_ttl_secs: i64,
    /// Budget before a latency warning is logged (milliseconds).
    pub analysis_budget_ms: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            level_critical: 75,
            level_high: 50,
            level_medium: 25,
            action_decline: 90,
            action_freeze: 75,
            action_alert: 50,
            incident_threshold: 50,
            result_cache_ttl_secs: 60,
            analysis_budget_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub automation_enabled: bool,
    /// Minimum incident severity that may auto-respond.
    pub auto_severity_threshold: IncidentSeverity,
    /// Smoothed false-positive rate above which automation stands down.
    pub false_positive_ceiling: f64,
    /// Increment applied per confirmed false positive, capped at 1.0.
    pub false_positive_step: f64,
    /// Lifetime of a card's smoothed rate entry (seconds).
    pub false_positive_ttl_secs: i64,
    pub escalation_enabled: bool,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            automation_enabled: true,
            auto_severity_threshold: IncidentSeverity::High,
            false_positive_ceiling: 0.10,
            false_positive_step: 0.01,
            false_positive_ttl_secs: 86_400,
            escalation_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Temporary freezes older than this are released by the sweep (seconds).
    pub auto_release_secs: i64,
    /// Sweep cadence, consumed by the runner (seconds).
    pub sweep_interval_secs: u64,
    /// Hard deadline for a processor call (milliseconds).
    pub processor_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            auto_release_secs: 86_400,
            sweep_interval_secs: 3600,
            processor_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Cool-down before a half-open trial call (seconds).
    pub cool_down_secs: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub isolation: IsolationConfig,
    pub pattern: PatternConfig,
    pub detector: DetectorConfig,
    pub scoring: ScoringConfig,
    pub response: ResponseConfig,
    pub lifecycle: LifecycleConfig,
    pub breaker: BreakerConfig,
}

impl EngineConfig {
    /// Load overrides from a JSON file, falling back to defaults for
    /// any field the file omits.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
