//! End-to-end analysis pipeline tests: detector behavior through the
//! engine, scoring, fraud-event persistence, and spending caps.

mod common;

use cardguard_core::detectors::{AnomalyKind, Severity};
use cardguard_core::error::FraudError;
use cardguard_core::scoring::{RecommendedAction, RiskLevel};
use chrono::Duration;
use common::{build, start_time, txn, txn_at, LA, NYC};

/// A card with no history gives the detectors nothing to compare
/// against; the first transaction scores zero.
#[test]
fn cold_card_scores_zero() {
    let h = build(7);
    let result = h
        .engine
        .analyze(&txn("card-cold", 42.0, start_time()))
        .unwrap();

    assert_eq!(result.risk_score, 0);
    assert_eq!(result.risk_level, RiskLevel::Low);
    assert_eq!(result.recommended_action, RecommendedAction::None);
    assert!(result.anomalies.is_empty());
    assert_eq!(h.engine.store().total_fraud_event_count().unwrap(), 0);
}

/// Six transactions inside five minutes breach the velocity window.
#[test]
fn rapid_burst_trips_velocity() {
    let h = build(11);
    let mut at = start_time();
    let mut last = None;
    for _ in 0..6 {
        last = Some(h.engine.analyze(&txn("card-burst", 25.0, at)).unwrap());
        at += Duration::seconds(30);
        h.clock.set(at);
    }

    let result = last.unwrap();
    assert!(
        result
            .anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::Velocity),
        "expected a velocity anomaly, got {:?}",
        result.anomalies
    );
    assert!(
        result.risk_score >= 50,
        "velocity burst should score at least 50, got {}",
        result.risk_score
    );
    // One fraud event, classified into one incident, alerted.
    assert_eq!(h.engine.store().total_fraud_event_count().unwrap(), 1);
    assert_eq!(h.engine.store().total_incident_count().unwrap(), 1);
    assert_eq!(h.notifier.alert_count(), 1);
}

/// A 10x outlier against twenty settled samples is a high-severity
/// amount anomaly.
#[test]
fn amount_outlier_flagged_high() {
    let h = build(13);
    let mut at = start_time();
    for _ in 0..20 {
        h.engine.analyze(&txn("card-amt", 50.0, at)).unwrap();
        at += Duration::minutes(10);
        h.clock.set(at);
    }

    let result = h.engine.analyze(&txn("card-amt", 500.0, at)).unwrap();
    let amount = result
        .anomalies
        .iter()
        .find(|a| a.kind == AnomalyKind::Amount)
        .expect("amount anomaly");
    assert_eq!(amount.severity, Severity::High);
    assert!(result.risk_score >= 50, "got {}", result.risk_score);
}

/// New York to Los Angeles in sixty seconds is impossible travel:
/// critical incident, card frozen automatically.
#[test]
fn impossible_travel_freezes_card() {
    let h = build(17);
    let mut at = start_time();
    for _ in 0..5 {
        h.engine.analyze(&txn("card-geo", 30.0, at)).unwrap();
        at += Duration::minutes(10);
        h.clock.set(at);
    }

    at += Duration::seconds(60);
    h.clock.set(at);
    let result = h
        .engine
        .analyze(&txn_at("card-geo", 30.0, 5411, Some(LA), at))
        .unwrap();

    let geo = result
        .anomalies
        .iter()
        .find(|a| a.kind == AnomalyKind::Geographic)
        .expect("geographic anomaly");
    assert_eq!(geo.severity, Severity::High);
    assert!(geo.detail.contains("impossible travel"), "{}", geo.detail);

    // Critical classification fires the full containment plan.
    assert_eq!(h.engine.store().total_incident_count().unwrap(), 1);
    assert_eq!(h.processor.call_count(), 1);
    assert_eq!(h.notifier.alert_count(), 1);
    let ctx = h
        .engine
        .isolation()
        .enforce(h.engine.store(), &"card-geo".to_string())
        .unwrap()
        .context_hash;
    assert!(h.engine.store().get_open_freeze(&ctx).unwrap().is_some());
}

/// Gambling-class merchant codes are flagged even with zero history.
#[test]
fn high_risk_merchant_flagged_cold() {
    let h = build(19);
    let result = h
        .engine
        .analyze(&txn_at("card-mcc", 60.0, 7995, Some(NYC), start_time()))
        .unwrap();

    let merchant = result
        .anomalies
        .iter()
        .find(|a| a.kind == AnomalyKind::Merchant)
        .expect("merchant anomaly");
    assert_eq!(merchant.severity, Severity::Medium);
    // Flagged and persisted, but nowhere near the incident threshold.
    assert_eq!(h.engine.store().total_fraud_event_count().unwrap(), 1);
    assert_eq!(h.engine.store().total_incident_count().unwrap(), 0);
}

/// Late-night activity is a weak pattern signal, not an incident.
#[test]
fn late_night_is_weak_signal() {
    let h = build(23);
    let at = start_time() + Duration::hours(15); // 03:00 UTC
    h.clock.set(at);
    let result = h.engine.analyze(&txn("card-night", 20.0, at)).unwrap();

    assert!(result
        .anomalies
        .iter()
        .any(|a| a.kind == AnomalyKind::Pattern));
    assert!(result.risk_score < 25, "got {}", result.risk_score);
    assert_eq!(result.recommended_action, RecommendedAction::None);
}

/// Timestamps beyond clock-skew tolerance are rejected outright.
#[test]
fn future_timestamp_rejected() {
    let h = build(29);
    let err = h
        .engine
        .analyze(&txn("card-skew", 10.0, start_time() + Duration::minutes(6)))
        .unwrap_err();
    assert!(matches!(err, FraudError::Validation(_)), "{err}");
}

/// Re-analyzing the same transaction id serves the cached verdict
/// instead of re-counting it into the velocity window.
#[test]
fn repeat_analysis_is_cached() {
    let h = build(31);
    let tx = txn("card-cache", 42.0, start_time());
    let first = h.engine.analyze(&tx).unwrap();
    let second = h.engine.analyze(&tx).unwrap();

    assert_eq!(first.risk_score, second.risk_score);
    assert_eq!(first.analyzed_at, second.analyzed_at);
    // Only the first pass persisted anything.
    assert_eq!(
        h.engine
            .store()
            .recent_transactions(
                &h.engine
                    .isolation()
                    .enforce(h.engine.store(), &"card-cache".to_string())
                    .unwrap()
                    .context_hash,
                10
            )
            .unwrap()
            .len(),
        1
    );
}

/// Per-transaction caps decline before any detector runs.
#[test]
fn per_txn_cap_declines() {
    let h = build(37);
    let ctx = h
        .engine
        .isolation()
        .enforce(h.engine.store(), &"card-cap".to_string())
        .unwrap()
        .context_hash;
    h.engine
        .store()
        .set_spending_limits(&ctx, Some(100.0), None, None)
        .unwrap();

    let err = h
        .engine
        .analyze(&txn("card-cap", 150.0, start_time()))
        .unwrap_err();
    assert!(matches!(err, FraudError::Validation(_)), "{err}");
    assert_eq!(
        h.engine
            .store()
            .audit_count(&ctx, "spending_limit_declined")
            .unwrap(),
        1
    );
    // Nothing was persisted for the declined transaction.
    assert_eq!(h.engine.store().total_fraud_event_count().unwrap(), 0);
}

/// Daily caps accumulate across allowed transactions and reset is
/// driven by the transaction day, not wall clock.
#[test]
fn daily_cap_accumulates_and_resets() {
    let h = build(41);
    let ctx = h
        .engine
        .isolation()
        .enforce(h.engine.store(), &"card-daily".to_string())
        .unwrap()
        .context_hash;
    h.engine
        .store()
        .set_spending_limits(&ctx, None, Some(200.0), None)
        .unwrap();

    let mut at = start_time();
    h.engine.analyze(&txn("card-daily", 90.0, at)).unwrap();
    at += Duration::minutes(10);
    h.clock.set(at);
    h.engine.analyze(&txn("card-daily", 90.0, at)).unwrap();
    at += Duration::minutes(10);
    h.clock.set(at);
    let err = h
        .engine
        .analyze(&txn("card-daily", 90.0, at))
        .unwrap_err();
    assert!(matches!(err, FraudError::Validation(_)), "{err}");

    // Next day the counter starts over.
    at += Duration::days(1);
    h.clock.set(at);
    h.engine.analyze(&txn("card-daily", 90.0, at)).unwrap();
}
