//! Shared test harness: a fully wired engine over an in-memory store,
//! with a pinned clock, seeded entropy, and scriptable fakes at every
//! external boundary.
#![allow(dead_code)]

use cardguard_core::boundary::{
    CardProcessor, CardTargetState, FeedbackSink, Notifier, TransitionToken,
};
use cardguard_core::clock::FixedClock;
use cardguard_core::config::EngineConfig;
use cardguard_core::engine::FraudEngine;
use cardguard_core::error::{FraudError, FraudResult};
use cardguard_core::rng::SeededEntropy;
use cardguard_core::store::FraudStore;
use cardguard_core::transaction::{GeoPoint, Transaction};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};

pub const NYC: GeoPoint = GeoPoint {
    lat: 40.7128,
    lon: -74.0060,
};
pub const LA: GeoPoint = GeoPoint {
    lat: 34.0522,
    lon: -118.2437,
};

/// Processor fake. Succeeds by default; `fail_next(n)` makes the next
/// n transitions fail with a remote error.
#[derive(Default)]
pub struct FakeProcessor {
    failures: Mutex<usize>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeProcessor {
    pub fn fail_next(&self, n: usize) {
        *self.failures.lock().unwrap() = n;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CardProcessor for FakeProcessor {
    fn transition(
        &self,
        card_token: &str,
        target: CardTargetState,
        _reason: &str,
        _channel: &str,
    ) -> FraudResult<TransitionToken> {
        self.calls
            .lock()
            .unwrap()
            .push((card_token.to_string(), target.as_str().to_string()));
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(FraudError::RemoteProcessor("injected failure".into()));
        }
        Ok(TransitionToken(format!("tok-{card_token}")))
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub alerts: Mutex<Vec<(String, String)>>,
    failing: Mutex<bool>,
}

impl FakeNotifier {
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

impl Notifier for FakeNotifier {
    fn send_alert(&self, card_id: &String, incident_summary: &str) -> FraudResult<()> {
        if *self.failing.lock().unwrap() {
            return Err(FraudError::RemoteProcessor("notifier down".into()));
        }
        self.alerts
            .lock()
            .unwrap()
            .push((card_id.clone(), incident_summary.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFeedback {
    pub records: Mutex<Vec<(String, String, bool)>>,
}

impl FeedbackSink for FakeFeedback {
    fn record_event_feedback(
        &self,
        card_id: &String,
        event_id: &String,
        was_false_positive: bool,
    ) -> FraudResult<()> {
        self.records
            .lock()
            .unwrap()
            .push((card_id.clone(), event_id.clone(), was_false_positive));
        Ok(())
    }
}

pub struct Harness {
    pub engine: FraudEngine,
    pub clock: Arc<FixedClock>,
    pub processor: Arc<FakeProcessor>,
    pub notifier: Arc<FakeNotifier>,
    pub feedback: Arc<FakeFeedback>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
}

pub fn build(seed: u64) -> Harness {
    build_with(seed, EngineConfig::default())
}

pub fn build_with(seed: u64, mut config: EngineConfig) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    // The anti-correlation stall is real wall-clock sleep; pointless
    // against a pinned test clock.
    config.isolation.switch_delay_min_ms = 0;
    config.isolation.switch_delay_max_ms = 0;

    let store = FraudStore::in_memory().expect("in-memory store");
    store.migrate().expect("migrations");

    let clock = Arc::new(FixedClock::new(start_time()));
    let processor = Arc::new(FakeProcessor::default());
    let notifier = Arc::new(FakeNotifier::default());
    let feedback = Arc::new(FakeFeedback::default());
    let engine = FraudEngine::build(
        config,
        store,
        clock.clone(),
        Arc::new(SeededEntropy::from_seed(seed)),
        processor.clone(),
        notifier.clone(),
        feedback.clone(),
    );
    Harness {
        engine,
        clock,
        processor,
        notifier,
        feedback,
    }
}

/// A routine retail transaction at the given instant.
pub fn txn(card_id: &str, amount: f64, at: DateTime<Utc>) -> Transaction {
    txn_at(card_id, amount, 5411, Some(NYC), at)
}

pub fn txn_at(
    card_id: &str,
    amount: f64,
    mcc: u16,
    location: Option<GeoPoint>,
    at: DateTime<Utc>,
) -> Transaction {
    Transaction {
        txn_id: uuid::Uuid::new_v4().to_string(),
        card_id: card_id.to_string(),
        amount,
        currency: "USD".to_string(),
        merchant_name: "corner-store".to_string(),
        merchant_category: mcc,
        merchant_location: location,
        occurred_at: at,
    }
}
