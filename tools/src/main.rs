//! guard-runner: headless traffic runner for the cardguard engine.
//!
//! Usage:
//!   guard-runner --seed 12345 --cards 20 --txns 500 --db run.db
//!   guard-runner --scenario traffic.jsonl --config engine.json

use anyhow::{Context, Result};
use cardguard_core::boundary::{
    CardProcessor, CardTargetState, LogFeedbackSink, LogNotifier, TransitionToken,
};
use cardguard_core::clock::SystemClock;
use cardguard_core::config::EngineConfig;
use cardguard_core::engine::FraudEngine;
use cardguard_core::error::{FraudError, FraudResult};
use cardguard_core::rng::{Entropy, SeededEntropy};
use cardguard_core::store::FraudStore;
use cardguard_core::transaction::{GeoPoint, Transaction};
use chrono::Utc;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Processor stub that acknowledges every transition. The runner has no
/// real issuing processor behind it.
struct AckProcessor;

impl CardProcessor for AckProcessor {
    fn transition(
        &self,
        card_token: &str,
        target: CardTargetState,
        _reason: &str,
        _channel: &str,
    ) -> FraudResult<TransitionToken> {
        Ok(TransitionToken(format!(
            "ack-{}-{card_token}",
            target.as_str().to_lowercase()
        )))
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = args
        .windows(2)
        .find(|w| w[0] == "--seed")
        .and_then(|w| w[1].parse().ok());
    let cards = parse_arg(&args, "--cards", 10usize);
    let txns = parse_arg(&args, "--txns", 200usize);
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let scenario = args
        .windows(2)
        .find(|w| w[0] == "--scenario")
        .map(|w| w[1].as_str());
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].as_str());

    // Unseeded runs still print a seed so they can be replayed.
    let entropy = match seed {
        Some(s) => SeededEntropy::from_seed(s),
        None => SeededEntropy::from_os(),
    };
    let seed = seed.unwrap_or_else(|| entropy.next_u64());

    println!("cardguard guard-runner");
    println!("  seed:     {seed}");
    println!("  db:       {db}");
    match scenario {
        Some(path) => println!("  scenario: {path}"),
        None => println!("  traffic:  {txns} synthetic txns across {cards} cards"),
    }
    println!();

    let mut config = match config_path {
        Some(path) => EngineConfig::load(Path::new(path))
            .with_context(|| format!("loading config from {path}"))?,
        None => EngineConfig::default(),
    };
    // Context-switch stalls are an online defense; a batch runner would
    // spend most of its wall clock sleeping through them.
    config.isolation.switch_delay_min_ms = 0;
    config.isolation.switch_delay_max_ms = 0;

    let store = if db == ":memory:" {
        FraudStore::in_memory()?
    } else {
        FraudStore::open(db)?
    };
    store.migrate()?;

    let sweep_every = config.lifecycle.sweep_interval_secs.max(1) as usize;
    let engine = FraudEngine::build(
        config,
        store,
        Arc::new(SystemClock),
        Arc::new(entropy),
        Arc::new(AckProcessor),
        Arc::new(LogNotifier),
        Arc::new(LogFeedbackSink),
    );

    let feed = match scenario {
        Some(path) => load_scenario(path)?,
        None => synthesize_traffic(seed, cards, txns),
    };

    let mut scored = 0usize;
    let mut declined = 0usize;
    let mut errors = 0usize;
    for (i, tx) in feed.iter().enumerate() {
        match engine.analyze(tx) {
            Ok(result) => {
                scored += 1;
                info!(
                    "txn {} scored {} ({:?})",
                    tx.txn_id, result.risk_score, result.recommended_action
                );
            }
            Err(FraudError::Validation(reason)) => {
                declined += 1;
                warn!("txn {} declined: {reason}", tx.txn_id);
            }
            Err(e) => {
                errors += 1;
                warn!("txn {} failed: {e}", tx.txn_id);
            }
        }
        // A long-lived deployment runs the sweep on a timer; the runner
        // piggybacks it on traffic volume instead.
        if (i + 1) % sweep_every == 0 {
            let released = engine.run_auto_release_sweep()?;
            if released > 0 {
                info!("auto-release sweep freed {released} cards");
            }
        }
    }

    print_summary(&engine, scored, declined, errors)?;
    Ok(())
}

fn load_scenario(path: &str) -> Result<Vec<Transaction>> {
    let file = File::open(path).with_context(|| format!("opening scenario {path}"))?;
    let mut feed = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let tx: Transaction = serde_json::from_str(&line)
            .with_context(|| format!("{path}:{} is not a transaction", lineno + 1))?;
        feed.push(tx);
    }
    Ok(feed)
}

/// Deterministic synthetic traffic: mostly routine retail spend, with a
/// small slice of late-night, high-risk-merchant, and outlier-amount
/// transactions so the detectors see something to flag.
fn synthesize_traffic(seed: u64, cards: usize, txns: usize) -> Vec<Transaction> {
    const ROUTINE_MCCS: [u16; 5] = [5411, 5812, 5541, 5912, 5999];
    const RISKY_MCCS: [u16; 3] = [7995, 5967, 7273];
    const CITIES: [(f64, f64); 4] = [
        (40.7128, -74.0060),
        (41.8781, -87.6298),
        (34.0522, -118.2437),
        (47.6062, -122.3321),
    ];

    let mut rng = StdRng::seed_from_u64(seed);
    let card_ids: Vec<String> = (0..cards).map(|i| format!("card-{seed}-{i:03}")).collect();
    let start = Utc::now() - chrono::Duration::hours(2);

    let mut feed = Vec::with_capacity(txns);
    for i in 0..txns {
        let card_id = card_ids[rng.gen_range(0..card_ids.len())].clone();
        let roll: f64 = rng.gen();
        let (amount, mcc) = if roll < 0.05 {
            // Outlier spend
            (rng.gen_range(800.0..3000.0), 5999)
        } else if roll < 0.10 {
            (
                rng.gen_range(20.0..200.0),
                RISKY_MCCS[rng.gen_range(0..RISKY_MCCS.len())],
            )
        } else {
            (
                rng.gen_range(5.0..120.0),
                ROUTINE_MCCS[rng.gen_range(0..ROUTINE_MCCS.len())],
            )
        };
        let city = if roll > 0.97 {
            CITIES[rng.gen_range(0..CITIES.len())]
        } else {
            CITIES[0]
        };
        feed.push(Transaction {
            txn_id: Uuid::new_v4().to_string(),
            card_id,
            amount: (amount * 100.0_f64).round() / 100.0,
            currency: "USD".to_string(),
            merchant_name: format!("merchant-{:04}", rng.gen_range(0..500)),
            merchant_category: mcc,
            merchant_location: Some(GeoPoint {
                lat: city.0,
                lon: city.1,
            }),
            occurred_at: start + chrono::Duration::seconds((i * 30) as i64),
        });
    }
    feed
}

fn print_summary(engine: &FraudEngine, scored: usize, declined: usize, errors: usize) -> Result<()> {
    let store = engine.store();
    let events = store.total_fraud_event_count()?;
    let incidents = store.total_incident_count()?;
    let open_freezes = store.total_open_freeze_count()?;

    println!("=== RUN SUMMARY ===");
    println!("  txns scored:    {scored}");
    println!("  txns declined:  {declined}");
    println!("  txn errors:     {errors}");
    println!("  fraud events:   {events}");
    println!("  incidents:      {incidents}");
    println!("  open freezes:   {open_freezes}");
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
