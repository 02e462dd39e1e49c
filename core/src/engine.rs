//! The fraud engine: analysis pipeline and component wiring.
//!
//! PIPELINE (fixed order):
//!   validate -> enforce isolation -> spending caps -> pattern snapshot
//!   -> detectors (parallel fan-out) -> score -> persist -> incident path
//!
//! RULES:
//!   - Detectors run concurrently against the same immutable snapshot;
//!     none sees another's output.
//!   - A failing detector abstains; it never aborts the analysis.
//!   - Storage failures on the pattern path degrade the analysis, they
//!     do not fail it.
//!   - The 200 ms budget is advisory: log a warning, never error.

use crate::boundary::{CardProcessor, FeedbackSink, Notifier};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::detectors::{default_detectors, AnomalyDetector, DetectorInput, FraudAnomaly};
use crate::error::{FraudError, FraudResult};
use crate::event::AuditEvent;
use crate::incident::{classify, FraudEventRow};
use crate::isolation::{IsolationContext, IsolationService};
use crate::lifecycle::{CardLifecycleController, FreezeReason, FreezeRecord, UnfreezeActor};
use crate::pattern::PatternCache;
use crate::response::ResponseOrchestrator;
use crate::rng::Entropy;
use crate::scoring::{score_anomalies, FraudAnalysisResult};
use crate::store::{FraudStore, SpendDecision};
use crate::transaction::Transaction;
use crate::types::{CardId, ContextHash, IncidentId};
use chrono::{DateTime, Datelike, Duration, Utc};
use log::warn;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// Trailing window of fraud events handed to the incident classifier.
const INCIDENT_EVENT_WINDOW_MINS: i64 = 10;

/// Result-cache entries kept before a prune pass.
const RESULT_CACHE_HIGH_WATER: usize = 4096;

pub struct FraudEngine {
    config: EngineConfig,
    store: FraudStore,
    clock: Arc<dyn Clock>,
    isolation: Arc<IsolationService>,
    patterns: PatternCache,
    detectors: Vec<Box<dyn AnomalyDetector>>,
    orchestrator: ResponseOrchestrator,
    lifecycle: Arc<CardLifecycleController>,
    result_cache: Mutex<HashMap<(ContextHash, String), (FraudAnalysisResult, DateTime<Utc>)>>,
}

impl FraudEngine {
    /// Wire a fully assembled engine. Everything stateful or external is
    /// injected: store, clock, entropy, processor, notifier, feedback.
    pub fn build(
        config: EngineConfig,
        store: FraudStore,
        clock: Arc<dyn Clock>,
        entropy: Arc<dyn Entropy>,
        processor: Arc<dyn CardProcessor>,
        notifier: Arc<dyn Notifier>,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Self {
        let isolation = Arc::new(IsolationService::new(
            config.isolation.clone(),
            clock.clone(),
            entropy,
        ));
        let lifecycle = Arc::new(CardLifecycleController::new(
            config.lifecycle.clone(),
            config.breaker.clone(),
            clock.clone(),
            isolation.clone(),
            processor,
        ));
        let orchestrator = ResponseOrchestrator::new(
            config.response.clone(),
            clock.clone(),
            lifecycle.clone(),
            notifier,
            feedback,
        );
        Self {
            patterns: PatternCache::new(config.pattern.clone()),
            detectors: default_detectors(&config.detector, &config.pattern),
            result_cache: Mutex::new(HashMap::new()),
            config,
            store,
            clock,
            isolation,
            orchestrator,
            lifecycle,
        }
    }

    pub fn store(&self) -> &FraudStore {
        &self.store
    }

    pub fn isolation(&self) -> &IsolationService {
        &self.isolation
    }

    pub fn lifecycle(&self) -> &CardLifecycleController {
        &self.lifecycle
    }

    pub fn orchestrator(&self) -> &ResponseOrchestrator {
        &self.orchestrator
    }

    /// Analyze one transaction end to end. Returns the scored result;
    /// incident classification and response run inline when the score
    /// crosses the incident threshold.
    pub fn analyze(&self, tx: &Transaction) -> FraudResult<FraudAnalysisResult> {
        let started = Instant::now();
        let now = self.clock.now();
        tx.validate(now)?;

        let context = self.isolation.enforce(&self.store, &tx.card_id)?;
        let ctx = context.context_hash.clone();

        let cache_key = (ctx.clone(), tx.txn_id.clone());
        {
            let cache = self.result_cache.lock().unwrap();
            if let Some((result, at)) = cache.get(&cache_key) {
                if (now - *at).num_seconds() < self.config.scoring.result_cache_ttl_secs {
                    return Ok(result.clone());
                }
            }
        }

        self.check_spending_caps(&ctx, tx)?;

        // Pattern miss or storage trouble degrades to a cold-card
        // analysis; the affected detectors abstain.
        let pattern = match self.patterns.get(&self.store, &ctx, now) {
            Ok(p) => p,
            Err(e) => {
                warn!("pattern fetch failed for {ctx}, analyzing cold: {e}");
                None
            }
        };

        let anomalies = self.run_detectors(&ctx, tx, pattern.as_ref());
        let result = score_anomalies(&anomalies, &self.config.scoring, now);

        if let Err(e) = self.store.insert_transaction(&ctx, tx, now) {
            warn!("transaction persist failed for {ctx}: {e}");
        }
        self.patterns.update(&ctx, tx, now);

        if !anomalies.is_empty() {
            self.record_event_and_respond(&context, tx, &result)?;
        }

        {
            let mut cache = self.result_cache.lock().unwrap();
            if cache.len() >= RESULT_CACHE_HIGH_WATER {
                let ttl = self.config.scoring.result_cache_ttl_secs;
                cache.retain(|_, (_, at)| (now - *at).num_seconds() < ttl);
            }
            cache.insert(cache_key, (result.clone(), now));
        }

        let elapsed_ms = started.elapsed().as_millis() as i64;
        if elapsed_ms > self.config.scoring.analysis_budget_ms {
            warn!(
                "analysis for {ctx} took {elapsed_ms}ms (budget {}ms)",
                self.config.scoring.analysis_budget_ms
            );
        }
        Ok(result)
    }

    /// Fan the detector set out across scoped threads and collect each
    /// finding independently. Panics and errors degrade to abstention.
    fn run_detectors(
        &self,
        ctx: &ContextHash,
        tx: &Transaction,
        pattern: Option<&crate::pattern::TransactionPattern>,
    ) -> Vec<FraudAnomaly> {
        let input = DetectorInput {
            context: ctx,
            transaction: tx,
            pattern,
        };
        let mut findings = Vec::with_capacity(self.detectors.len());
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .detectors
                .iter()
                .map(|detector| {
                    let input = &input;
                    scope.spawn(move || (detector.name(), detector.check(input)))
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok((_, Ok(Some(anomaly)))) => findings.push(anomaly),
                    Ok((_, Ok(None))) => {}
                    Ok((name, Err(e))) => {
                        warn!("detector '{name}' failed, treating as abstain: {e}");
                    }
                    Err(_) => warn!("detector thread panicked, treating as abstain"),
                }
            }
        });
        findings
    }

    fn check_spending_caps(&self, ctx: &ContextHash, tx: &Transaction) -> FraudResult<()> {
        let at = tx.occurred_at;
        let day_start = at
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc();
        let month_start = at
            .date_naive()
            .with_day(1)
            .unwrap_or(at.date_naive())
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc();
        let decision = self
            .store
            .apply_spend(ctx, tx.amount, day_start, month_start)?;
        if decision != SpendDecision::Allowed {
            self.store.append_audit(
                ctx,
                &AuditEvent::SpendingLimitDeclined {
                    txn_id: tx.txn_id.clone(),
                    limit: decision.limit_name().to_string(),
                },
                self.clock.now(),
            )?;
            return Err(FraudError::Validation(format!(
                "{} spending limit exceeded",
                decision.limit_name()
            )));
        }
        Ok(())
    }

    fn record_event_and_respond(
        &self,
        context: &IsolationContext,
        tx: &Transaction,
        result: &FraudAnalysisResult,
    ) -> FraudResult<()> {
        let ctx = &context.context_hash;
        let event = FraudEventRow {
            event_id: Uuid::new_v4().to_string(),
            context_hash: ctx.clone(),
            txn_id: tx.txn_id.clone(),
            risk_score: result.risk_score,
            risk_level: result.risk_level.as_str().to_string(),
            anomalies: result.anomalies.clone(),
            occurred_at: tx.occurred_at,
        };
        self.store.insert_fraud_event(&event)?;
        self.store.append_audit(
            ctx,
            &AuditEvent::TransactionScored {
                event_id: Some(event.event_id.clone()),
                txn_id: tx.txn_id.clone(),
                risk_score: result.risk_score,
                risk_level: result.risk_level.as_str().to_string(),
                anomaly_count: result.anomalies.len(),
            },
            self.clock.now(),
        )?;

        if result.risk_score < self.config.scoring.incident_threshold {
            return Ok(());
        }

        let since = tx.occurred_at - Duration::minutes(INCIDENT_EVENT_WINDOW_MINS);
        let events = self.store.recent_fraud_events(ctx, since)?;
        let classification = classify(&events);
        let max_score = events.iter().map(|e| e.risk_score).max().unwrap_or(0);
        let related: Vec<_> = events.iter().map(|e| e.event_id.clone()).collect();
        self.orchestrator.open_incident(
            &self.store,
            &tx.card_id,
            ctx,
            &classification,
            related,
            max_score,
        )?;
        Ok(())
    }

    // ── Lifecycle passthroughs ─────────────────────────────────

    pub fn freeze_card(&self, card_id: &CardId, reason: FreezeReason) -> FraudResult<FreezeRecord> {
        self.lifecycle.freeze(&self.store, card_id, reason, None)
    }

    pub fn unfreeze_card(
        &self,
        card_id: &CardId,
        actor: UnfreezeActor,
    ) -> FraudResult<FreezeRecord> {
        self.lifecycle.unfreeze(&self.store, card_id, actor)
    }

    pub fn record_false_positive(
        &self,
        incident_id: &IncidentId,
        card_id: &CardId,
    ) -> FraudResult<f64> {
        self.orchestrator
            .record_false_positive(&self.store, incident_id, card_id)
    }

    pub fn run_auto_release_sweep(&self) -> FraudResult<usize> {
        self.lifecycle.run_auto_release_sweep(&self.store)
    }
}
