//! Per-card rolling statistical profile and its fast cache.
//!
//! The cache holds rebuilt profiles for a TTL; on a miss the profile is
//! rebuilt from the last N transactions in the durable store. Updates
//! are O(1) incremental merges (Welford), never a full recompute.
//! Per-card entries are serialized by the cache lock; different cards
//! never contend on anything but the map itself.

use crate::config::PatternConfig;
use crate::error::FraudResult;
use crate::store::FraudStore;
use crate::transaction::{GeoPoint, Transaction};
use crate::types::ContextHash;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct TransactionPattern {
    pub avg_amount: f64,
    pub std_dev_amount: f64,
    /// Welford running sum of squared deviations.
    m2: f64,
    pub category_counts: HashMap<u16, u64>,
    pub last_location: Option<GeoPoint>,
    pub last_seen: Option<DateTime<Utc>>,
    pub sample_count: u64,
}

impl TransactionPattern {
    /// Merge one observation in O(1).
    pub fn observe(&mut self, tx: &Transaction) {
        self.sample_count += 1;
        let n = self.sample_count as f64;
        let delta = tx.amount - self.avg_amount;
        self.avg_amount += delta / n;
        self.m2 += delta * (tx.amount - self.avg_amount);
        self.std_dev_amount = (self.m2 / n).sqrt();
        *self.category_counts.entry(tx.merchant_category).or_insert(0) += 1;
        if tx.merchant_location.is_some() {
            self.last_location = tx.merchant_location;
        }
        self.last_seen = Some(tx.occurred_at);
    }

    pub fn seen_category(&self, mcc: u16) -> bool {
        self.category_counts.contains_key(&mcc)
    }
}

struct CachedPattern {
    pattern: TransactionPattern,
    cached_at: DateTime<Utc>,
}

pub struct PatternCache {
    config: PatternConfig,
    inner: Mutex<HashMap<ContextHash, CachedPattern>>,
}

impl PatternCache {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the profile for a card context, rebuilding from the durable
    /// store on a miss or TTL expiry. Returns None for a card with no
    /// observed transactions.
    pub fn get(
        &self,
        store: &FraudStore,
        ctx: &ContextHash,
        now: DateTime<Utc>,
    ) -> FraudResult<Option<TransactionPattern>> {
        {
            let cache = self.inner.lock().unwrap();
            if let Some(entry) = cache.get(ctx) {
                let age = (now - entry.cached_at).num_seconds();
                if age < self.config.cache_ttl_secs {
                    return Ok(Some(entry.pattern.clone()));
                }
            }
        }

        let history = store.recent_transactions(ctx, self.config.rebuild_limit)?;
        if history.is_empty() {
            return Ok(None);
        }
        debug!("pattern rebuild for {ctx}: {} transactions", history.len());

        let mut pattern = TransactionPattern::default();
        // Oldest first so last_location/last_seen land on the newest.
        for stored in history.iter().rev() {
            pattern.sample_count += 1;
            let n = pattern.sample_count as f64;
            let delta = stored.amount - pattern.avg_amount;
            pattern.avg_amount += delta / n;
            pattern.m2 += delta * (stored.amount - pattern.avg_amount);
            pattern.std_dev_amount = (pattern.m2 / n).sqrt();
            *pattern
                .category_counts
                .entry(stored.merchant_category)
                .or_insert(0) += 1;
            if stored.merchant_location.is_some() {
                pattern.last_location = stored.merchant_location;
            }
            pattern.last_seen = Some(stored.occurred_at);
        }

        let mut cache = self.inner.lock().unwrap();
        cache.insert(
            ctx.clone(),
            CachedPattern {
                pattern: pattern.clone(),
                cached_at: now,
            },
        );
        Ok(Some(pattern))
    }

    /// Incremental update after an analyzed transaction. Creates a fresh
    /// profile for a cold card.
    pub fn update(&self, ctx: &ContextHash, tx: &Transaction, now: DateTime<Utc>) {
        let mut cache = self.inner.lock().unwrap();
        let entry = cache.entry(ctx.clone()).or_insert_with(|| CachedPattern {
            pattern: TransactionPattern::default(),
            cached_at: now,
        });
        entry.pattern.observe(tx);
        entry.cached_at = now;
    }

    pub fn invalidate(&self, ctx: &ContextHash) {
        self.inner.lock().unwrap().remove(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tx(amount: f64, mcc: u16) -> Transaction {
        Transaction {
            txn_id: "t".into(),
            card_id: "c".into(),
            amount,
            currency: "USD".into(),
            merchant_name: "m".into(),
            merchant_category: mcc,
            merchant_location: None,
            occurred_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn rolling_average_matches_incremental_merge() {
        let mut p = TransactionPattern::default();
        for amount in [10.0, 20.0, 30.0, 40.0] {
            p.observe(&tx(amount, 5411));
        }
        assert_eq!(p.sample_count, 4);
        assert!((p.avg_amount - 25.0).abs() < 1e-9);
        // Population std dev of {10,20,30,40}.
        assert!((p.std_dev_amount - 11.180339887498949).abs() < 1e-9);
        assert_eq!(p.category_counts[&5411], 4);
    }

    #[test]
    fn invalidate_drops_cached_profile() {
        let store = FraudStore::in_memory().unwrap();
        store.migrate().unwrap();
        let cache = PatternCache::new(PatternConfig::default());
        let ctx: ContextHash = "a".repeat(64);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        cache.update(&ctx, &tx(25.0, 5411), now);
        assert!(cache.get(&store, &ctx, now).unwrap().is_some());

        // With nothing in the durable store, the next get rebuilds to None.
        cache.invalidate(&ctx);
        assert!(
            cache.get(&store, &ctx, now).unwrap().is_none(),
            "invalidated profile should be gone until transactions are re-read"
        );
    }
}
