//! Per-card isolation context provider.
//!
//! RULES:
//!   - The context hash is one-way: SHA-256 over (card id, fresh nonce,
//!     derivation time). The card id -> hash mapping lives only in the
//!     card_context table this service owns; nothing downstream ever
//!     sees or stores a raw card id.
//!   - Every component calls enforce() before touching per-card state
//!     and passes only the returned hash to storage.
//!   - switch_context() stalls the calling thread 500-1500 ms to defeat
//!     timing correlation, then verifies the trailing access window
//!     references at most one context hash. The check is best-effort
//!     defense in depth, not a cryptographic guarantee.

use crate::clock::Clock;
use crate::config::IsolationConfig;
use crate::error::{FraudError, FraudResult};
use crate::event::AuditEvent;
use crate::rng::Entropy;
use crate::store::FraudStore;
use crate::types::{CardId, ContextHash};
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Opaque per-enforcement context. Short-lived; never persisted in a
/// reversible form.
#[derive(Debug, Clone)]
pub struct IsolationContext {
    pub context_hash: ContextHash,
    pub session_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub correlation_checked: bool,
}

impl IsolationContext {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub struct IsolationService {
    config: IsolationConfig,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn Entropy>,
    /// Hash of the most recently enforced context, for switch bookkeeping.
    active: Mutex<Option<ContextHash>>,
}

impl IsolationService {
    pub fn new(config: IsolationConfig, clock: Arc<dyn Clock>, entropy: Arc<dyn Entropy>) -> Self {
        Self {
            config,
            clock,
            entropy,
            active: Mutex::new(None),
        }
    }

    fn derive_hash(&self, card_id: &str, at: DateTime<Utc>) -> ContextHash {
        let mut hasher = Sha256::new();
        hasher.update(card_id.as_bytes());
        hasher.update(self.entropy.nonce());
        hasher.update(at.timestamp_millis().to_le_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify the card boundary and return the scoped context. Registers
    /// the card (deriving its context hash) on first sight.
    pub fn enforce(&self, store: &FraudStore, card_id: &CardId) -> FraudResult<IsolationContext> {
        if card_id.is_empty() {
            return Err(FraudError::IsolationViolation("empty card id".into()));
        }
        let now = self.clock.now();

        let context_hash = match store.get_card_by_id(card_id)? {
            Some(card) => {
                if card.context_hash.is_empty() {
                    return Err(FraudError::IsolationViolation(
                        "card has no derivable context".into(),
                    ));
                }
                card.context_hash
            }
            None => {
                let hash = self.derive_hash(card_id, now);
                let token = Uuid::new_v4().to_string();
                store.insert_card(card_id, &hash, &token, now)?;
                debug!("registered card context {hash}");
                hash
            }
        };

        store.record_access(&context_hash, now)?;

        let context = IsolationContext {
            session_token: Uuid::new_v4().to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(self.config.context_ttl_secs),
            correlation_checked: false,
            context_hash,
        };
        store.append_audit(
            &context.context_hash,
            &AuditEvent::ContextEnforced {
                session_token: context.session_token.clone(),
            },
            now,
        )?;
        *self.active.lock().unwrap() = Some(context.context_hash.clone());
        Ok(context)
    }

    /// Switch the active flow from one card to another. Clears the active
    /// context, stalls to defeat timing correlation, verifies the trailing
    /// window, then re-enforces for the target card.
    pub fn switch_context(
        &self,
        store: &FraudStore,
        from: &IsolationContext,
        to_card: &CardId,
    ) -> FraudResult<IsolationContext> {
        {
            let mut active = self.active.lock().unwrap();
            match active.as_deref() {
                Some(hash) if hash == from.context_hash => {}
                _ => {
                    return Err(FraudError::IsolationViolation(
                        "switch from a context that is not active".into(),
                    ));
                }
            }
            *active = None;
        }

        let delay_ms = self
            .entropy
            .jitter_ms(self.config.switch_delay_min_ms, self.config.switch_delay_max_ms);
        if delay_ms > 0 {
            // Deliberate synchronous stall on the calling flow.
            std::thread::sleep(std::time::Duration::from_millis(delay_ms));
        }

        let now = self.clock.now();
        let window_start = now - Duration::seconds(self.config.correlation_window_secs);
        let distinct = store.distinct_contexts_since(window_start)?;
        if distinct > 1 {
            let detail = format!(
                "{distinct} context hashes touched within the trailing {}s window",
                self.config.correlation_window_secs
            );
            warn!("correlation check failed: {detail}");
            store.append_audit(
                &from.context_hash,
                &AuditEvent::CorrelationViolation {
                    detail: detail.clone(),
                },
                now,
            )?;
            return Err(FraudError::IsolationViolation(detail));
        }

        let mut context = self.enforce(store, to_card)?;
        context.correlation_checked = true;
        store.append_audit(
            &context.context_hash,
            &AuditEvent::ContextSwitched { delay_ms },
            self.clock.now(),
        )?;
        Ok(context)
    }
}
