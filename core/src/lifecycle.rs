//! Card lifecycle controller: freeze/unfreeze through the external
//! processor, behind the circuit breaker, with local rollback when the
//! remote call fails.
//!
//! INVARIANT: at most one open freeze record per card context, enforced
//! here and backstopped by a partial unique index in the store.

use crate::boundary::{CardProcessor, CardTargetState};
use crate::breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::config::{BreakerConfig, LifecycleConfig};
use crate::error::{FraudError, FraudResult};
use crate::event::AuditEvent;
use crate::isolation::IsolationService;
use crate::store::FraudStore;
use crate::types::{CardId, ContextHash, EventId, FreezeId};
use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Channel tag sent with every processor transition.
const PROCESSOR_CHANNEL: &str = "fraud_engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeReason {
    FraudDetected,
    UserRequest,
    ComplianceHold,
    VelocityBreach,
    LostOrStolen,
}

impl FreezeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FraudDetected => "fraud_detected",
            Self::UserRequest => "user_request",
            Self::ComplianceHold => "compliance_hold",
            Self::VelocityBreach => "velocity_breach",
            Self::LostOrStolen => "lost_or_stolen",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fraud_detected" => Some(Self::FraudDetected),
            "user_request" => Some(Self::UserRequest),
            "compliance_hold" => Some(Self::ComplianceHold),
            "velocity_breach" => Some(Self::VelocityBreach),
            "lost_or_stolen" => Some(Self::LostOrStolen),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::FraudDetected => "Fraudulent activity detected",
            Self::UserRequest => "User-requested freeze",
            Self::ComplianceHold => "Compliance review in progress",
            Self::VelocityBreach => "Velocity limit breach detected",
            Self::LostOrStolen => "Card reported lost or stolen",
        }
    }

    /// Compliance holds and lost/stolen cards stay frozen until a
    /// privileged actor releases them; everything else is time-released.
    pub fn freeze_type(&self) -> FreezeType {
        match self {
            Self::ComplianceHold | Self::LostOrStolen => FreezeType::Permanent,
            _ => FreezeType::Temporary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeType {
    Temporary,
    Permanent,
}

impl FreezeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporary => "temporary",
            Self::Permanent => "permanent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "temporary" => Some(Self::Temporary),
            "permanent" => Some(Self::Permanent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnfreezeActor {
    User,
    Support,
    System,
    Timeout,
}

impl UnfreezeActor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Support => "support",
            Self::System => "system",
            Self::Timeout => "timeout",
        }
    }

    fn is_privileged(&self) -> bool {
        matches!(self, Self::Support | Self::System)
    }
}

#[derive(Debug, Clone)]
pub struct FreezeRecord {
    pub freeze_id: FreezeId,
    pub context_hash: ContextHash,
    pub reason: FreezeReason,
    pub freeze_type: FreezeType,
    pub related_event_id: Option<EventId>,
    pub frozen_at: DateTime<Utc>,
    pub unfrozen_at: Option<DateTime<Utc>>,
    pub unfrozen_by: Option<String>,
}

/// Unfreeze permission matrix: user-requested freezes are always
/// user-releasable; fraud and velocity freezes need a privileged actor
/// or the auto-release window to have elapsed; compliance holds and
/// lost/stolen never release on user request or timeout.
fn unfreeze_permitted(
    reason: FreezeReason,
    actor: UnfreezeActor,
    elapsed: Duration,
    auto_release: Duration,
) -> bool {
    match reason {
        FreezeReason::UserRequest => true,
        FreezeReason::FraudDetected | FreezeReason::VelocityBreach => {
            actor.is_privileged() || actor == UnfreezeActor::Timeout || elapsed >= auto_release
        }
        FreezeReason::ComplianceHold | FreezeReason::LostOrStolen => actor.is_privileged(),
    }
}

pub struct CardLifecycleController {
    config: LifecycleConfig,
    clock: Arc<dyn Clock>,
    isolation: Arc<IsolationService>,
    processor: Arc<dyn CardProcessor>,
    breaker: CircuitBreaker,
}

impl CardLifecycleController {
    pub fn new(
        config: LifecycleConfig,
        breaker_config: BreakerConfig,
        clock: Arc<dyn Clock>,
        isolation: Arc<IsolationService>,
        processor: Arc<dyn CardProcessor>,
    ) -> Self {
        Self {
            breaker: CircuitBreaker::new(breaker_config, clock.clone()),
            config,
            clock,
            isolation,
            processor,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run one processor transition through the breaker. Adapters enforce
    /// the deadline themselves; a call that comes back late anyway is
    /// worth a warning.
    fn call_processor(
        &self,
        card_token: &str,
        target: CardTargetState,
        reason: FreezeReason,
    ) -> FraudResult<crate::boundary::TransitionToken> {
        let started = std::time::Instant::now();
        let outcome = self.breaker.call(|| {
            self.processor
                .transition(card_token, target, reason.as_str(), PROCESSOR_CHANNEL)
        });
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > self.config.processor_timeout_ms {
            warn!(
                "processor {} transition returned after {elapsed_ms}ms (deadline {}ms)",
                target.as_str(),
                self.config.processor_timeout_ms
            );
        }
        outcome
    }

    /// Freeze a card. Opens the local record first, then transitions the
    /// card at the processor; a remote failure rolls the record back so
    /// local state never claims frozen while the processor disagrees.
    pub fn freeze(
        &self,
        store: &FraudStore,
        card_id: &CardId,
        reason: FreezeReason,
        related_event_id: Option<EventId>,
    ) -> FraudResult<FreezeRecord> {
        let context = self.isolation.enforce(store, card_id)?;
        let ctx = &context.context_hash;
        if store.get_open_freeze(ctx)?.is_some() {
            return Err(FraudError::AlreadyFrozen);
        }
        let card = store
            .get_card_by_context(ctx)?
            .ok_or_else(|| FraudError::CardNotFound(card_id.clone()))?;

        let now = self.clock.now();
        let record = FreezeRecord {
            freeze_id: Uuid::new_v4().to_string(),
            context_hash: ctx.clone(),
            reason,
            freeze_type: reason.freeze_type(),
            related_event_id,
            frozen_at: now,
            unfrozen_at: None,
            unfrozen_by: None,
        };
        store.open_freeze(&record)?;

        let remote = self.call_processor(&card.card_token, CardTargetState::Suspended, reason);
        if let Err(e) = remote {
            error!("processor suspend failed for {ctx}, rolling back freeze: {e}");
            store.delete_freeze(&record.freeze_id)?;
            store.append_audit(
                ctx,
                &AuditEvent::FreezeRolledBack {
                    freeze_id: record.freeze_id.clone(),
                    detail: e.to_string(),
                },
                self.clock.now(),
            )?;
            return Err(e);
        }

        store.set_card_status(ctx, "suspended")?;
        store.append_audit(
            ctx,
            &AuditEvent::CardFrozen {
                freeze_id: record.freeze_id.clone(),
                reason: reason.as_str().to_string(),
            },
            self.clock.now(),
        )?;
        info!("card context {ctx} frozen ({})", reason.as_str());
        Ok(record)
    }

    /// Unfreeze a card on behalf of an actor, subject to the permission
    /// matrix. The remote transition precedes closing the record.
    pub fn unfreeze(
        &self,
        store: &FraudStore,
        card_id: &CardId,
        actor: UnfreezeActor,
    ) -> FraudResult<FreezeRecord> {
        let context = self.isolation.enforce(store, card_id)?;
        let record = store
            .get_open_freeze(&context.context_hash)?
            .ok_or(FraudError::NotFrozen)?;

        let elapsed = self.clock.now() - record.frozen_at;
        let auto_release = Duration::seconds(self.config.auto_release_secs);
        if !unfreeze_permitted(record.reason, actor, elapsed, auto_release) {
            return Err(FraudError::NotPermitted {
                actor: actor.as_str().to_string(),
                reason: record.reason.as_str().to_string(),
            });
        }
        self.release(store, &record, actor)
    }

    /// Release open temporary freezes older than the auto-release window
    /// with actor `timeout`. Returns how many were released; failures are
    /// logged and skipped so one bad card never stalls the sweep.
    pub fn run_auto_release_sweep(&self, store: &FraudStore) -> FraudResult<usize> {
        let cutoff = self.clock.now() - Duration::seconds(self.config.auto_release_secs);
        let expired = store.open_temporary_freezes_before(cutoff)?;
        let mut released = 0;
        for record in expired {
            match self.release(store, &record, UnfreezeActor::Timeout) {
                Ok(_) => released += 1,
                Err(e) => warn!(
                    "auto-release failed for freeze {}: {e}",
                    record.freeze_id
                ),
            }
        }
        if released > 0 {
            info!("auto-release sweep unfroze {released} cards");
        }
        Ok(released)
    }

    fn release(
        &self,
        store: &FraudStore,
        record: &FreezeRecord,
        actor: UnfreezeActor,
    ) -> FraudResult<FreezeRecord> {
        let ctx = &record.context_hash;
        let card = store
            .get_card_by_context(ctx)?
            .ok_or_else(|| FraudError::CardNotFound(ctx.clone()))?;

        self.call_processor(&card.card_token, CardTargetState::Active, record.reason)?;

        let now = self.clock.now();
        store.close_freeze(&record.freeze_id, now, actor.as_str())?;
        store.set_card_status(ctx, "active")?;
        store.append_audit(
            ctx,
            &AuditEvent::CardUnfrozen {
                freeze_id: record.freeze_id.clone(),
                actor: actor.as_str().to_string(),
            },
            now,
        )?;
        info!("card context {ctx} unfrozen by {}", actor.as_str());
        Ok(FreezeRecord {
            unfrozen_at: Some(now),
            unfrozen_by: Some(actor.as_str().to_string()),
            ..record.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_matrix() {
        let day = Duration::seconds(86_400);
        let hour = Duration::seconds(3600);
        // User freezes are always user-releasable.
        assert!(unfreeze_permitted(
            FreezeReason::UserRequest,
            UnfreezeActor::User,
            hour,
            day
        ));
        // Fraud freezes: user blocked until the window elapses.
        assert!(!unfreeze_permitted(
            FreezeReason::FraudDetected,
            UnfreezeActor::User,
            hour,
            day
        ));
        assert!(unfreeze_permitted(
            FreezeReason::FraudDetected,
            UnfreezeActor::User,
            day + hour,
            day
        ));
        assert!(unfreeze_permitted(
            FreezeReason::FraudDetected,
            UnfreezeActor::Support,
            hour,
            day
        ));
        // Compliance holds never time out and never release for users.
        assert!(!unfreeze_permitted(
            FreezeReason::ComplianceHold,
            UnfreezeActor::User,
            day * 30,
            day
        ));
        assert!(!unfreeze_permitted(
            FreezeReason::ComplianceHold,
            UnfreezeActor::Timeout,
            day * 30,
            day
        ));
        assert!(unfreeze_permitted(
            FreezeReason::ComplianceHold,
            UnfreezeActor::Support,
            hour,
            day
        ));
    }
}
