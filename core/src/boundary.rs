//! External collaborator boundaries, as narrow traits.
//!
//! The engine owns none of these systems; it calls them through these
//! seams so tests can substitute deterministic fakes.

use crate::error::FraudResult;
use crate::types::{CardId, EventId};
use log::info;

/// Target card state at the external processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardTargetState {
    Active,
    Suspended,
}

impl CardTargetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
        }
    }
}

/// Token returned by the processor for a completed state transition.
#[derive(Debug, Clone)]
pub struct TransitionToken(pub String);

/// The card-issuing processor. Implementations own the HTTP client and
/// the 5000 ms deadline; past the deadline is a hard failure.
pub trait CardProcessor: Send + Sync {
    fn transition(
        &self,
        card_token: &str,
        target: CardTargetState,
        reason: &str,
        channel: &str,
    ) -> FraudResult<TransitionToken>;
}

/// Notification delivery. Fire-and-forget: failures are logged by the
/// caller and never escalate into the incident state machine.
pub trait Notifier: Send + Sync {
    fn send_alert(&self, card_id: &CardId, incident_summary: &str) -> FraudResult<()>;
}

/// Downstream calibration feedback.
pub trait FeedbackSink: Send + Sync {
    fn record_event_feedback(
        &self,
        card_id: &CardId,
        event_id: &EventId,
        was_false_positive: bool,
    ) -> FraudResult<()>;
}

/// Log-only notifier for the runner and for environments without a
/// delivery channel wired up.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_alert(&self, card_id: &CardId, incident_summary: &str) -> FraudResult<()> {
        info!("alert for card {card_id}: {incident_summary}");
        Ok(())
    }
}

/// Log-only feedback sink.
pub struct LogFeedbackSink;

impl FeedbackSink for LogFeedbackSink {
    fn record_event_feedback(
        &self,
        card_id: &CardId,
        event_id: &EventId,
        was_false_positive: bool,
    ) -> FraudResult<()> {
        info!("feedback for card {card_id}, event {event_id}: false_positive={was_false_positive}");
        Ok(())
    }
}
