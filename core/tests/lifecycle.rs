//! Card lifecycle tests: freeze and unfreeze against the processor
//! fake, the actor permission matrix, rollback on remote failure, the
//! auto-release sweep, and the circuit breaker around the processor.

mod common;

use cardguard_core::error::FraudError;
use cardguard_core::lifecycle::{FreezeReason, FreezeType, UnfreezeActor};
use chrono::Duration;
use common::build;

fn ctx_of(h: &common::Harness, card: &str) -> String {
    h.engine
        .isolation()
        .enforce(h.engine.store(), &card.to_string())
        .unwrap()
        .context_hash
}

#[test]
fn freeze_then_unfreeze_round_trip() {
    let h = build(3);
    let card = "card-ft".to_string();

    let record = h.engine.freeze_card(&card, FreezeReason::UserRequest).unwrap();
    assert_eq!(record.freeze_type, FreezeType::Temporary);
    assert!(record.unfrozen_at.is_none());

    let ctx = ctx_of(&h, &card);
    let row = h.engine.store().get_card_by_context(&ctx).unwrap().unwrap();
    assert_eq!(row.status, "suspended");

    let released = h.engine.unfreeze_card(&card, UnfreezeActor::User).unwrap();
    assert!(released.unfrozen_at.is_some());
    assert_eq!(released.unfrozen_by.as_deref(), Some("user"));
    let row = h.engine.store().get_card_by_context(&ctx).unwrap().unwrap();
    assert_eq!(row.status, "active");
    // Both transitions reached the processor.
    assert_eq!(h.processor.call_count(), 2);
}

#[test]
fn double_freeze_refused() {
    let h = build(5);
    let card = "card-double".to_string();
    h.engine.freeze_card(&card, FreezeReason::FraudDetected).unwrap();
    let err = h
        .engine
        .freeze_card(&card, FreezeReason::UserRequest)
        .unwrap_err();
    assert!(matches!(err, FraudError::AlreadyFrozen));
}

#[test]
fn unfreeze_without_freeze_refused() {
    let h = build(7);
    let err = h
        .engine
        .unfreeze_card(&"card-none".to_string(), UnfreezeActor::User)
        .unwrap_err();
    assert!(matches!(err, FraudError::NotFrozen));
}

/// Fraud freezes: the cardholder must wait out the auto-release window;
/// support can release immediately.
#[test]
fn fraud_freeze_permission_matrix() {
    let h = build(11);
    let card = "card-fraud".to_string();
    h.engine.freeze_card(&card, FreezeReason::FraudDetected).unwrap();

    let err = h
        .engine
        .unfreeze_card(&card, UnfreezeActor::User)
        .unwrap_err();
    assert!(matches!(err, FraudError::NotPermitted { .. }), "{err}");

    // Past the window the cardholder may self-release.
    h.clock.advance(Duration::seconds(86_400));
    h.engine.unfreeze_card(&card, UnfreezeActor::User).unwrap();

    // Support needs no waiting period.
    h.engine.freeze_card(&card, FreezeReason::VelocityBreach).unwrap();
    h.engine.unfreeze_card(&card, UnfreezeActor::Support).unwrap();
}

/// Compliance and lost-or-stolen freezes are permanent: no actor short
/// of support or system releases them, no matter how much time passes.
#[test]
fn permanent_freezes_need_privilege() {
    let h = build(13);
    let card = "card-hold".to_string();
    let record = h
        .engine
        .freeze_card(&card, FreezeReason::ComplianceHold)
        .unwrap();
    assert_eq!(record.freeze_type, FreezeType::Permanent);

    h.clock.advance(Duration::days(30));
    let err = h
        .engine
        .unfreeze_card(&card, UnfreezeActor::User)
        .unwrap_err();
    assert!(matches!(err, FraudError::NotPermitted { .. }));

    h.engine.unfreeze_card(&card, UnfreezeActor::System).unwrap();
}

/// A processor failure rolls the freeze back: no open record, card
/// still active, rollback audited.
#[test]
fn remote_failure_rolls_back_freeze() {
    let h = build(17);
    let card = "card-rb".to_string();
    let ctx = ctx_of(&h, &card);

    h.processor.fail_next(1);
    let err = h
        .engine
        .freeze_card(&card, FreezeReason::FraudDetected)
        .unwrap_err();
    assert!(matches!(err, FraudError::RemoteProcessor(_)), "{err}");

    assert!(h.engine.store().get_open_freeze(&ctx).unwrap().is_none());
    let row = h.engine.store().get_card_by_context(&ctx).unwrap().unwrap();
    assert_eq!(row.status, "active");
    assert_eq!(h.engine.store().audit_count(&ctx, "freeze_rolled_back").unwrap(), 1);

    // The card is freezable again once the processor recovers.
    h.engine.freeze_card(&card, FreezeReason::FraudDetected).unwrap();
}

/// The sweep releases expired temporary freezes and leaves permanent
/// ones alone.
#[test]
fn sweep_releases_only_expired_temporaries() {
    let h = build(19);
    let expired = "card-sweep-1".to_string();
    let fresh = "card-sweep-2".to_string();
    let held = "card-sweep-3".to_string();

    h.engine.freeze_card(&expired, FreezeReason::FraudDetected).unwrap();
    h.engine.freeze_card(&held, FreezeReason::LostOrStolen).unwrap();
    h.clock.advance(Duration::seconds(86_401));
    h.engine.freeze_card(&fresh, FreezeReason::VelocityBreach).unwrap();

    let released = h.engine.run_auto_release_sweep().unwrap();
    assert_eq!(released, 1);

    let expired_ctx = ctx_of(&h, &expired);
    let record = h.engine.store().get_open_freeze(&expired_ctx).unwrap();
    assert!(record.is_none());
    assert!(h
        .engine
        .store()
        .get_open_freeze(&ctx_of(&h, &fresh))
        .unwrap()
        .is_some());
    assert!(h
        .engine
        .store()
        .get_open_freeze(&ctx_of(&h, &held))
        .unwrap()
        .is_some());

    // A second sweep finds nothing.
    assert_eq!(h.engine.run_auto_release_sweep().unwrap(), 0);
}

/// Repeated processor failures open the breaker; freezing then fails
/// fast without touching the processor until the cool-down elapses.
#[test]
fn breaker_opens_after_repeated_failures() {
    let h = build(23);
    let card = "card-brk".to_string();

    h.processor.fail_next(5);
    for _ in 0..5 {
        let _ = h.engine.freeze_card(&card, FreezeReason::FraudDetected);
    }
    let calls_before = h.processor.call_count();
    assert_eq!(calls_before, 5);

    let err = h
        .engine
        .freeze_card(&card, FreezeReason::FraudDetected)
        .unwrap_err();
    assert!(matches!(err, FraudError::BreakerOpen), "{err}");
    assert_eq!(h.processor.call_count(), calls_before);

    // Cool-down over: the half-open trial goes through.
    h.clock.advance(Duration::seconds(61));
    h.engine.freeze_card(&card, FreezeReason::FraudDetected).unwrap();
}
