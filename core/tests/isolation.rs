//! Isolation layer tests: context hash stability, enforcement, context
//! switching, and the trailing-window correlation check.

mod common;

use cardguard_core::clock::Clock;
use cardguard_core::error::FraudError;
use chrono::Duration;
use common::build;

/// The same card always maps to the same context hash; distinct cards
/// never collide.
#[test]
fn context_hash_is_stable_per_card() {
    let h = build(3);
    let store = h.engine.store();
    let iso = h.engine.isolation();

    let a1 = iso.enforce(store, &"card-a".to_string()).unwrap();
    let a2 = iso.enforce(store, &"card-a".to_string()).unwrap();
    let b = iso.enforce(store, &"card-b".to_string()).unwrap();

    assert_eq!(a1.context_hash, a2.context_hash);
    assert_ne!(a1.context_hash, b.context_hash);
    // Sessions are fresh per enforcement even for the same card.
    assert_ne!(a1.session_token, a2.session_token);
}

/// The context hash never leaks the card id.
#[test]
fn context_hash_is_opaque() {
    let h = build(5);
    let ctx = h
        .engine
        .isolation()
        .enforce(h.engine.store(), &"card-opaque-1234".to_string())
        .unwrap()
        .context_hash;

    assert_eq!(ctx.len(), 64);
    assert!(ctx.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(!ctx.contains("card-opaque"));
}

#[test]
fn empty_card_id_is_a_violation() {
    let h = build(7);
    let err = h
        .engine
        .isolation()
        .enforce(h.engine.store(), &String::new())
        .unwrap_err();
    assert!(matches!(err, FraudError::IsolationViolation(_)));
}

/// Sessions carry a TTL from the isolation config.
#[test]
fn session_expires_after_ttl() {
    let h = build(9);
    let ctx = h
        .engine
        .isolation()
        .enforce(h.engine.store(), &"card-ttl".to_string())
        .unwrap();

    let now = h.clock.now();
    assert!(!ctx.is_expired(now));
    assert!(!ctx.is_expired(now + Duration::seconds(899)));
    assert!(ctx.is_expired(now + Duration::seconds(900)));
}

/// A clean trailing window lets the switch proceed and marks the new
/// context as correlation-checked.
#[test]
fn switch_succeeds_after_quiet_window() {
    let h = build(11);
    let store = h.engine.store();
    let iso = h.engine.isolation();

    let from = iso.enforce(store, &"card-x".to_string()).unwrap();
    h.clock.advance(Duration::seconds(10));

    let to = iso
        .switch_context(store, &from, &"card-y".to_string())
        .unwrap();
    assert!(to.correlation_checked);
    assert_ne!(to.context_hash, from.context_hash);
    assert_eq!(store.audit_count(&to.context_hash, "context_switched").unwrap(), 1);
}

/// Two contexts touched inside the correlation window abort the switch
/// and leave an audit trail.
#[test]
fn correlated_accesses_block_switch() {
    let h = build(13);
    let store = h.engine.store();
    let iso = h.engine.isolation();

    iso.enforce(store, &"card-1".to_string()).unwrap();
    h.clock.advance(Duration::seconds(1));
    let from = iso.enforce(store, &"card-2".to_string()).unwrap();
    h.clock.advance(Duration::seconds(1));

    let err = iso
        .switch_context(store, &from, &"card-3".to_string())
        .unwrap_err();
    assert!(matches!(err, FraudError::IsolationViolation(_)), "{err}");
    assert_eq!(
        store
            .audit_count(&from.context_hash, "correlation_violation")
            .unwrap(),
        1
    );
}

/// Switching away from a context that is no longer active is refused.
#[test]
fn switch_from_stale_context_refused() {
    let h = build(17);
    let store = h.engine.store();
    let iso = h.engine.isolation();

    let stale = iso.enforce(store, &"card-old".to_string()).unwrap();
    h.clock.advance(Duration::seconds(10));
    iso.enforce(store, &"card-new".to_string()).unwrap();
    h.clock.advance(Duration::seconds(10));

    let err = iso
        .switch_context(store, &stale, &"card-else".to_string())
        .unwrap_err();
    assert!(matches!(err, FraudError::IsolationViolation(_)));
}
