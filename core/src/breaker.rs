//! Circuit breaker for the external processor boundary.
//!
//! Explicit closed/open/half-open state machine with injected
//! threshold, cool-down, and clock. Wall-clock timers only: an open
//! breaker never blocks the caller, it short-circuits with a local
//! failure.

use crate::clock::Clock;
use crate::config::BreakerConfig;
use crate::error::{FraudError, FraudResult};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Run one guarded call. While open and cooling down, the call is
    /// short-circuited with `BreakerOpen`; after the cool-down a single
    /// trial call decides whether the breaker closes or re-opens.
    pub fn call<T>(&self, f: impl FnOnce() -> FraudResult<T>) -> FraudResult<T> {
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                BreakerState::Closed | BreakerState::HalfOpen => {}
                BreakerState::Open => {
                    let now = self.clock.now();
                    let cooled = inner.opened_at.is_some_and(|at| {
                        now - at >= Duration::seconds(self.config.cool_down_secs)
                    });
                    if !cooled {
                        return Err(FraudError::BreakerOpen);
                    }
                    info!("circuit breaker half-open, allowing trial call");
                    inner.state = BreakerState::HalfOpen;
                }
            }
        }

        // The lock is dropped during the call so the remote round trip
        // never serializes unrelated callers.
        let outcome = f();

        let mut inner = self.inner.lock().unwrap();
        match &outcome {
            Ok(_) => {
                if inner.state == BreakerState::HalfOpen {
                    info!("circuit breaker closed after successful trial");
                }
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
            }
            Err(_) => {
                inner.consecutive_failures += 1;
                let trip = inner.state == BreakerState::HalfOpen
                    || inner.consecutive_failures >= self.config.failure_threshold;
                if trip {
                    warn!(
                        "circuit breaker opened after {} consecutive failures",
                        inner.consecutive_failures
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(self.clock.now());
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use anyhow::anyhow;
    use chrono::TimeZone;

    fn breaker(threshold: u32, cool_down: i64) -> (CircuitBreaker, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let breaker = CircuitBreaker::new(
            BreakerConfig {
                failure_threshold: threshold,
                cool_down_secs: cool_down,
            },
            clock.clone(),
        );
        (breaker, clock)
    }

    fn fail(b: &CircuitBreaker) -> FraudResult<()> {
        b.call(|| Err(FraudError::RemoteProcessor("boom".into())))
    }

    #[test]
    fn opens_after_consecutive_failures_and_short_circuits() {
        let (b, _clock) = breaker(3, 60);
        for _ in 0..3 {
            assert!(fail(&b).is_err());
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(
            b.call(|| Ok(())),
            Err(FraudError::BreakerOpen)
        ));
    }

    #[test]
    fn half_open_trial_closes_on_success() {
        let (b, clock) = breaker(2, 60);
        let _ = fail(&b);
        let _ = fail(&b);
        assert_eq!(b.state(), BreakerState::Open);

        clock.advance(Duration::seconds(61));
        assert!(b.call(|| Ok(())).is_ok());
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_trial_reopens_on_failure() {
        let (b, clock) = breaker(2, 60);
        let _ = fail(&b);
        let _ = fail(&b);
        clock.advance(Duration::seconds(61));
        let _ = fail(&b);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(b.call(|| Ok(())), Err(FraudError::BreakerOpen)));
    }

    #[test]
    fn success_resets_failure_run() {
        let (b, _clock) = breaker(3, 60);
        let _ = fail(&b);
        let _ = fail(&b);
        assert!(b.call(|| Ok::<_, FraudError>(())).is_ok());
        let _ = fail(&b);
        let _ = fail(&b);
        // Run was broken by the success; still closed.
        assert_eq!(b.state(), BreakerState::Closed);
        let _ = b.call(|| Err::<(), _>(FraudError::Other(anyhow!("x"))));
        assert_eq!(b.state(), BreakerState::Open);
    }
}
