//! cardguard-core: real-time card fraud risk engine.
//!
//! The crate is organized around three cooperating surfaces:
//!
//!   - the isolation layer ([`isolation`]), which maps card identifiers
//!     to opaque context hashes and gates every per-card operation;
//!   - the analysis pipeline ([`engine`]), which runs a set of anomaly
//!     detectors over each transaction and turns findings into a risk
//!     score, fraud events, and classified incidents;
//!   - the lifecycle controller ([`lifecycle`]) and response
//!     orchestrator ([`response`]), which act on incidents by freezing
//!     cards, alerting, and escalating, with rollback on remote failure.
//!
//! Persistence is a single SQLite database behind [`store::FraudStore`].
//! Time and randomness are injected ([`clock`], [`rng`]) so every
//! behavior is reproducible under test.

pub mod boundary;
pub mod breaker;
pub mod clock;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod event;
pub mod incident;
pub mod isolation;
pub mod lifecycle;
pub mod pattern;
pub mod response;
pub mod rng;
pub mod scoring;
pub mod store;
pub mod transaction;
pub mod types;
