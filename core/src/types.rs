//! Shared primitive types used across the entire engine.

/// Raw card identifier as issued by the platform. Only the isolation
/// provider may hand this to storage; everything downstream works with
/// a [`ContextHash`].
pub type CardId = String;

/// One-way per-card context hash (hex-encoded SHA-256).
pub type ContextHash = String;

/// Identifier of an anomaly-bearing analysis event.
pub type EventId = String;

/// Identifier of a security incident.
pub type IncidentId = String;

/// Identifier of a freeze record.
pub type FreezeId = String;
