//! The observed transaction. Input only, immutable once seen.

use crate::error::{FraudError, FraudResult};
use crate::types::CardId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub txn_id: String,
    pub card_id: CardId,
    pub amount: f64,
    pub currency: String,
    pub merchant_name: String,
    /// ISO 18245 merchant category code, 1..=9999.
    pub merchant_category: u16,
    pub merchant_location: Option<GeoPoint>,
    pub occurred_at: DateTime<Utc>,
}

impl Transaction {
    /// Reject malformed input before any detector runs.
    pub fn validate(&self, now: DateTime<Utc>) -> FraudResult<()> {
        if self.txn_id.is_empty() {
            return Err(FraudError::Validation("empty transaction id".into()));
        }
        if self.card_id.is_empty() {
            return Err(FraudError::Validation("empty card id".into()));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(FraudError::Validation(format!(
                "non-positive amount {}",
                self.amount
            )));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(FraudError::Validation(format!(
                "bad currency code '{}'",
                self.currency
            )));
        }
        if self.merchant_category == 0 || self.merchant_category > 9999 {
            return Err(FraudError::Validation(format!(
                "MCC {} out of range",
                self.merchant_category
            )));
        }
        if let Some(loc) = &self.merchant_location {
            if loc.lat.abs() > 90.0 || loc.lon.abs() > 180.0 {
                return Err(FraudError::Validation("coordinate out of range".into()));
            }
        }
        // Clock skew tolerance for upstream feeds.
        if self.occurred_at > now + Duration::minutes(5) {
            return Err(FraudError::Validation("timestamp in the future".into()));
        }
        Ok(())
    }
}
