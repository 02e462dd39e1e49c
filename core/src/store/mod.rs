//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database. Components call store
//! methods; they never execute SQL directly. Every row outside
//! card_context is keyed by context hash, never by raw card id.

mod freeze;
mod incident;

use crate::error::FraudResult;
use crate::event::{event_type_name, AuditEvent};
use crate::transaction::{GeoPoint, Transaction};
use crate::types::ContextHash;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

pub struct FraudStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

/// Millisecond timestamp helpers. All columns store epoch millis.
pub(crate) fn ts_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Card row as seen by the isolation provider (the only reader).
#[derive(Debug, Clone)]
pub struct CardRow {
    pub card_id: String,
    pub context_hash: ContextHash,
    pub card_token: String,
    pub status: String,
    pub per_txn_limit: Option<f64>,
    pub daily_limit: Option<f64>,
    pub monthly_limit: Option<f64>,
    pub daily_spend: f64,
    pub monthly_spend: f64,
    pub daily_reset_at: i64,
    pub monthly_reset_at: i64,
}

/// Outcome of a spending-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendDecision {
    Allowed,
    PerTxnExceeded,
    DailyExceeded,
    MonthlyExceeded,
}

impl SpendDecision {
    pub fn limit_name(&self) -> &'static str {
        match self {
            Self::Allowed => "none",
            Self::PerTxnExceeded => "per_transaction",
            Self::DailyExceeded => "daily",
            Self::MonthlyExceeded => "monthly",
        }
    }
}

/// Transaction as read back for pattern rebuilds.
#[derive(Debug, Clone)]
pub struct StoredTransaction {
    pub txn_id: String,
    pub amount: f64,
    pub merchant_category: u16,
    pub merchant_location: Option<GeoPoint>,
    pub occurred_at: DateTime<Utc>,
}

impl FraudStore {
    pub fn open(path: &str) -> FraudResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> FraudResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database. For in-memory
    /// databases this returns a fresh, isolated database.
    pub fn reopen(&self) -> FraudResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> FraudResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_fraud_events.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_incidents.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_lifecycle.sql"))?;
        Ok(())
    }

    // ── Card context (isolation provider only) ─────────────────

    pub fn get_card_by_id(&self, card_id: &str) -> FraudResult<Option<CardRow>> {
        Ok(self
            .conn
            .query_row(
                "SELECT card_id, context_hash, card_token, status,
                        per_txn_limit, daily_limit, monthly_limit,
                        daily_spend, monthly_spend, daily_reset_at, monthly_reset_at
                 FROM card_context WHERE card_id=?1",
                params![card_id],
                Self::card_row,
            )
            .optional()?)
    }

    pub fn get_card_by_context(&self, ctx: &str) -> FraudResult<Option<CardRow>> {
        Ok(self
            .conn
            .query_row(
                "SELECT card_id, context_hash, card_token, status,
                        per_txn_limit, daily_limit, monthly_limit,
                        daily_spend, monthly_spend, daily_reset_at, monthly_reset_at
                 FROM card_context WHERE context_hash=?1",
                params![ctx],
                Self::card_row,
            )
            .optional()?)
    }

    fn card_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<CardRow> {
        Ok(CardRow {
            card_id: r.get(0)?,
            context_hash: r.get(1)?,
            card_token: r.get(2)?,
            status: r.get(3)?,
            per_txn_limit: r.get(4)?,
            daily_limit: r.get(5)?,
            monthly_limit: r.get(6)?,
            daily_spend: r.get(7)?,
            monthly_spend: r.get(8)?,
            daily_reset_at: r.get(9)?,
            monthly_reset_at: r.get(10)?,
        })
    }

    pub fn insert_card(
        &self,
        card_id: &str,
        context_hash: &str,
        card_token: &str,
        created_at: DateTime<Utc>,
    ) -> FraudResult<()> {
        self.conn.execute(
            "INSERT INTO card_context
                 (card_id, context_hash, card_token, status,
                  daily_reset_at, monthly_reset_at, created_at)
             VALUES (?1, ?2, ?3, 'active', ?4, ?4, ?4)",
            params![card_id, context_hash, card_token, ts_ms(created_at)],
        )?;
        Ok(())
    }

    pub fn set_card_status(&self, ctx: &str, status: &str) -> FraudResult<()> {
        self.conn.execute(
            "UPDATE card_context SET status=?1 WHERE context_hash=?2",
            params![status, ctx],
        )?;
        Ok(())
    }

    pub fn set_spending_limits(
        &self,
        ctx: &str,
        per_txn: Option<f64>,
        daily: Option<f64>,
        monthly: Option<f64>,
    ) -> FraudResult<()> {
        self.conn.execute(
            "UPDATE card_context
             SET per_txn_limit=?1, daily_limit=?2, monthly_limit=?3
             WHERE context_hash=?4",
            params![per_txn, daily, monthly, ctx],
        )?;
        Ok(())
    }

    /// Reset stale rolling spend counters, check the configured caps,
    /// and accumulate the amount only when every cap holds. Cards with
    /// no configured limits are always allowed.
    pub fn apply_spend(
        &self,
        ctx: &str,
        amount: f64,
        day_start: DateTime<Utc>,
        month_start: DateTime<Utc>,
    ) -> FraudResult<SpendDecision> {
        self.conn.execute(
            "UPDATE card_context SET daily_spend=0, daily_reset_at=?1
             WHERE context_hash=?2 AND daily_reset_at < ?1",
            params![ts_ms(day_start), ctx],
        )?;
        self.conn.execute(
            "UPDATE card_context SET monthly_spend=0, monthly_reset_at=?1
             WHERE context_hash=?2 AND monthly_reset_at < ?1",
            params![ts_ms(month_start), ctx],
        )?;
        let Some(card) = self.get_card_by_context(ctx)? else {
            return Ok(SpendDecision::Allowed);
        };
        if card.per_txn_limit.is_some_and(|l| amount > l) {
            return Ok(SpendDecision::PerTxnExceeded);
        }
        if card.daily_limit.is_some_and(|l| card.daily_spend + amount > l) {
            return Ok(SpendDecision::DailyExceeded);
        }
        if card
            .monthly_limit
            .is_some_and(|l| card.monthly_spend + amount > l)
        {
            return Ok(SpendDecision::MonthlyExceeded);
        }
        self.conn.execute(
            "UPDATE card_context
             SET daily_spend = daily_spend + ?1,
                 monthly_spend = monthly_spend + ?1
             WHERE context_hash=?2",
            params![amount, ctx],
        )?;
        Ok(SpendDecision::Allowed)
    }

    // ── Transactions ───────────────────────────────────────────

    pub fn insert_transaction(
        &self,
        ctx: &str,
        tx: &Transaction,
        recorded_at: DateTime<Utc>,
    ) -> FraudResult<()> {
        let (lat, lon) = match &tx.merchant_location {
            Some(p) => (Some(p.lat), Some(p.lon)),
            None => (None, None),
        };
        self.conn.execute(
            "INSERT INTO card_transaction
                 (txn_id, context_hash, amount, currency, merchant_name,
                  merchant_category, merchant_lat, merchant_lon,
                  occurred_at, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                tx.txn_id,
                ctx,
                tx.amount,
                tx.currency,
                tx.merchant_name,
                tx.merchant_category,
                lat,
                lon,
                ts_ms(tx.occurred_at),
                ts_ms(recorded_at),
            ],
        )?;
        Ok(())
    }

    /// Newest-first slice used for pattern rebuilds.
    pub fn recent_transactions(
        &self,
        ctx: &str,
        limit: usize,
    ) -> FraudResult<Vec<StoredTransaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT txn_id, amount, merchant_category, merchant_lat, merchant_lon, occurred_at
             FROM card_transaction
             WHERE context_hash=?1
             ORDER BY occurred_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![ctx, limit as i64], |r| {
            let lat: Option<f64> = r.get(3)?;
            let lon: Option<f64> = r.get(4)?;
            Ok(StoredTransaction {
                txn_id: r.get(0)?,
                amount: r.get(1)?,
                merchant_category: r.get::<_, i64>(2)? as u16,
                merchant_location: match (lat, lon) {
                    (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
                    _ => None,
                },
                occurred_at: from_ms(r.get(5)?),
            })
        })?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    // ── Access log (correlation detection) ─────────────────────

    pub fn record_access(&self, ctx: &str, at: DateTime<Utc>) -> FraudResult<()> {
        self.conn.execute(
            "INSERT INTO access_log (context_hash, accessed_at) VALUES (?1, ?2)",
            params![ctx, ts_ms(at)],
        )?;
        Ok(())
    }

    /// Distinct context hashes touched since `since`. The correlation
    /// heuristic counts these over a short trailing window.
    pub fn distinct_contexts_since(&self, since: DateTime<Utc>) -> FraudResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(DISTINCT context_hash) FROM access_log WHERE accessed_at > ?1",
            params![ts_ms(since)],
            |r| r.get(0),
        )?)
    }

    // ── Audit log ──────────────────────────────────────────────

    pub fn append_audit(
        &self,
        ctx: &str,
        event: &AuditEvent,
        at: DateTime<Utc>,
    ) -> FraudResult<()> {
        self.conn.execute(
            "INSERT INTO audit_log (context_hash, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                ctx,
                event_type_name(event),
                serde_json::to_string(event)?,
                ts_ms(at),
            ],
        )?;
        Ok(())
    }

    pub fn audit_count(&self, ctx: &str, event_type: &str) -> FraudResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE context_hash=?1 AND event_type=?2",
            params![ctx, event_type],
            |r| r.get(0),
        )?)
    }
}
