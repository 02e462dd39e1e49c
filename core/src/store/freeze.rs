//! Freeze record queries.

use super::{from_ms, ts_ms, FraudStore};
use crate::error::{FraudError, FraudResult};
use crate::lifecycle::{FreezeReason, FreezeRecord, FreezeType};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

type FreezeTuple = (
    String,
    String,
    String,
    String,
    Option<String>,
    i64,
    Option<i64>,
    Option<String>,
);

impl FraudStore {
    /// Insert an open freeze. The partial unique index turns a second
    /// open freeze for the same context into `AlreadyFrozen`.
    pub fn open_freeze(&self, record: &FreezeRecord) -> FraudResult<()> {
        let inserted = self.conn.execute(
            "INSERT INTO freeze_record
                 (freeze_id, context_hash, reason, freeze_type,
                  related_event_id, frozen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.freeze_id,
                record.context_hash,
                record.reason.as_str(),
                record.freeze_type.as_str(),
                record.related_event_id,
                ts_ms(record.frozen_at),
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(FraudError::AlreadyFrozen)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_open_freeze(&self, ctx: &str) -> FraudResult<Option<FreezeRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT freeze_id, context_hash, reason, freeze_type,
                        related_event_id, frozen_at, unfrozen_at, unfrozen_by
                 FROM freeze_record
                 WHERE context_hash=?1 AND unfrozen_at IS NULL",
                params![ctx],
                Self::freeze_tuple,
            )
            .optional()?;
        row.map(Self::freeze_from_tuple).transpose()
    }

    /// Hard delete, only used for the remote-failure rollback, so local
    /// state never claims frozen while the processor of record disagrees.
    pub fn delete_freeze(&self, freeze_id: &str) -> FraudResult<()> {
        self.conn.execute(
            "DELETE FROM freeze_record WHERE freeze_id=?1",
            params![freeze_id],
        )?;
        Ok(())
    }

    pub fn close_freeze(
        &self,
        freeze_id: &str,
        at: DateTime<Utc>,
        actor: &str,
    ) -> FraudResult<()> {
        let changed = self.conn.execute(
            "UPDATE freeze_record SET unfrozen_at=?1, unfrozen_by=?2
             WHERE freeze_id=?3 AND unfrozen_at IS NULL",
            params![ts_ms(at), actor, freeze_id],
        )?;
        if changed == 0 {
            return Err(FraudError::NotFrozen);
        }
        Ok(())
    }

    /// Open temporary freezes frozen at or before the cutoff. This is
    /// the auto-release sweep's work list.
    pub fn open_temporary_freezes_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> FraudResult<Vec<FreezeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT freeze_id, context_hash, reason, freeze_type,
                    related_event_id, frozen_at, unfrozen_at, unfrozen_by
             FROM freeze_record
             WHERE unfrozen_at IS NULL AND freeze_type='temporary' AND frozen_at <= ?1
             ORDER BY frozen_at",
        )?;
        let rows = stmt.query_map(params![ts_ms(cutoff)], Self::freeze_tuple)?;
        let mut result = Vec::new();
        for r in rows {
            result.push(Self::freeze_from_tuple(r?)?);
        }
        Ok(result)
    }

    pub fn freeze_count(&self, ctx: &str) -> FraudResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM freeze_record WHERE context_hash=?1",
            params![ctx],
            |r| r.get(0),
        )?)
    }

    pub fn total_open_freeze_count(&self) -> FraudResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM freeze_record WHERE unfrozen_at IS NULL",
            [],
            |r| r.get(0),
        )?)
    }

    fn freeze_tuple(r: &rusqlite::Row<'_>) -> rusqlite::Result<FreezeTuple> {
        Ok((
            r.get(0)?,
            r.get(1)?,
            r.get(2)?,
            r.get(3)?,
            r.get(4)?,
            r.get(5)?,
            r.get(6)?,
            r.get(7)?,
        ))
    }

    fn freeze_from_tuple(t: FreezeTuple) -> FraudResult<FreezeRecord> {
        let (freeze_id, context_hash, reason, freeze_type, related, frozen, unfrozen, by) = t;
        Ok(FreezeRecord {
            freeze_id,
            context_hash,
            reason: FreezeReason::parse(&reason)
                .ok_or_else(|| FraudError::Other(anyhow!("bad freeze reason '{reason}'")))?,
            freeze_type: FreezeType::parse(&freeze_type)
                .ok_or_else(|| FraudError::Other(anyhow!("bad freeze type '{freeze_type}'")))?,
            related_event_id: related,
            frozen_at: from_ms(frozen),
            unfrozen_at: unfrozen.map(from_ms),
            unfrozen_by: by,
        })
    }
}
