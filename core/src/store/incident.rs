//! Fraud event, incident, and response action queries.

use super::{from_ms, ts_ms, FraudStore};
use crate::error::{FraudError, FraudResult};
use crate::incident::{
    FraudEventRow, IncidentSeverity, IncidentStatus, IncidentType, SecurityIncident,
};
use crate::response::{ActionResult, ResponseActionRow};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl FraudStore {
    // ── Fraud events ───────────────────────────────────────────

    pub fn insert_fraud_event(&self, event: &FraudEventRow) -> FraudResult<()> {
        self.conn.execute(
            "INSERT INTO fraud_event
                 (event_id, context_hash, txn_id, risk_score, risk_level,
                  anomalies, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.event_id,
                event.context_hash,
                event.txn_id,
                event.risk_score,
                event.risk_level,
                serde_json::to_string(&event.anomalies)?,
                ts_ms(event.occurred_at),
            ],
        )?;
        Ok(())
    }

    /// Newest-first events for one card since a cutoff.
    pub fn recent_fraud_events(
        &self,
        ctx: &str,
        since: DateTime<Utc>,
    ) -> FraudResult<Vec<FraudEventRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, context_hash, txn_id, risk_score, risk_level,
                    anomalies, occurred_at
             FROM fraud_event
             WHERE context_hash=?1 AND occurred_at >= ?2
             ORDER BY occurred_at DESC",
        )?;
        let rows = stmt.query_map(params![ctx, ts_ms(since)], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, u32>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, i64>(6)?,
            ))
        })?;
        let mut result = Vec::new();
        for r in rows {
            let (event_id, context_hash, txn_id, risk_score, risk_level, anomalies, at) = r?;
            result.push(FraudEventRow {
                event_id,
                context_hash,
                txn_id,
                risk_score,
                risk_level,
                anomalies: serde_json::from_str(&anomalies)?,
                occurred_at: from_ms(at),
            });
        }
        Ok(result)
    }

    // ── Incidents ──────────────────────────────────────────────

    pub fn insert_incident(&self, incident: &SecurityIncident) -> FraudResult<()> {
        self.conn.execute(
            "INSERT INTO security_incident
                 (incident_id, context_hash, incident_type, severity, confidence,
                  rationale, related_event_ids, incident_data, status,
                  detected_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                incident.incident_id,
                incident.context_hash,
                incident.incident_type.as_str(),
                incident.severity.as_str(),
                incident.confidence,
                incident.rationale,
                serde_json::to_string(&incident.related_event_ids)?,
                incident.incident_data.to_string(),
                incident.status.as_str(),
                ts_ms(incident.detected_at),
                ts_ms(incident.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_incident(&self, incident_id: &str) -> FraudResult<Option<SecurityIncident>> {
        let row = self
            .conn
            .query_row(
                "SELECT incident_id, context_hash, incident_type, severity, confidence,
                        rationale, related_event_ids, incident_data, status,
                        detected_at, updated_at
                 FROM security_incident WHERE incident_id=?1",
                params![incident_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, f64>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, String>(6)?,
                        r.get::<_, String>(7)?,
                        r.get::<_, String>(8)?,
                        r.get::<_, i64>(9)?,
                        r.get::<_, i64>(10)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, ctx, kind, severity, confidence, rationale, related, data, status, det, upd)) =
            row
        else {
            return Ok(None);
        };
        Ok(Some(SecurityIncident {
            incident_id: id,
            context_hash: ctx,
            incident_type: IncidentType::parse(&kind)
                .ok_or_else(|| FraudError::Other(anyhow!("bad incident type '{kind}'")))?,
            severity: IncidentSeverity::parse(&severity)
                .ok_or_else(|| FraudError::Other(anyhow!("bad severity '{severity}'")))?,
            confidence,
            rationale,
            related_event_ids: serde_json::from_str(&related)?,
            incident_data: serde_json::from_str(&data)?,
            status: IncidentStatus::parse(&status)
                .ok_or_else(|| FraudError::Other(anyhow!("bad status '{status}'")))?,
            detected_at: from_ms(det),
            updated_at: from_ms(upd),
        }))
    }

    pub fn set_incident_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        at: DateTime<Utc>,
    ) -> FraudResult<()> {
        let changed = self.conn.execute(
            "UPDATE security_incident SET status=?1, updated_at=?2 WHERE incident_id=?3",
            params![status.as_str(), ts_ms(at), incident_id],
        )?;
        if changed == 0 {
            return Err(FraudError::IncidentNotFound(incident_id.to_string()));
        }
        Ok(())
    }

    pub fn incident_count(&self, ctx: &str) -> FraudResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM security_incident WHERE context_hash=?1",
            params![ctx],
            |r| r.get(0),
        )?)
    }

    pub fn total_fraud_event_count(&self) -> FraudResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM fraud_event", [], |r| r.get(0))?)
    }

    pub fn total_incident_count(&self) -> FraudResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM security_incident", [], |r| r.get(0))?)
    }

    // ── Response actions ───────────────────────────────────────

    pub fn insert_response_action(&self, action: &ResponseActionRow) -> FraudResult<()> {
        self.conn.execute(
            "INSERT INTO response_action
                 (action_id, incident_id, seq, action_type, payload,
                  result, details, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                action.action_id,
                action.incident_id,
                action.seq,
                action.action_type,
                action.payload.to_string(),
                action.result.as_str(),
                action.details,
                ts_ms(action.executed_at),
            ],
        )?;
        Ok(())
    }

    pub fn list_response_actions(&self, incident_id: &str) -> FraudResult<Vec<ResponseActionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT action_id, incident_id, seq, action_type, payload,
                    result, details, executed_at
             FROM response_action WHERE incident_id=?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![incident_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, i64>(7)?,
            ))
        })?;
        let mut result = Vec::new();
        for r in rows {
            let (action_id, incident_id, seq, action_type, payload, res, details, at) = r?;
            result.push(ResponseActionRow {
                action_id,
                incident_id,
                seq,
                action_type,
                payload: serde_json::from_str(&payload)?,
                result: ActionResult::parse(&res)
                    .ok_or_else(|| FraudError::Other(anyhow!("bad action result '{res}'")))?,
                details,
                executed_at: from_ms(at),
            });
        }
        Ok(result)
    }
}
