use chrono::{DateTime, Utc};
use libsql::Connection;
use serde::Serialize;
use serde_json::Value;

use crate::audit::{AuditError, ReportAuditRecord};
use crate::error::{AppError, AppResult};
use crate::models::user_history::timestamp_text;

#[derive(Debug, Clone, Serialize)]
pub struct ReportHistory {
    pub id_report: String,
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub query_params: Option<Value>,
    pub body: Option<Value>,
}

impl ReportHistory {
    pub async fn insert(conn: &Connection, record: &ReportAuditRecord) -> Result<(), AuditError> {
        let body = match &record.body {
            Some(body) => Some(serde_json::to_string(body)?),
            None => None,
        };

        conn.execute(
            "INSERT INTO report_history (id, user_id, method, path, kind, id_report, \
             query_params, body, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            libsql::params![
                record.id.clone(),
                record.caller_id.clone(),
                record.method.clone(),
                record.path.clone(),
                record.kind.clone(),
                record.report_id.clone(),
                serde_json::to_string(&record.query_params)?,
                body,
                timestamp_text(&record.timestamp)
            ],
        )
        .await?;

        Ok(())
    }

    pub async fn find(conn: &Connection, path: &str, id_report: &str) -> AppResult<Option<Self>> {
        let mut rows = conn
            .query(
                "SELECT id_report, kind, timestamp, query_params, body FROM report_history \
                 WHERE path = ? AND id_report = ? ORDER BY timestamp LIMIT 1",
                libsql::params![path, id_report],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let timestamp: String = row.get(2)?;
        let query_params: Option<String> = row.get(3)?;
        let body: Option<String> = row.get(4)?;

        Ok(Some(Self {
            id_report: row.get(0)?,
            kind: row.get(1)?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| AppError::Internal(format!("Bad report timestamp: {}", e)))?
                .with_timezone(&Utc),
            query_params: query_params.and_then(|q| serde_json::from_str(&q).ok()),
            body: body.and_then(|b| serde_json::from_str(&b).ok()),
        }))
    }
}
