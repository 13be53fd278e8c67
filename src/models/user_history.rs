use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Value as SqlValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{AuditRecord, Outcome};
use crate::error::{AppError, AppResult};

const COLUMNS: &str =
    "id, user_id, method, path, query_params, body, status_code, outcome, report_id, timestamp";

/// Stored form of an [`AuditRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserHistory {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub method: String,
    pub path: String,
    pub query_params: Option<Value>,
    pub body: Option<Value>,
    pub status_code: u16,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryFilter {
    pub method: Option<String>,
    pub path: Option<String>,
    pub status_code: Option<u16>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

pub fn timestamp_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_json(text: Option<String>) -> Option<Value> {
    text.and_then(|t| serde_json::from_str(&t).ok())
}

impl UserHistory {
    fn from_row(row: &libsql::Row) -> AppResult<Self> {
        let outcome: String = row.get(7)?;
        let timestamp: String = row.get(9)?;

        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            method: row.get(2)?,
            path: row.get(3)?,
            query_params: parse_json(row.get(4)?),
            body: parse_json(row.get(5)?),
            status_code: row.get::<i64>(6)? as u16,
            outcome: Outcome::parse(&outcome)
                .ok_or_else(|| AppError::Internal(format!("Unknown outcome {}", outcome)))?,
            report_id: row.get(8)?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| AppError::Internal(format!("Bad history timestamp: {}", e)))?
                .with_timezone(&Utc),
        })
    }

    pub async fn insert(conn: &Connection, record: &AuditRecord) -> Result<(), crate::audit::AuditError> {
        let body = match &record.body {
            Some(body) => Some(serde_json::to_string(body)?),
            None => None,
        };

        conn.execute(
            "INSERT INTO user_history (id, user_id, method, path, query_params, body, \
             status_code, outcome, report_id, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            libsql::params![
                record.id.clone(),
                record.caller_id.clone(),
                record.method.clone(),
                record.path.clone(),
                serde_json::to_string(&record.query_params)?,
                body,
                record.status_code as i64,
                record.outcome.as_str(),
                record.report_id.clone(),
                timestamp_text(&record.timestamp)
            ],
        )
        .await?;

        Ok(())
    }

    fn where_clause(user_id: Option<&str>, filter: &HistoryFilter) -> (String, Vec<SqlValue>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(user_id) = user_id {
            clauses.push("user_id = ?");
            params.push(SqlValue::Text(user_id.to_string()));
        }
        if let Some(method) = &filter.method {
            clauses.push("method = ?");
            params.push(SqlValue::Text(method.to_uppercase()));
        }
        if let Some(path) = &filter.path {
            clauses.push("path = ?");
            params.push(SqlValue::Text(path.to_lowercase()));
        }
        if let Some(status_code) = filter.status_code {
            clauses.push("status_code = ?");
            params.push(SqlValue::Integer(status_code as i64));
        }
        if let Some(start) = &filter.start_time {
            clauses.push("timestamp >= ?");
            params.push(SqlValue::Text(timestamp_text(start)));
        }
        if let Some(end) = &filter.end_time {
            clauses.push("timestamp <= ?");
            params.push(SqlValue::Text(timestamp_text(end)));
        }

        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), params)
        }
    }

    pub async fn list(
        conn: &Connection,
        user_id: Option<&str>,
        filter: &HistoryFilter,
        limit: u32,
        offset: u32,
    ) -> AppResult<Vec<Self>> {
        let (where_sql, mut params) = Self::where_clause(user_id, filter);
        params.push(SqlValue::Integer(limit as i64));
        params.push(SqlValue::Integer(offset as i64));

        let sql = format!(
            "SELECT {} FROM user_history{} ORDER BY timestamp LIMIT ? OFFSET ?",
            COLUMNS, where_sql
        );
        let mut rows = conn.query(&sql, libsql::params_from_iter(params)).await?;

        let mut history = Vec::new();
        while let Some(row) = rows.next().await? {
            history.push(Self::from_row(&row)?);
        }

        Ok(history)
    }

    pub async fn count(
        conn: &Connection,
        user_id: Option<&str>,
        filter: &HistoryFilter,
    ) -> AppResult<u64> {
        let (where_sql, params) = Self::where_clause(user_id, filter);
        let sql = format!("SELECT COUNT(*) FROM user_history{}", where_sql);
        let mut rows = conn.query(&sql, libsql::params_from_iter(params)).await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as u64),
            None => Ok(0),
        }
    }
}
