//! Audit trail for guarded routes.
//!
//! Every guarded invocation that gets past authentication produces exactly one
//! [`AuditRecord`]. Report-generating routes additionally produce a
//! [`ReportAuditRecord`] carrying the report id handed to the caller.

mod libsql_sink;
mod memory;
mod queue;

pub use libsql_sink::LibsqlAuditSink;
pub use memory::MemoryAuditSink;
pub use queue::QueuedAuditSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    RateLimited,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::RateLimited => "rate_limited",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Outcome::Success),
            "failure" => Some(Outcome::Failure),
            "rate_limited" => Some(Outcome::RateLimited),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub caller_id: String,
    pub method: String,
    pub path: String,
    pub query_params: Value,
    pub body: Option<Value>,
    pub status_code: u16,
    pub outcome: Outcome,
    pub report_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportAuditRecord {
    pub id: String,
    pub caller_id: String,
    pub method: String,
    /// Route template, so lookups do not depend on resolved path parameters.
    pub path: String,
    pub kind: String,
    pub report_id: String,
    pub query_params: Value,
    pub body: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit store unavailable: {0}")]
    Unavailable(String),
}

/// Durable destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditRecord) -> Result<(), AuditError>;

    async fn record_report(&self, entry: ReportAuditRecord) -> Result<(), AuditError>;
}
