use async_trait::async_trait;
use libsql::Database;
use std::sync::Arc;

use super::{AuditError, AuditRecord, AuditSink, ReportAuditRecord};
use crate::models::{ReportHistory, UserHistory};

/// Writes audit entries to the `user_history` and `report_history` tables.
#[derive(Clone)]
pub struct LibsqlAuditSink {
    db: Arc<Database>,
}

impl LibsqlAuditSink {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for LibsqlAuditSink {
    async fn record(&self, entry: AuditRecord) -> Result<(), AuditError> {
        let conn = self.db.connect()?;
        UserHistory::insert(&conn, &entry).await
    }

    async fn record_report(&self, entry: ReportAuditRecord) -> Result<(), AuditError> {
        let conn = self.db.connect()?;
        ReportHistory::insert(&conn, &entry).await
    }
}
