use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{AuditError, AuditRecord, AuditSink, ReportAuditRecord};

/// In-process audit store. Can be switched to refuse writes to model an
/// unreachable backend.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    reports: Mutex<Vec<ReportAuditRecord>>,
    unreachable: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit mutex poisoned").clone()
    }

    pub fn reports(&self) -> Vec<ReportAuditRecord> {
        self.reports.lock().expect("audit mutex poisoned").clone()
    }

    fn check_reachable(&self) -> Result<(), AuditError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("memory sink marked unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditRecord) -> Result<(), AuditError> {
        self.check_reachable()?;
        self.records.lock().expect("audit mutex poisoned").push(entry);
        Ok(())
    }

    async fn record_report(&self, entry: ReportAuditRecord) -> Result<(), AuditError> {
        self.check_reachable()?;
        self.reports.lock().expect("audit mutex poisoned").push(entry);
        Ok(())
    }
}
