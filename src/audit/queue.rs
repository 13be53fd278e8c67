use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::{AuditError, AuditRecord, AuditSink, ReportAuditRecord};

enum Entry {
    Call(AuditRecord),
    Report(ReportAuditRecord),
}

struct Shared {
    queue: Mutex<VecDeque<Entry>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Bounded in-process buffer in front of a slower durable sink.
///
/// Writes are acknowledged once queued. When the buffer is full the oldest
/// pending entry is discarded, so a stalled backend costs history rather than
/// request latency. A single worker drains the buffer in FIFO order.
pub struct QueuedAuditSink {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueuedAuditSink {
    pub fn spawn(inner: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let worker = tokio::spawn(drain(shared.clone(), inner));

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Entries discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().expect("audit queue poisoned").len()
    }

    /// Stops accepting entries and waits until everything queued has been written.
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();

        let worker = self.worker.lock().expect("audit queue poisoned").take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("Audit queue worker failed: {}", e);
            }
        }
    }

    fn push(&self, entry: Entry) -> Result<(), AuditError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("audit queue is shut down".to_string()));
        }

        {
            let mut queue = self.shared.queue.lock().expect("audit queue poisoned");
            if queue.len() >= self.shared.capacity {
                queue.pop_front();
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped, "Audit queue full, discarded oldest entry");
            }
            queue.push_back(entry);
        }

        self.shared.notify.notify_one();
        Ok(())
    }
}

async fn drain(shared: Arc<Shared>, inner: Arc<dyn AuditSink>) {
    loop {
        let next = shared.queue.lock().expect("audit queue poisoned").pop_front();

        match next {
            Some(Entry::Call(record)) => {
                let id = record.id.clone();
                if let Err(e) = inner.record(record).await {
                    tracing::error!(audit_id = %id, "Failed to persist audit record: {}", e);
                }
            }
            Some(Entry::Report(record)) => {
                let report_id = record.report_id.clone();
                if let Err(e) = inner.record_report(record).await {
                    tracing::error!(%report_id, "Failed to persist report audit record: {}", e);
                }
            }
            None => {
                if shared.closed.load(Ordering::SeqCst) {
                    break;
                }
                shared.notify.notified().await;
            }
        }
    }

    tracing::debug!("Audit queue drained");
}

#[async_trait]
impl AuditSink for QueuedAuditSink {
    async fn record(&self, entry: AuditRecord) -> Result<(), AuditError> {
        self.push(Entry::Call(entry))
    }

    async fn record_report(&self, entry: ReportAuditRecord) -> Result<(), AuditError> {
        self.push(Entry::Report(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{MemoryAuditSink, Outcome};
    use chrono::Utc;
    use serde_json::json;

    fn record(n: usize) -> AuditRecord {
        AuditRecord {
            id: format!("audit-{}", n),
            caller_id: "caller".to_string(),
            method: "GET".to_string(),
            path: "/cars/monitored".to_string(),
            query_params: json!({}),
            body: None,
            status_code: 200,
            outcome: Outcome::Success,
            report_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Holds every write until released, to back the queue up on purpose.
    struct GatedSink {
        gate: tokio::sync::Semaphore,
        inner: MemoryAuditSink,
    }

    #[async_trait]
    impl AuditSink for GatedSink {
        async fn record(&self, entry: AuditRecord) -> Result<(), AuditError> {
            let _permit = self.gate.acquire().await.expect("gate closed");
            self.inner.record(entry).await
        }

        async fn record_report(&self, entry: ReportAuditRecord) -> Result<(), AuditError> {
            self.inner.record_report(entry).await
        }
    }

    #[tokio::test]
    async fn drains_everything_on_shutdown() {
        let memory = Arc::new(MemoryAuditSink::new());
        let queue = QueuedAuditSink::spawn(memory.clone(), 16);

        for n in 0..10 {
            queue.record(record(n)).await.unwrap();
        }
        queue.shutdown().await;

        let ids: Vec<String> = memory.records().into_iter().map(|r| r.id).collect();
        let expected: Vec<String> = (0..10).map(|n| format!("audit-{}", n)).collect();
        assert_eq!(ids, expected);
        assert_eq!(queue.dropped(), 0);
    }

    #[tokio::test]
    async fn overflow_discards_oldest_entries() {
        let gated = Arc::new(GatedSink {
            gate: tokio::sync::Semaphore::new(0),
            inner: MemoryAuditSink::new(),
        });
        let queue = QueuedAuditSink::spawn(gated.clone(), 3);

        // The worker takes the first entry and blocks on the gate.
        queue.record(record(0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        for n in 1..=5 {
            queue.record(record(n)).await.unwrap();
        }
        assert_eq!(queue.pending(), 3);
        assert_eq!(queue.dropped(), 2);

        gated.gate.add_permits(100);
        queue.shutdown().await;

        let ids: Vec<String> = gated.inner.records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["audit-0", "audit-3", "audit-4", "audit-5"]);
    }

    #[tokio::test]
    async fn backend_failures_do_not_stop_the_worker() {
        let memory = Arc::new(MemoryAuditSink::new());
        let queue = QueuedAuditSink::spawn(memory.clone(), 8);

        memory.set_unreachable(true);
        queue.record(record(0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        memory.set_unreachable(false);
        queue.record(record(1)).await.unwrap();
        queue.shutdown().await;

        let ids: Vec<String> = memory.records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["audit-1"]);
    }

    #[tokio::test]
    async fn refuses_entries_after_shutdown() {
        let queue = QueuedAuditSink::spawn(Arc::new(MemoryAuditSink::new()), 4);
        queue.shutdown().await;
        assert!(matches!(
            queue.record(record(0)).await,
            Err(AuditError::Unavailable(_))
        ));
    }
}
