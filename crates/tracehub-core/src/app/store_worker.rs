//! StoreWorker - storage queue を消費して store に永続化
//!
//! `configure` binds the storage-queue receiver; `run` drains it, calling
//! `persist` for each report until the queue is closed and empty.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::observability::StoreWorkerStats;
use crate::ports::{ReportReceiver, SharedStore};

pub struct StoreWorker {
    store: SharedStore,
    queue: Option<ReportReceiver>,
    stats: Arc<StoreWorkerStats>,
}

impl StoreWorker {
    pub fn new(store: SharedStore, stats: Arc<StoreWorkerStats>) -> Self {
        Self {
            store,
            queue: None,
            stats,
        }
    }

    pub fn configure(&mut self, queue: ReportReceiver) {
        self.queue = Some(queue);
    }

    /// Drain the storage queue.
    ///
    /// Per-item persist failures are logged and the report is dropped.
    /// Returns `Err` only when the store becomes unusable, which the caller
    /// escalates to a process shutdown.
    pub async fn run(self) -> Result<(), StoreError> {
        let Some(mut queue) = self.queue else {
            return Err(StoreError::NotConfigured);
        };
        let store_name = self.store.name().to_string();

        while let Some(report) = queue.take().await {
            match self.store.persist(report).await {
                Ok(()) => {
                    self.stats.record_persisted();
                    debug!(store = %store_name, "report persisted");
                }
                Err(StoreError::Closed) => {
                    warn!(store = %store_name, "store closed, store worker stopping");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!(store = %store_name, error = %e, "store unusable, escalating");
                    return Err(e);
                }
                Err(e) => {
                    self.stats.record_failed();
                    warn!(store = %store_name, error = %e, "report dropped");
                }
            }
        }

        info!(
            store = %store_name,
            persisted = self.stats.persisted(),
            failed = self.stats.failed(),
            "store worker stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Report;
    use crate::domain::TaskId;
    use crate::impls::MemoryReportStore;
    use crate::ports::{QueryableReportStore, ReportStore, SystemClock, queue};
    use std::num::NonZeroUsize;

    #[tokio::test]
    async fn unconfigured_worker_refuses_to_run() {
        let store: SharedStore = Arc::new(MemoryReportStore::new(Arc::new(SystemClock)));
        let worker = StoreWorker::new(store, Arc::default());
        assert!(matches!(worker.run().await, Err(StoreError::NotConfigured)));
    }

    #[tokio::test]
    async fn bad_reports_are_dropped_and_the_rest_persisted() {
        let memory = Arc::new(MemoryReportStore::new(Arc::new(SystemClock)));
        let store: SharedStore = memory.clone();
        let stats = Arc::new(StoreWorkerStats::default());
        let (sink, rx) = queue::bounded(NonZeroUsize::new(8).unwrap());

        let mut worker = StoreWorker::new(store, Arc::clone(&stats));
        worker.configure(rx);

        for text in ["R1:task=A", "no task here", "R2:task=A"] {
            sink.deliver(Report::from(text)).await.unwrap();
        }
        drop(sink);
        worker.run().await.unwrap();

        assert_eq!(stats.persisted(), 2);
        assert_eq!(stats.failed(), 1);
        let reports = memory
            .get_reports_by_task(&TaskId::new("A"))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(reports, vec![Report::from("R1:task=A"), Report::from("R2:task=A")]);
    }

    #[tokio::test]
    async fn closed_store_stops_the_worker_quietly() {
        let memory = Arc::new(MemoryReportStore::new(Arc::new(SystemClock)));
        memory.shutdown().await.unwrap();
        let (sink, rx) = queue::bounded(NonZeroUsize::new(2).unwrap());
        let mut worker = StoreWorker::new(memory, Arc::default());
        worker.configure(rx);

        sink.deliver(Report::from("R1:task=A")).await.unwrap();
        assert!(worker.run().await.is_ok());
    }
}
