//! MemoryReportStore - 開発・テスト用の store
//!
//! Keeps every report in memory. Nothing survives a restart; `sync` only
//! counts calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::index::TaskIndex;
use crate::domain::{Report, ReportFields, Tag, TaskId, TaskRecord};
use crate::error::{PersistError, QueryError, StoreError, StoreInitError};
use crate::ports::{Clock, QueryableReportStore, ReportSequence, ReportStore, StoreStats};

pub const NAME: &str = "memory";

#[derive(Default)]
struct MemoryState {
    index: TaskIndex,
    reports: HashMap<TaskId, Vec<Report>>,
}

pub struct MemoryReportStore {
    clock: Arc<dyn Clock>,
    state: RwLock<MemoryState>,
    closed: AtomicBool,
    syncs: AtomicU64,
}

impl MemoryReportStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RwLock::new(MemoryState::default()),
            closed: AtomicBool::new(false),
            syncs: AtomicU64::new(0),
        }
    }

    /// Number of effective `sync` calls so far.
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&self) -> Result<(), StoreInitError> {
        Ok(())
    }

    async fn persist(&self, report: Report) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let fields = ReportFields::parse(&report);
        let task_id = fields.task_id.clone().ok_or(PersistError::MissingTaskId)?;

        // index と本体を同じ write lock の中で更新する
        let mut state = self.state.write().await;
        let seq = state.index.apply(&task_id, &fields, self.clock.now());
        state.reports.entry(task_id.clone()).or_default().push(report);
        debug!(task_id = %task_id, seq, "report stored in memory");
        Ok(())
    }

    async fn sync(&self) -> Result<(), StoreError> {
        if !self.is_closed() {
            self.syncs.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("memory store already shut down");
        }
        Ok(())
    }
}

#[async_trait]
impl QueryableReportStore for MemoryReportStore {
    async fn get_reports_by_task(&self, task_id: &TaskId) -> Result<ReportSequence, QueryError> {
        let state = self.state.read().await;
        Ok(match state.reports.get(task_id) {
            Some(reports) => ReportSequence::from_reports(reports.clone()),
            None => ReportSequence::empty(),
        })
    }

    async fn get_latest_tasks(&self, n: usize) -> Result<Vec<TaskRecord>, QueryError> {
        Ok(self.state.read().await.index.latest(n))
    }

    async fn get_tasks_since(&self, since: DateTime<Utc>) -> Result<Vec<TaskRecord>, QueryError> {
        Ok(self.state.read().await.index.since(since))
    }

    async fn get_tasks_by_tag(&self, tag: &Tag) -> Result<Vec<TaskRecord>, QueryError> {
        Ok(self.state.read().await.index.by_tag(tag))
    }

    async fn stats(&self) -> Result<StoreStats, QueryError> {
        Ok(self.state.read().await.index.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SystemClock;

    fn store() -> MemoryReportStore {
        MemoryReportStore::new(Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn unknown_task_yields_empty_sequence() {
        let store = store();
        store.persist(Report::new("task=A")).await.unwrap();

        let reports = store
            .get_reports_by_task(&TaskId::new("never-seen"))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert!(reports.is_empty());
    }

    #[tokio::test]
    async fn reports_come_back_in_persistence_order() {
        let store = store();
        for text in ["R1:task=A", "R2:task=B", "R3:task=A"] {
            store.persist(Report::new(text)).await.unwrap();
        }

        let reports = store
            .get_reports_by_task(&TaskId::new("A"))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(reports, vec![Report::new("R1:task=A"), Report::new("R3:task=A")]);
    }

    #[tokio::test]
    async fn report_without_task_is_rejected_per_item() {
        let store = store();
        let err = store.persist(Report::new("garbage")).await.unwrap_err();
        assert!(matches!(err, StoreError::Persist(PersistError::MissingTaskId)));
        assert!(!err.is_fatal());
        assert_eq!(store.stats().await.unwrap(), StoreStats::default());
    }

    #[tokio::test]
    async fn shutdown_twice_is_idempotent() {
        let store = store();
        store.persist(Report::new("task=A")).await.unwrap();

        store.shutdown().await.unwrap();
        store.shutdown().await.unwrap();

        assert!(matches!(
            store.persist(Report::new("task=B")).await,
            Err(StoreError::Closed)
        ));
        store.sync().await.unwrap();
        assert_eq!(store.sync_count(), 0);
        // data stays queryable after shutdown
        assert_eq!(store.stats().await.unwrap().num_reports, 1);
    }
}
