//! ReportStore port - 永続化と検索
//!
//! `ReportStore` is the write/lifecycle side driven by the store worker,
//! the sync scheduler and the shutdown coordinator. `QueryableReportStore`
//! adds the read-only query surface used by the presentation layer.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::domain::{Report, Tag, TaskId, TaskRecord};
use crate::error::{QueryError, StoreError, StoreInitError};

/// The single store instance, shared by every worker and query caller.
pub type SharedStore = Arc<dyn QueryableReportStore>;

/// Persistence side of a store.
///
/// Implementations serialize their own state: `persist`, `sync` and the
/// query methods may all run concurrently.
#[async_trait]
pub trait ReportStore: Send + Sync {
    fn name(&self) -> &str;

    /// Open or create durable storage. Failure aborts startup.
    async fn initialize(&self) -> Result<(), StoreInitError>;

    /// Persist one report and update the indices.
    ///
    /// A query running concurrently sees either none or all of the report.
    /// `StoreError::Persist` is per item; `StoreError::Unusable` stops the worker.
    async fn persist(&self, report: Report) -> Result<(), StoreError>;

    /// Flush buffered writes to durable media. Idempotent. No-op after shutdown.
    async fn sync(&self) -> Result<(), StoreError>;

    /// Flush and release resources. Calls after the first are no-ops.
    async fn shutdown(&self) -> Result<(), StoreError>;
}

/// Read-only query surface.
#[async_trait]
pub trait QueryableReportStore: ReportStore {
    /// Every persisted report of a task, in persistence order.
    /// An unknown task yields an empty sequence.
    async fn get_reports_by_task(&self, task_id: &TaskId) -> Result<ReportSequence, QueryError>;

    /// The `n` most recently active tasks, most recent first.
    async fn get_latest_tasks(&self, n: usize) -> Result<Vec<TaskRecord>, QueryError>;

    /// Tasks with activity at or after `since`, most recent first.
    async fn get_tasks_since(&self, since: DateTime<Utc>) -> Result<Vec<TaskRecord>, QueryError>;

    /// Tasks carrying `tag`. Empty when none match.
    async fn get_tasks_by_tag(&self, tag: &Tag) -> Result<Vec<TaskRecord>, QueryError>;

    async fn stats(&self) -> Result<StoreStats, QueryError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub num_tasks: u64,
    pub num_reports: u64,
}

type StreamFactory = dyn Fn() -> BoxStream<'static, Result<Report, QueryError>> + Send + Sync;

/// Lazy, finite, restartable sequence of reports.
///
/// Nothing is read until `stream()` is polled, and every call to `stream()`
/// starts again from the first report.
#[derive(Clone)]
pub struct ReportSequence {
    open: Arc<StreamFactory>,
}

impl ReportSequence {
    pub fn new<F>(open: F) -> Self
    where
        F: Fn() -> BoxStream<'static, Result<Report, QueryError>> + Send + Sync + 'static,
    {
        Self {
            open: Arc::new(open),
        }
    }

    pub fn empty() -> Self {
        Self::new(|| stream::empty().boxed())
    }

    /// Sequence over an in-memory snapshot.
    pub fn from_reports(reports: Vec<Report>) -> Self {
        let reports: Arc<[Report]> = reports.into();
        Self::new(move || {
            let reports = Arc::clone(&reports);
            stream::iter((0..reports.len()).map(move |i| Ok(reports[i].clone()))).boxed()
        })
    }

    pub fn stream(&self) -> BoxStream<'static, Result<Report, QueryError>> {
        (self.open)()
    }

    pub async fn collect(&self) -> Result<Vec<Report>, QueryError> {
        self.stream().try_collect().await
    }
}

impl fmt::Debug for ReportSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportSequence").finish_non_exhaustive()
    }
}
