//! QueryFacade - 表示層向けの検索 API
//!
//! Thin layer over `QueryableReportStore` plus the helpers the collector's
//! pages need: latest task, recency window, tag lookup and store stats.

use std::sync::Arc;

use chrono::Duration;

use crate::domain::{Tag, TaskId, TaskRecord};
use crate::error::QueryError;
use crate::ports::{Clock, ReportSequence, SharedStore, StoreStats};

pub const DEFAULT_WINDOW_HOURS: i64 = 24;

#[derive(Clone)]
pub struct QueryFacade {
    store: SharedStore,
    clock: Arc<dyn Clock>,
}

impl QueryFacade {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn reports_by_task(&self, task_id: &TaskId) -> Result<ReportSequence, QueryError> {
        self.store.get_reports_by_task(task_id).await
    }

    pub async fn latest_tasks(&self, n: usize) -> Result<Vec<TaskRecord>, QueryError> {
        self.store.get_latest_tasks(n).await
    }

    /// Reports of the most recently active task. Empty for an empty store.
    pub async fn latest_task_reports(&self) -> Result<ReportSequence, QueryError> {
        match self.store.get_latest_tasks(1).await?.into_iter().next() {
            Some(latest) => self.store.get_reports_by_task(&latest.task_id).await,
            None => Ok(ReportSequence::empty()),
        }
    }

    /// Tasks active within the last `hours`. Missing or negative means 24.
    pub async fn tasks_in_window(&self, hours: Option<i64>) -> Result<Vec<TaskRecord>, QueryError> {
        let hours = match hours {
            Some(h) if h >= 0 => h,
            _ => DEFAULT_WINDOW_HOURS,
        };
        let window = Duration::try_hours(hours)
            .ok_or_else(|| QueryError::InvalidArgument(format!("window of {hours} hours")))?;
        let since = self
            .clock
            .now()
            .checked_sub_signed(window)
            .ok_or_else(|| QueryError::InvalidArgument(format!("window of {hours} hours")))?;
        self.store.get_tasks_since(since).await
    }

    /// Tasks carrying `tag`. A blank tag is rejected.
    pub async fn tasks_by_tag(&self, tag: &str) -> Result<Vec<TaskRecord>, QueryError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(QueryError::InvalidArgument("tag must not be empty".into()));
        }
        self.store.get_tasks_by_tag(&Tag::new(tag)).await
    }

    pub async fn stats(&self) -> Result<StoreStats, QueryError> {
        self.store.stats().await
    }
}
