//! SyncScheduler - 定期的に store.sync() を呼ぶ
//!
//! First fire after one full interval. A tick is not awaited until the
//! previous `sync()` has returned; missed ticks are delayed, never burst.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::ports::{SharedStore, Shutdown};

pub struct SyncScheduler {
    store: SharedStore,
    interval: Duration,
}

impl SyncScheduler {
    /// `interval` must be non-zero (checked by config validation).
    pub fn new(store: SharedStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.requested() => break,
                _ = ticker.tick() => {}
            }
            match self.store.sync().await {
                Ok(()) => debug!(store = %self.store.name(), "store synced"),
                Err(e) => warn!(store = %self.store.name(), error = %e, "periodic sync failed"),
            }
        }

        info!("sync scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Report, Tag, TaskId, TaskRecord};
    use crate::error::{QueryError, StoreError, StoreInitError};
    use crate::ports::{QueryableReportStore, ReportSequence, ReportStore, StoreStats, shutdown};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    /// Counts syncs and asserts they never overlap.
    #[derive(Default)]
    struct SlowSyncStore {
        syncs: AtomicU32,
        in_sync: AtomicBool,
        overlapped: AtomicBool,
    }

    #[async_trait]
    impl ReportStore for SlowSyncStore {
        fn name(&self) -> &str {
            "slow-sync"
        }
        async fn initialize(&self) -> Result<(), StoreInitError> {
            Ok(())
        }
        async fn persist(&self, _report: Report) -> Result<(), StoreError> {
            Ok(())
        }
        async fn sync(&self) -> Result<(), StoreError> {
            if self.in_sync.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            // slower than the interval
            tokio::time::sleep(Duration::from_secs(3)).await;
            self.syncs.fetch_add(1, Ordering::SeqCst);
            self.in_sync.store(false, Ordering::SeqCst);
            Err(StoreError::Unusable("flaky disk".into()))
        }
        async fn shutdown(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[async_trait]
    impl QueryableReportStore for SlowSyncStore {
        async fn get_reports_by_task(&self, _: &TaskId) -> Result<ReportSequence, QueryError> {
            Ok(ReportSequence::empty())
        }
        async fn get_latest_tasks(&self, _: usize) -> Result<Vec<TaskRecord>, QueryError> {
            Ok(Vec::new())
        }
        async fn get_tasks_since(&self, _: DateTime<Utc>) -> Result<Vec<TaskRecord>, QueryError> {
            Ok(Vec::new())
        }
        async fn get_tasks_by_tag(&self, _: &Tag) -> Result<Vec<TaskRecord>, QueryError> {
            Ok(Vec::new())
        }
        async fn stats(&self) -> Result<StoreStats, QueryError> {
            Ok(StoreStats::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn syncs_are_serialized_and_failures_do_not_stop_it() {
        let store = Arc::new(SlowSyncStore::default());
        let (trigger, stop) = shutdown::channel();
        let scheduler = SyncScheduler::new(store.clone(), Duration::from_secs(1));
        let worker = tokio::spawn(scheduler.run(stop));

        // ticks at 1s, then 4s and 7s (delayed), each sync taking 3s;
        // the sync started at 7s finishes before the stop is seen
        tokio::time::sleep(Duration::from_millis(9_500)).await;
        trigger.trigger();
        worker.await.unwrap();

        assert_eq!(store.syncs.load(Ordering::SeqCst), 3);
        assert!(!store.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn first_sync_waits_one_full_interval() {
        let store = Arc::new(SlowSyncStore::default());
        let (trigger, stop) = shutdown::channel();
        let scheduler = SyncScheduler::new(store.clone(), Duration::from_secs(5));
        let worker = tokio::spawn(scheduler.run(stop));

        tokio::time::sleep(Duration::from_secs(4)).await;
        trigger.trigger();
        worker.await.unwrap();

        assert_eq!(store.syncs.load(Ordering::SeqCst), 0);
    }
}
