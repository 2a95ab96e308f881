//! ShutdownCoordinator - store.shutdown() をちょうど一度だけ呼ぶ
//!
//! Sequence: signal sources and scheduler → wait (bounded by the grace
//! period) for relay and store worker to drain → final `sync()` →
//! `shutdown()`. Only the coordinator ever calls `shutdown()` on the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::app::workers::WorkerGroup;
use crate::error::StoreError;
use crate::ports::SharedStore;

pub struct ShutdownCoordinator {
    store: SharedStore,
    grace: Duration,
    closed: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(store: SharedStore, grace: Duration) -> Self {
        Self {
            store,
            grace,
            closed: AtomicBool::new(false),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Whether the store has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop every worker, let the queues drain, then close the store.
    pub async fn shutdown(&self, workers: WorkerGroup) -> Result<(), StoreError> {
        info!(grace = ?self.grace, "shutting down backplane");
        if !workers.shutdown_and_join(self.grace).await {
            warn!("backplane did not drain cleanly; unpersisted reports are lost");
        }
        self.close_store().await
    }

    /// Final `sync()` then `shutdown()`. Later calls do nothing.
    pub async fn close_store(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.store.sync().await {
            // still release resources
            error!(store = %self.store.name(), error = %e, "final sync failed");
        }
        self.store.shutdown().await?;
        info!(store = %self.store.name(), "store closed");
        Ok(())
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Report;
    use crate::impls::MemoryReportStore;
    use crate::ports::{ReportStore, SystemClock, shutdown};
    use std::sync::Arc;

    #[tokio::test]
    async fn store_is_closed_exactly_once() {
        let memory = Arc::new(MemoryReportStore::new(Arc::new(SystemClock)));
        let coordinator = ShutdownCoordinator::new(memory.clone(), Duration::from_secs(1));

        let (trigger, _) = shutdown::channel();
        coordinator.shutdown(WorkerGroup::new(trigger)).await.unwrap();
        assert!(coordinator.is_closed());
        assert!(memory.is_closed());
        assert_eq!(memory.sync_count(), 1);

        coordinator.close_store().await.unwrap();
        assert_eq!(memory.sync_count(), 1);

        let err = memory.persist(Report::from("R9:task=Z")).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }
}
