//! App / RunningApp - 構築済み backplane と実行中の backplane
//!
//! `App` is the explicit application context produced by `AppBuilder`:
//! initialized sources, the relay, the store worker and the shared store.
//! `App::start` spawns one worker per source, the relay, the store worker
//! and the sync scheduler, and hands back a `RunningApp`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::app::config::Limits;
use crate::app::query::QueryFacade;
use crate::app::relay::Relay;
use crate::app::shutdown::ShutdownCoordinator;
use crate::app::store_worker::StoreWorker;
use crate::app::sync_scheduler::SyncScheduler;
use crate::app::workers::WorkerGroup;
use crate::error::StoreError;
use crate::observability::{self, BackplaneCounts, RelayStats, StoreWorkerStats};
use crate::ports::{Clock, ReportSource, SharedStore, shutdown};

pub struct App {
    pub(crate) sources: Vec<Box<dyn ReportSource>>,
    pub(crate) relay: Relay,
    pub(crate) store_worker: StoreWorker,
    pub(crate) store: SharedStore,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) limits: Limits,
    pub(crate) relay_stats: Arc<RelayStats>,
    pub(crate) store_stats: Arc<StoreWorkerStats>,
}

impl App {
    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Spawn every worker.
    pub fn start(self) -> RunningApp {
        let (trigger, _) = shutdown::channel();
        let mut workers = WorkerGroup::new(trigger);

        for source in self.sources {
            let name = source.name().to_string();
            let stop = workers.shutdown_signal();
            let label = name.clone();
            workers.spawn(format!("source:{name}"), async move {
                if let Err(e) = source.run(stop).await {
                    error!(source = %label, error = %e, "report source failed");
                }
            });
        }

        let scheduler = SyncScheduler::new(Arc::clone(&self.store), self.limits.sync_interval);
        let stop = workers.shutdown_signal();
        workers.spawn("sync-scheduler", scheduler.run(stop));

        let stop = workers.shutdown_signal();
        workers.spawn_pipeline("relay", self.relay.run(stop));

        let (failed_tx, failed_rx) = oneshot::channel();
        let store_worker = self.store_worker;
        workers.spawn_pipeline("store-worker", async move {
            if let Err(e) = store_worker.run().await {
                let _ = failed_tx.send(e);
            }
        });

        info!(workers = workers.len(), "backplane started");

        RunningApp {
            coordinator: Arc::new(ShutdownCoordinator::new(
                Arc::clone(&self.store),
                self.limits.shutdown_grace,
            )),
            store: self.store,
            clock: self.clock,
            workers: Some(workers),
            store_failure: Some(failed_rx),
            relay_stats: self.relay_stats,
            store_stats: self.store_stats,
        }
    }
}

/// Why `run_until` returned.
#[derive(Debug)]
pub enum StopReason {
    /// The caller's signal fired (Ctrl-C, SIGTERM, ...).
    Signal,
    /// Every source finished and both queues drained.
    Drained,
    /// The store worker escalated an unusable store.
    StoreFailed(StoreError),
}

pub struct RunningApp {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    coordinator: Arc<ShutdownCoordinator>,
    workers: Option<WorkerGroup>,
    store_failure: Option<oneshot::Receiver<StoreError>>,
    relay_stats: Arc<RelayStats>,
    store_stats: Arc<StoreWorkerStats>,
}

impl RunningApp {
    pub fn counts(&self) -> BackplaneCounts {
        observability::snapshot(&self.relay_stats, &self.store_stats)
    }

    pub fn query(&self) -> QueryFacade {
        QueryFacade::new(Arc::clone(&self.store), Arc::clone(&self.clock))
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// Run until `signal` fires, the pipeline drains, or the store fails;
    /// then shut down.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<StopReason, StoreError>
    where
        F: Future<Output = ()>,
    {
        let reason = match self.store_failure.take() {
            Some(failure) => tokio::select! {
                _ = signal => StopReason::Signal,
                outcome = failure => match outcome {
                    Ok(e) => StopReason::StoreFailed(e),
                    // store worker ended without error: the pipeline drained
                    Err(_) => StopReason::Drained,
                },
            },
            None => {
                signal.await;
                StopReason::Signal
            }
        };
        match &reason {
            StopReason::StoreFailed(e) => error!(error = %e, "stopping after store failure"),
            other => info!(reason = ?other, "stopping backplane"),
        }
        self.shutdown().await?;
        Ok(reason)
    }

    /// Stop workers, drain, final sync, store shutdown. Idempotent.
    pub async fn shutdown(&mut self) -> Result<(), StoreError> {
        match self.workers.take() {
            Some(workers) => self.coordinator.shutdown(workers).await,
            None => self.coordinator.close_store().await,
        }
    }
}

impl Drop for RunningApp {
    fn drop(&mut self) {
        let Some(workers) = self.workers.take() else {
            return;
        };
        workers.request_shutdown();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let coordinator = Arc::clone(&self.coordinator);
                handle.spawn(async move {
                    if let Err(e) = coordinator.shutdown(workers).await {
                        error!(error = %e, "shutdown after drop failed");
                    }
                });
            }
            Err(_) => warn!("running backplane dropped outside a runtime; store left open"),
        }
    }
}
