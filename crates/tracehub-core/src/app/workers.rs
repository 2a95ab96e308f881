//! WorkerGroup - spawn 済み worker の handle 集合
//!
//! - signal で止まる worker（sources, sync scheduler）
//! - queue の close で止まる worker（relay, store worker）
//!
//! `shutdown_and_join()` triggers the shutdown signal and then waits, bounded
//! by the grace period, for every worker. Stragglers are aborted.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::ports::{Shutdown, ShutdownTrigger};

struct Worker {
    name: String,
    join: JoinHandle<()>,
}

pub struct WorkerGroup {
    trigger: ShutdownTrigger,
    // join order: signal-stopped first, then the drain chain in pipeline order
    stoppable: Vec<Worker>,
    pipeline: Vec<Worker>,
}

impl WorkerGroup {
    pub fn new(trigger: ShutdownTrigger) -> Self {
        Self {
            trigger,
            stoppable: Vec::new(),
            pipeline: Vec::new(),
        }
    }

    /// Signal handle for new workers.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.trigger.subscribe()
    }

    /// Spawn a worker that stops when the shutdown signal fires.
    pub fn spawn<F>(&mut self, name: impl Into<String>, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.stoppable.push(Worker {
            name: name.into(),
            join: tokio::spawn(fut),
        });
    }

    /// Spawn a worker that stops once its input queue is closed and drained.
    pub fn spawn_pipeline<F>(&mut self, name: impl Into<String>, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pipeline.push(Worker {
            name: name.into(),
            join: tokio::spawn(fut),
        });
    }

    pub fn len(&self) -> usize {
        self.stoppable.len() + self.pipeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Request shutdown for all workers. Does not wait.
    pub fn request_shutdown(&self) {
        self.trigger.trigger();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.trigger.is_triggered()
    }

    /// Shutdown and wait for all workers, at most `grace` in total.
    ///
    /// Returns `true` when every worker finished on its own.
    pub async fn shutdown_and_join(self, grace: Duration) -> bool {
        self.request_shutdown();
        let deadline = Instant::now() + grace;
        let mut clean = true;

        for mut worker in self.stoppable.into_iter().chain(self.pipeline) {
            match tokio::time::timeout_at(deadline, &mut worker.join).await {
                Ok(Ok(())) => debug!(worker = %worker.name, "worker joined"),
                Ok(Err(e)) => {
                    clean = false;
                    warn!(worker = %worker.name, error = %e, "worker panicked");
                }
                Err(_) => {
                    clean = false;
                    warn!(
                        worker = %worker.name,
                        "worker did not stop within grace period, aborting"
                    );
                    worker.join.abort();
                }
            }
        }
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::shutdown;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn joins_workers_that_observe_the_signal() {
        let (trigger, _) = shutdown::channel();
        let mut group = WorkerGroup::new(trigger);
        let stopped = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let mut stop = group.shutdown_signal();
            let stopped = Arc::clone(&stopped);
            group.spawn(format!("w{i}"), async move {
                stop.requested().await;
                stopped.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(group.len(), 3);

        assert!(group.shutdown_and_join(Duration::from_secs(1)).await);
        assert_eq!(stopped.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stragglers_are_aborted_after_grace() {
        let (trigger, _) = shutdown::channel();
        let mut group = WorkerGroup::new(trigger);
        group.spawn_pipeline("stuck", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        assert!(!group.shutdown_and_join(Duration::from_secs(5)).await);
    }
}
