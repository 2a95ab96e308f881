//! Relay - incoming queue → storage queue
//!
//! Exactly one relay joins the two queues. It takes from the incoming queue
//! (waiting while empty) and offers to the storage queue without blocking.
//! A refused offer drops the report and bumps the `dropped` counter.
//!
//! The relay ends once the incoming queue is closed and drained. On shutdown
//! it closes the incoming queue itself and hands whatever is still buffered
//! to the storage queue, waiting for room instead of dropping. The
//! coordinator's grace period bounds that wait.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::observability::RelayStats;
use crate::ports::{OfferError, QueueClosed, ReportReceiver, ReportSink, Shutdown};

/// Drops after the first are logged once per this many.
const DROP_LOG_EVERY: u64 = 1000;

pub struct Relay {
    incoming: ReportReceiver,
    storage: ReportSink,
    offer_timeout: Duration,
    stats: Arc<RelayStats>,
}

impl Relay {
    pub fn new(
        incoming: ReportReceiver,
        storage: ReportSink,
        offer_timeout: Duration,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            incoming,
            storage,
            offer_timeout,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    pub async fn run(mut self, mut shutdown: Shutdown) {
        let mut draining = false;

        loop {
            let next = if draining {
                self.incoming.take().await
            } else {
                tokio::select! {
                    biased;
                    _ = shutdown.requested() => {
                        debug!("relay draining incoming queue");
                        self.incoming.close();
                        draining = true;
                        continue;
                    }
                    next = self.incoming.take() => next,
                }
            };
            let Some(report) = next else {
                break;
            };
            self.stats.record_received();

            // while draining the store worker is still consuming; wait for room
            let handed_over = if draining {
                self.storage
                    .deliver(report)
                    .await
                    .map_err(|QueueClosed| ())
            } else {
                match self.storage.offer(report, self.offer_timeout).await {
                    Ok(()) => Ok(()),
                    Err(OfferError::Full(report)) => {
                        let dropped = self.stats.record_dropped();
                        if dropped == 1 || dropped % DROP_LOG_EVERY == 0 {
                            warn!(
                                dropped_total = dropped,
                                bytes = report.len(),
                                "storage queue full, report dropped"
                            );
                        }
                        continue;
                    }
                    Err(OfferError::Closed(_)) => Err(()),
                }
            };

            match handed_over {
                Ok(()) => self.stats.record_relayed(),
                Err(()) => {
                    // store worker is gone; nothing downstream can take more
                    self.stats.record_dropped();
                    warn!("storage queue closed, relay stopping");
                    break;
                }
            }
        }

        info!(
            received = self.stats.received(),
            relayed = self.stats.relayed(),
            dropped = self.stats.dropped(),
            "relay stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Report;
    use crate::ports::{queue, shutdown};
    use std::num::NonZeroUsize;

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn relays_in_fifo_order_and_ends_when_sources_are_gone() {
        let (in_tx, in_rx) = queue::bounded(cap(8));
        let (out_tx, mut out_rx) = queue::bounded(cap(8));
        let (_trigger, stop) = shutdown::channel();
        let stats = Arc::new(RelayStats::default());
        let relay = Relay::new(in_rx, out_tx, Duration::ZERO, Arc::clone(&stats));
        let worker = tokio::spawn(relay.run(stop));

        for i in 0..5 {
            in_tx.deliver(Report::new(format!("R{i}:task=A"))).await.unwrap();
        }
        drop(in_tx);
        worker.await.unwrap();

        for i in 0..5 {
            assert_eq!(out_rx.take().await.unwrap().as_str(), format!("R{i}:task=A"));
        }
        // relay dropped its sink on exit
        assert!(out_rx.take().await.is_none());
        assert_eq!(stats.relayed(), 5);
        assert_eq!(stats.dropped(), 0);
    }

    #[tokio::test]
    async fn full_storage_queue_drops_and_counts() {
        let (in_tx, in_rx) = queue::bounded(cap(8));
        let (out_tx, mut out_rx) = queue::bounded(cap(2));
        let (_trigger, stop) = shutdown::channel();
        let stats = Arc::new(RelayStats::default());
        let relay = Relay::new(in_rx, out_tx, Duration::ZERO, Arc::clone(&stats));

        // nobody consumes the storage queue while the relay runs
        for i in 0..5 {
            in_tx.deliver(Report::new(format!("R{i}:task=A"))).await.unwrap();
        }
        drop(in_tx);
        relay.run(stop).await;

        assert_eq!(stats.received(), 5);
        assert_eq!(stats.relayed(), 2);
        assert_eq!(stats.dropped(), 3);
        assert_eq!(out_rx.take().await.unwrap().as_str(), "R0:task=A");
        assert_eq!(out_rx.take().await.unwrap().as_str(), "R1:task=A");
    }

    #[tokio::test]
    async fn shutdown_drains_what_is_already_buffered() {
        let (in_tx, in_rx) = queue::bounded(cap(8));
        let (out_tx, mut out_rx) = queue::bounded(cap(8));
        let (trigger, stop) = shutdown::channel();
        let stats = Arc::new(RelayStats::default());

        for i in 0..3 {
            in_tx.deliver(Report::new(format!("R{i}:task=A"))).await.unwrap();
        }
        trigger.trigger();
        // the source still holds its sink; shutdown alone must end the relay
        Relay::new(in_rx, out_tx, Duration::ZERO, Arc::clone(&stats))
            .run(stop)
            .await;

        assert_eq!(stats.relayed(), 3);
        assert!(in_tx.is_closed());
        for i in 0..3 {
            assert_eq!(out_rx.take().await.unwrap().as_str(), format!("R{i}:task=A"));
        }
    }

    #[tokio::test]
    async fn drain_waits_for_a_slow_store_worker() {
        let (in_tx, in_rx) = queue::bounded(cap(8));
        let (out_tx, mut out_rx) = queue::bounded(cap(1));
        let (trigger, stop) = shutdown::channel();
        let stats = Arc::new(RelayStats::default());

        for i in 0..5 {
            in_tx.deliver(Report::new(format!("R{i}:task=A"))).await.unwrap();
        }
        trigger.trigger();

        let consumer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(report) = out_rx.take().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
                seen.push(report.into_string());
            }
            seen
        });
        Relay::new(in_rx, out_tx, Duration::ZERO, Arc::clone(&stats))
            .run(stop)
            .await;

        let seen = consumer.await.unwrap();
        assert_eq!(stats.dropped(), 0);
        assert_eq!(stats.relayed(), 5);
        assert_eq!(
            seen,
            (0..5).map(|i| format!("R{i}:task=A")).collect::<Vec<_>>()
        );
    }
}
