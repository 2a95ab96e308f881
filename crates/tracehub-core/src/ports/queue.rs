//! Bounded report queues.
//!
//! Both backplane queues are bounded FIFO channels. The producer side
//! (`ReportSink`) offers two policies:
//! - `deliver`: waits while the queue is full (admission control for sources)
//! - `offer`: gives up after a bounded wait (the relay's non-blocking hand-off)

use std::num::NonZeroUsize;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};

use crate::domain::Report;

/// The consumer side has gone away.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("report queue is closed")]
pub struct QueueClosed;

/// Outcome of a refused `offer`. The report is handed back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OfferError {
    #[error("report queue is full")]
    Full(Report),

    #[error("report queue is closed")]
    Closed(Report),
}

/// Create a bounded queue holding at most `capacity` reports.
pub fn bounded(capacity: NonZeroUsize) -> (ReportSink, ReportReceiver) {
    let (tx, rx) = mpsc::channel(capacity.get());
    (ReportSink { tx }, ReportReceiver { rx })
}

/// Producer handle. Cheap to clone; the queue closes once every clone is dropped.
#[derive(Debug, Clone)]
pub struct ReportSink {
    tx: mpsc::Sender<Report>,
}

impl ReportSink {
    /// Enqueue, waiting for room while the queue is full.
    pub async fn deliver(&self, report: Report) -> Result<(), QueueClosed> {
        self.tx.send(report).await.map_err(|_| QueueClosed)
    }

    /// Enqueue, waiting at most `wait` for room. A zero wait never suspends.
    pub async fn offer(&self, report: Report, wait: Duration) -> Result<(), OfferError> {
        if wait.is_zero() {
            return self.tx.try_send(report).map_err(|e| match e {
                TrySendError::Full(r) => OfferError::Full(r),
                TrySendError::Closed(r) => OfferError::Closed(r),
            });
        }
        self.tx.send_timeout(report, wait).await.map_err(|e| match e {
            SendTimeoutError::Timeout(r) => OfferError::Full(r),
            SendTimeoutError::Closed(r) => OfferError::Closed(r),
        })
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Reports currently buffered.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer handle. Exactly one per queue.
#[derive(Debug)]
pub struct ReportReceiver {
    rx: mpsc::Receiver<Report>,
}

impl ReportReceiver {
    /// Wait for the next report. `None` once the queue is closed and drained.
    pub async fn take(&mut self) -> Option<Report> {
        self.rx.recv().await
    }

    /// Refuse further sends; already buffered reports can still be taken.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn preserves_fifo_order() {
        let (sink, mut rx) = bounded(cap(8));
        for i in 0..5 {
            sink.deliver(Report::new(format!("r{i}"))).await.unwrap();
        }
        drop(sink);

        let mut seen = Vec::new();
        while let Some(r) = rx.take().await {
            seen.push(r.into_string());
        }
        assert_eq!(seen, vec!["r0", "r1", "r2", "r3", "r4"]);
    }

    #[tokio::test]
    async fn offer_is_refused_when_full() {
        let (sink, _rx) = bounded(cap(1));
        sink.offer(Report::new("a"), Duration::ZERO).await.unwrap();

        let err = sink.offer(Report::new("b"), Duration::ZERO).await.unwrap_err();
        assert_eq!(err, OfferError::Full(Report::new("b")));
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn offer_with_wait_gives_up_after_the_bound() {
        let (sink, _rx) = bounded(cap(1));
        sink.deliver(Report::new("a")).await.unwrap();

        let started = tokio::time::Instant::now();
        let err = sink
            .offer(Report::new("b"), Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(matches!(err, OfferError::Full(_)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn deliver_fails_after_receiver_closes() {
        let (sink, mut rx) = bounded(cap(2));
        sink.deliver(Report::new("kept")).await.unwrap();
        rx.close();

        assert_eq!(sink.deliver(Report::new("late")).await, Err(QueueClosed));
        assert_eq!(rx.take().await, Some(Report::new("kept")));
        assert_eq!(rx.take().await, None);
    }
}
