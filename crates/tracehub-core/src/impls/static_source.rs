//! StaticReportSource - 設定済みの report を一度だけ流す source
//!
//! Emits its fixed list once, in order, then idles until shutdown.
//! Handy for smoke tests and synthetic load.

use async_trait::async_trait;
use tracing::info;

use crate::domain::Report;
use crate::error::{SourceError, SourceInitError};
use crate::ports::{ReportSink, ReportSource, Shutdown};

pub const NAME: &str = "static";

pub struct StaticReportSource {
    name: String,
    reports: Vec<Report>,
    sink: Option<ReportSink>,
}

impl StaticReportSource {
    pub fn new(reports: Vec<Report>) -> Self {
        Self::named(NAME, reports)
    }

    pub fn named(name: impl Into<String>, reports: Vec<Report>) -> Self {
        Self {
            name: name.into(),
            reports,
            sink: None,
        }
    }
}

#[async_trait]
impl ReportSource for StaticReportSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, sink: ReportSink) {
        self.sink = Some(sink);
    }

    async fn initialize(&mut self) -> Result<(), SourceInitError> {
        if self.sink.is_none() {
            return Err(SourceInitError::NotConfigured(self.name.clone()));
        }
        Ok(())
    }

    async fn run(self: Box<Self>, mut shutdown: Shutdown) -> Result<(), SourceError> {
        let Some(sink) = self.sink else {
            return Err(SourceError::NotInitialized(self.name));
        };
        let total = self.reports.len();

        for report in self.reports {
            tokio::select! {
                _ = shutdown.requested() => return Ok(()),
                delivered = sink.deliver(report) => {
                    if delivered.is_err() {
                        return Ok(());
                    }
                }
            }
        }
        info!(source = %self.name, reports = total, "static reports delivered");

        // sink を保持したまま待つと incoming queue が閉じないので手放す
        drop(sink);
        shutdown.requested().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{queue, shutdown};
    use std::num::NonZeroUsize;

    #[tokio::test]
    async fn emits_once_in_order_then_releases_the_queue() {
        let (sink, mut rx) = queue::bounded(NonZeroUsize::new(1).unwrap());
        let (trigger, stop) = shutdown::channel();

        let mut source =
            StaticReportSource::new(vec![Report::from("R1:task=A"), Report::from("R2:task=A")]);
        source.configure(sink);
        source.initialize().await.unwrap();
        let worker = tokio::spawn(Box::new(source).run(stop));

        assert_eq!(rx.take().await, Some(Report::from("R1:task=A")));
        assert_eq!(rx.take().await, Some(Report::from("R2:task=A")));
        // the source idles without holding the sink
        assert_eq!(rx.take().await, None);
        assert!(!worker.is_finished());

        trigger.trigger();
        worker.await.unwrap().unwrap();
    }
}
