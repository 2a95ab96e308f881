//! TcpReportSource - length-prefixed frames over TCP
//!
//! Each connection carries a stream of frames: a 4-byte big-endian length
//! followed by that many bytes of report text.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::domain::Report;
use crate::error::{SourceError, SourceInitError};
use crate::ports::{ReportSink, ReportSource, Shutdown};

pub const NAME: &str = "tcp";

pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

pub struct TcpReportSource {
    bind: SocketAddr,
    sink: Option<ReportSink>,
    listener: Option<TcpListener>,
}

impl TcpReportSource {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            sink: None,
            listener: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

#[async_trait]
impl ReportSource for TcpReportSource {
    fn name(&self) -> &str {
        NAME
    }

    fn configure(&mut self, sink: ReportSink) {
        self.sink = Some(sink);
    }

    async fn initialize(&mut self) -> Result<(), SourceInitError> {
        if self.sink.is_none() {
            return Err(SourceInitError::NotConfigured(NAME.to_string()));
        }
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|source| SourceInitError::Bind {
                name: NAME.to_string(),
                addr: self.bind,
                source,
            })?;
        info!(addr = ?listener.local_addr().ok(), "tcp report source listening");
        self.listener = Some(listener);
        Ok(())
    }

    async fn run(self: Box<Self>, mut shutdown: Shutdown) -> Result<(), SourceError> {
        let (Some(sink), Some(listener)) = (self.sink, self.listener) else {
            return Err(SourceError::NotInitialized(NAME.to_string()));
        };
        let mut connections = JoinSet::new();
        let mut backoff = AcceptBackoff::new();

        let result = loop {
            tokio::select! {
                _ = shutdown.requested() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        backoff.reset();
                        debug!(%peer, "tcp report connection accepted");
                        connections.spawn(read_frames(stream, peer, sink.clone()));
                    }
                    Err(e) => {
                        // EMFILE などは即座に再発するので待ってから accept し直す
                        let delay = backoff.failed();
                        warn!(error = %e, retry_in = ?delay, "tcp accept failed");
                        tokio::select! {
                            _ = shutdown.requested() => break Ok(()),
                            _ = sleep(delay) => {}
                        }
                    }
                },
                // 終了した接続を回収
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        connections.shutdown().await;
        info!("tcp report source stopped");
        result
    }
}

/// Wait after a failed accept, doubling per consecutive failure.
struct AcceptBackoff {
    next: Duration,
}

impl AcceptBackoff {
    fn new() -> Self {
        Self {
            next: ACCEPT_BACKOFF_MIN,
        }
    }

    fn failed(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(ACCEPT_BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.next = ACCEPT_BACKOFF_MIN;
    }
}

async fn read_frames(stream: TcpStream, peer: SocketAddr, sink: ReportSink) {
    let codec = LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec();
    let mut frames = FramedRead::new(stream, codec);

    while let Some(frame) = frames.next().await {
        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%peer, error = %e, "closing tcp report connection");
                return;
            }
        };
        let report = Report::new(String::from_utf8_lossy(&bytes).into_owned());
        if sink.deliver(report).await.is_err() {
            return;
        }
    }
    debug!(%peer, "tcp report connection closed");
}
