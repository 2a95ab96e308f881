//! UdpReportSource - 1 datagram = 1 report

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::domain::Report;
use crate::error::{SourceError, SourceInitError};
use crate::ports::{ReportSink, ReportSource, Shutdown};

pub const NAME: &str = "udp";

const MAX_DATAGRAM: usize = 64 * 1024;

pub struct UdpReportSource {
    bind: SocketAddr,
    sink: Option<ReportSink>,
    socket: Option<UdpSocket>,
}

impl UdpReportSource {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            sink: None,
            socket: None,
        }
    }

    /// Bound address, available after `initialize`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

#[async_trait]
impl ReportSource for UdpReportSource {
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
        let socket = UdpSocket::bind(self.bind)
            .await
            .map_err(|source| SourceInitError::Bind {
                name: NAME.to_string(),
                addr: self.bind,
                source,
            })?;
        info!(addr = ?socket.local_addr().ok(), "udp report source listening");
        self.socket = Some(socket);
        Ok(())
    }

    async fn run(self: Box<Self>, mut shutdown: Shutdown) -> Result<(), SourceError> {
        let (Some(sink), Some(socket)) = (self.sink, self.socket) else {
            return Err(SourceError::NotInitialized(NAME.to_string()));
        };
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let received = tokio::select! {
                _ = shutdown.requested() => break,
                received = socket.recv_from(&mut buf) => received,
            };
            let (len, peer) = match received {
                Ok(r) => r,
                Err(e) => {
                    // e.g. ICMP port unreachable surfacing on some platforms
                    warn!(error = %e, "udp receive failed");
                    continue;
                }
            };
            if len == 0 {
                continue;
            }
            let report = Report::new(String::from_utf8_lossy(&buf[..len]).into_owned());
            debug!(%peer, bytes = len, "udp report received");

            // queue が満杯なら source 側で待つ（backpressure）
            tokio::select! {
                _ = shutdown.requested() => break,
                delivered = sink.deliver(report) => {
                    if delivered.is_err() {
                        break;
                    }
                }
            }
        }

        info!("udp report source stopped");
        Ok(())
    }
}
