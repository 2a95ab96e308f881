//! ReportSource port - raw report text の producer

use async_trait::async_trait;

use super::{ReportSink, Shutdown};
use crate::error::{SourceError, SourceInitError};

/// A pluggable producer of raw report text.
///
/// Lifecycle (enforced by `AppBuilder`):
/// 1. `configure(sink)` binds the source to the incoming queue
/// 2. `initialize()` acquires sockets/files; failure aborts startup
/// 3. `run(shutdown)` runs as an independent worker until shutdown
///
/// `run` must enqueue every fully received report with `ReportSink::deliver`,
/// so a saturated backplane pushes back on the network instead of buffering.
#[async_trait]
pub trait ReportSource: Send {
    fn name(&self) -> &str;

    fn configure(&mut self, sink: ReportSink);

    async fn initialize(&mut self) -> Result<(), SourceInitError>;

    /// Returns `Ok(())` on shutdown or when the incoming queue closes.
    async fn run(self: Box<Self>, shutdown: Shutdown) -> Result<(), SourceError>;
}
