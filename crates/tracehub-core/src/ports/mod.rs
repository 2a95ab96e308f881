//! Ports - 抽象化レイヤー
//!
//! The seams of the backplane. Sources and stores are selected by name at
//! startup (see `app::registry`) and only ever seen through these traits.
//!
//! # 構成
//! - **ReportSource**: raw report text を incoming queue に流す producer
//! - **ReportStore / QueryableReportStore**: storage queue を消費して永続化・検索
//! - **queue**: bounded FIFO の両端（ReportSink / ReportReceiver）
//! - **Shutdown**: worker に停止を伝える signal
//! - **Clock**: 時刻の抽象化（テストでは FixedClock）

pub mod clock;
pub mod queue;
pub mod shutdown;
pub mod source;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::queue::{OfferError, QueueClosed, ReportReceiver, ReportSink};
pub use self::shutdown::{Shutdown, ShutdownTrigger};
pub use self::source::ReportSource;
pub use self::store::{QueryableReportStore, ReportSequence, ReportStore, SharedStore, StoreStats};
