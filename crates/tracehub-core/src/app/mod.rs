//! App - アプリケーション層
//!
//! ports を組み合わせて backplane を組み立て、起動・停止します。
//!
//! # 主要コンポーネント
//! - **BackplaneConfig**: 起動時に一度だけ読む設定
//! - **Registry**: 設定名 → source / store の constructor
//! - **AppBuilder**: 名前解決・構築・初期化（Fail-fast）
//! - **Relay**: incoming queue → storage queue（満杯なら drop して数える）
//! - **StoreWorker**: storage queue → store.persist
//! - **SyncScheduler**: 定期 sync
//! - **ShutdownCoordinator**: store.shutdown() をちょうど一度
//! - **App / RunningApp**: 構築済み / 実行中の backplane
//! - **QueryFacade**: 検索 API

pub mod builder;
pub mod config;
pub mod query;
pub mod registry;
pub mod relay;
pub mod runtime;
pub mod shutdown;
pub mod store_worker;
pub mod sync_scheduler;
pub mod workers;

// 主要な型を再エクスポート
pub use self::builder::AppBuilder;
pub use self::config::{BackplaneConfig, Limits, ListenerConfig};
pub use self::query::QueryFacade;
pub use self::registry::Registry;
pub use self::relay::Relay;
pub use self::runtime::{App, RunningApp, StopReason};
pub use self::shutdown::{ShutdownCoordinator, wait_for_signal};
pub use self::store_worker::StoreWorker;
pub use self::sync_scheduler::SyncScheduler;
pub use self::workers::WorkerGroup;
