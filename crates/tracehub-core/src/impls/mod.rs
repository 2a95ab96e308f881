//! Impls - ports の組み込み実装
//!
//! # Sources
//! - **UdpReportSource** (`udp`): 1 datagram = 1 report
//! - **TcpReportSource** (`tcp`): length-prefixed frames
//! - **StaticReportSource** (`static`): fixed list, for smoke tests
//!
//! # Stores
//! - **FileTreeReportStore** (`file-tree`): directory tree + in-memory index
//! - **MemoryReportStore** (`memory`): 開発・テスト用

pub mod file_tree_store;
pub mod index;
pub mod memory_store;
pub mod static_source;
pub mod tcp_source;
pub mod udp_source;

pub use self::file_tree_store::FileTreeReportStore;
pub use self::index::TaskIndex;
pub use self::memory_store::MemoryReportStore;
pub use self::static_source::StaticReportSource;
pub use self::tcp_source::TcpReportSource;
pub use self::udp_source::UdpReportSource;
