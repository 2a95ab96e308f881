//! tracehub-core
//!
//! Ingestion and query backplane for a trace report collector.
//!
//! # モジュール構成
//! - **domain**: Report / TaskId / Tag / TaskRecord と report field の解析
//! - **ports**: 抽象化レイヤー（ReportSource, ReportStore, Clock, bounded queue, Shutdown）
//! - **impls**: 組み込み実装（udp / tcp / static source, file-tree / memory store）
//! - **app**: 設定、registry、AppBuilder、relay、store worker、sync、shutdown、query
//! - **error**: エラー分類
//! - **observability**: backplane のカウンタ

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
