//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 全ての source / store 名を registry で解決してから何かを作る
//! - 未知の名前は queue や store が存在する前に `ConfigError`
//! - source / store の initialize 失敗はそのまま起動失敗
//!
//! ```ignore
//! let app = AppBuilder::new(config).build().await?;
//! let mut running = app.start();
//! running.run_until(wait_for_signal()).await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::app::config::BackplaneConfig;
use crate::app::registry::Registry;
use crate::app::relay::Relay;
use crate::app::runtime::App;
use crate::app::store_worker::StoreWorker;
use crate::error::{ConfigError, StartupError};
use crate::observability::{RelayStats, StoreWorkerStats};
use crate::ports::{Clock, ReportSource, SystemClock, queue};

pub struct AppBuilder {
    config: BackplaneConfig,
    registry: Registry,
    clock: Arc<dyn Clock>,
}

impl AppBuilder {
    /// Builder over the built-in registry and the system clock.
    pub fn new(config: BackplaneConfig) -> Self {
        Self {
            config,
            registry: Registry::with_builtins(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &BackplaneConfig {
        &self.config
    }

    /// Resolve, create and initialize everything. Nothing is spawned yet.
    pub async fn build(self) -> Result<App, StartupError> {
        let limits = self.config.validate()?;

        // 1. 名前解決（まだ何も作らない）
        let mut seen = HashSet::new();
        let mut source_factories = Vec::with_capacity(self.config.sources.len());
        for name in &self.config.sources {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::invalid(
                    "sources",
                    format!("source `{name}` is listed twice"),
                )
                .into());
            }
            source_factories.push(self.registry.source(name)?);
        }
        let store_factory = self.registry.store(&self.config.store)?;

        // 2. 構築
        let mut sources: Vec<Box<dyn ReportSource>> = source_factories
            .iter()
            .map(|factory| factory(&self.config))
            .collect::<Result<_, _>>()?;
        let store = store_factory(&self.config, Arc::clone(&self.clock))?;

        let (incoming_sink, incoming_rx) = queue::bounded(limits.incoming_capacity);
        let (storage_sink, storage_rx) = queue::bounded(limits.storage_capacity);

        // 3. initialize: sources → store
        for source in sources.iter_mut() {
            source.configure(incoming_sink.clone());
            source.initialize().await?;
            info!(source = %source.name(), "report source initialized");
        }
        // only sources may keep the incoming queue open
        drop(incoming_sink);

        store.initialize().await?;
        info!(store = %store.name(), "report store initialized");

        let relay_stats = Arc::new(RelayStats::default());
        let store_stats = Arc::new(StoreWorkerStats::default());

        let mut store_worker = StoreWorker::new(Arc::clone(&store), Arc::clone(&store_stats));
        store_worker.configure(storage_rx);
        let relay = Relay::new(
            incoming_rx,
            storage_sink,
            limits.relay_offer_timeout,
            Arc::clone(&relay_stats),
        );

        Ok(App {
            sources,
            relay,
            store_worker,
            store,
            clock: self.clock,
            limits,
            relay_stats,
            store_stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config(sources: &[&str]) -> BackplaneConfig {
        BackplaneConfig {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            store: "memory".into(),
            ..BackplaneConfig::default()
        }
    }

    #[tokio::test]
    async fn unknown_source_is_rejected() {
        let err = AppBuilder::new(memory_config(&["static", "carrier-pigeon"]))
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StartupError::Config(ConfigError::UnknownSource(name)) if name == "carrier-pigeon"
        ));
    }

    #[tokio::test]
    async fn unknown_store_is_rejected() {
        let config = BackplaneConfig {
            store: "cassandra".into(),
            ..memory_config(&["static"])
        };
        let err = AppBuilder::new(config).build().await.err().unwrap();
        assert!(matches!(err, StartupError::Config(ConfigError::UnknownStore(_))));
    }

    #[tokio::test]
    async fn duplicate_source_names_are_rejected() {
        let err = AppBuilder::new(memory_config(&["static", "static"]))
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StartupError::Config(ConfigError::Invalid { key: "sources", .. })
        ));
    }

    #[tokio::test]
    async fn bind_failure_aborts_startup() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = memory_config(&["tcp"]);
        config.tcp.bind = taken.local_addr().unwrap();

        let err = AppBuilder::new(config).build().await.err().unwrap();
        assert!(matches!(err, StartupError::SourceInit(_)));
    }
}
