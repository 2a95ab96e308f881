//! Registry - 名前 → constructor の対応表
//!
//! Sources and stores are chosen by configuration name at startup. Each
//! name maps to a constructor closure; unknown names fail fast with
//! `ConfigError` before anything is created.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::app::config::BackplaneConfig;
use crate::domain::Report;
use crate::error::ConfigError;
use crate::impls::{
    FileTreeReportStore, MemoryReportStore, StaticReportSource, TcpReportSource, UdpReportSource,
    file_tree_store, memory_store, static_source, tcp_source, udp_source,
};
use crate::ports::{Clock, ReportSource, SharedStore};

pub type SourceFactory =
    Arc<dyn Fn(&BackplaneConfig) -> Result<Box<dyn ReportSource>, ConfigError> + Send + Sync>;

pub type StoreFactory =
    Arc<dyn Fn(&BackplaneConfig, Arc<dyn Clock>) -> Result<SharedStore, ConfigError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Registry {
    sources: HashMap<String, SourceFactory>,
    stores: HashMap<String, StoreFactory>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in sources (`udp`, `tcp`, `static`) and
    /// stores (`file-tree`, `memory`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert_source(udp_source::NAME, |config: &BackplaneConfig| {
            Ok(Box::new(UdpReportSource::new(config.udp.bind)) as Box<dyn ReportSource>)
        });
        registry.insert_source(tcp_source::NAME, |config: &BackplaneConfig| {
            Ok(Box::new(TcpReportSource::new(config.tcp.bind)) as Box<dyn ReportSource>)
        });
        registry.insert_source(static_source::NAME, |config: &BackplaneConfig| {
            let reports = config
                .static_reports
                .iter()
                .map(|text| Report::from(text.as_str()))
                .collect();
            Ok(Box::new(StaticReportSource::new(reports)) as Box<dyn ReportSource>)
        });
        registry.insert_store(
            file_tree_store::NAME,
            |config: &BackplaneConfig, clock: Arc<dyn Clock>| {
                let root = config.store_directory.clone().ok_or_else(|| {
                    ConfigError::invalid("store_directory", "required by the file-tree store")
                })?;
                Ok(Arc::new(FileTreeReportStore::new(root, clock)) as SharedStore)
            },
        );
        registry.insert_store(
            memory_store::NAME,
            |_: &BackplaneConfig, clock: Arc<dyn Clock>| {
                Ok(Arc::new(MemoryReportStore::new(clock)) as SharedStore)
            },
        );
        registry
    }

    pub fn register_source<F>(&mut self, name: &str, factory: F) -> Result<(), ConfigError>
    where
        F: Fn(&BackplaneConfig) -> Result<Box<dyn ReportSource>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        if self.sources.contains_key(name) {
            return Err(ConfigError::DuplicateSource(name.to_string()));
        }
        self.insert_source(name, factory);
        Ok(())
    }

    pub fn register_store<F>(&mut self, name: &str, factory: F) -> Result<(), ConfigError>
    where
        F: Fn(&BackplaneConfig, Arc<dyn Clock>) -> Result<SharedStore, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        if self.stores.contains_key(name) {
            return Err(ConfigError::DuplicateStore(name.to_string()));
        }
        self.insert_store(name, factory);
        Ok(())
    }

    pub fn source(&self, name: &str) -> Result<SourceFactory, ConfigError> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownSource(name.to_string()))
    }

    pub fn store(&self, name: &str) -> Result<StoreFactory, ConfigError> {
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownStore(name.to_string()))
    }

    /// Registered source names, sorted.
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.keys().cloned().collect();
        names.sort();
        names
    }

    fn insert_source<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BackplaneConfig) -> Result<Box<dyn ReportSource>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.sources.insert(name.to_string(), Arc::new(factory));
    }

    fn insert_store<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BackplaneConfig, Arc<dyn Clock>) -> Result<SharedStore, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.stores.insert(name.to_string(), Arc::new(factory));
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("sources", &self.source_names())
            .field("stores", &self.store_names())
            .finish()
    }
}
