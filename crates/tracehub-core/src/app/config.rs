//! BackplaneConfig - 起動時に一度だけ読む設定
//!
//! Layering: TOML file → environment / CLI overrides (applied by the caller)
//! → built-in defaults. Every key is optional in the file.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::impls::{file_tree_store, tcp_source, udp_source};

pub const DEFAULT_PORT: u16 = 7831;
pub const DEFAULT_CAPACITY: usize = 1024;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackplaneConfig {
    /// Source names, resolved through the registry in this order.
    pub sources: Vec<String>,
    pub store: String,
    pub incoming_capacity: usize,
    pub storage_capacity: usize,
    pub sync_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    /// 0 = pure `try_send`.
    pub relay_offer_timeout_ms: u64,
    pub store_directory: Option<PathBuf>,
    pub udp: ListenerConfig,
    pub tcp: ListenerConfig,
    pub static_reports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    pub bind: SocketAddr,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        }
    }
}

impl Default for BackplaneConfig {
    fn default() -> Self {
        Self {
            sources: vec![udp_source::NAME.to_string(), tcp_source::NAME.to_string()],
            store: file_tree_store::NAME.to_string(),
            incoming_capacity: DEFAULT_CAPACITY,
            storage_capacity: DEFAULT_CAPACITY,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            relay_offer_timeout_ms: 0,
            store_directory: None,
            udp: ListenerConfig::default(),
            tcp: ListenerConfig::default(),
            static_reports: Vec::new(),
        }
    }
}

/// Checked view of the numeric settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub incoming_capacity: NonZeroUsize,
    pub storage_capacity: NonZeroUsize,
    pub sync_interval: Duration,
    pub shutdown_grace: Duration,
    pub relay_offer_timeout: Duration,
}

impl BackplaneConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate and return the checked limits.
    pub fn validate(&self) -> Result<Limits, ConfigError> {
        let incoming_capacity = NonZeroUsize::new(self.incoming_capacity)
            .ok_or_else(|| ConfigError::invalid("incoming_capacity", "must be at least 1"))?;
        let storage_capacity = NonZeroUsize::new(self.storage_capacity)
            .ok_or_else(|| ConfigError::invalid("storage_capacity", "must be at least 1"))?;
        if self.sync_interval_secs == 0 {
            return Err(ConfigError::invalid("sync_interval_secs", "must be positive"));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::invalid("sources", "at least one source is required"));
        }
        if self.store == file_tree_store::NAME && self.store_directory.is_none() {
            return Err(ConfigError::invalid(
                "store_directory",
                "required by the file-tree store",
            ));
        }

        Ok(Limits {
            incoming_capacity,
            storage_capacity,
            sync_interval: Duration::from_secs(self.sync_interval_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            relay_offer_timeout: Duration::from_millis(self.relay_offer_timeout_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn with_dir() -> BackplaneConfig {
        BackplaneConfig {
            store_directory: Some(PathBuf::from("/tmp/tracehub")),
            ..BackplaneConfig::default()
        }
    }

    #[test]
    fn defaults_match_the_collector() {
        let config = BackplaneConfig::default();
        assert_eq!(config.sources, vec!["udp", "tcp"]);
        assert_eq!(config.store, "file-tree");
        assert_eq!(config.udp.bind.port(), 7831);
        assert_eq!(config.tcp.bind.port(), 7831);

        let limits = with_dir().validate().unwrap();
        assert_eq!(limits.incoming_capacity.get(), 1024);
        assert_eq!(limits.sync_interval, Duration::from_secs(5));
        assert!(limits.relay_offer_timeout.is_zero());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = BackplaneConfig::from_toml_str(
            r#"
            sources = ["static"]
            store = "memory"
            storage_capacity = 2
            static_reports = ["R1:task=A"]

            [udp]
            bind = "127.0.0.1:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.sources, vec!["static"]);
        assert_eq!(config.storage_capacity, 2);
        assert_eq!(config.incoming_capacity, DEFAULT_CAPACITY);
        assert_eq!(config.udp.bind.port(), 9000);
        assert_eq!(config.tcp.bind.port(), DEFAULT_PORT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(BackplaneConfig::from_toml_str("queue_size = 3").is_err());
    }

    #[rstest]
    #[case::incoming(BackplaneConfig { incoming_capacity: 0, ..with_dir() }, "incoming_capacity")]
    #[case::storage(BackplaneConfig { storage_capacity: 0, ..with_dir() }, "storage_capacity")]
    #[case::interval(BackplaneConfig { sync_interval_secs: 0, ..with_dir() }, "sync_interval_secs")]
    #[case::no_sources(BackplaneConfig { sources: vec![], ..with_dir() }, "sources")]
    #[case::no_directory(BackplaneConfig::default(), "store_directory")]
    fn invalid_values_are_config_errors(#[case] config: BackplaneConfig, #[case] key: &str) {
        match config.validate() {
            Err(ConfigError::Invalid { key: k, .. }) => assert_eq!(k, key),
            other => panic!("expected invalid {key}, got {other:?}"),
        }
    }

    #[test]
    fn load_reports_missing_file() {
        let err = BackplaneConfig::load(Path::new("/nonexistent/tracehub.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
