//! Error taxonomy for the backplane.
//!
//! Startup errors (`ConfigError`, `SourceInitError`, `StoreInitError`) are fatal
//! and surface through `StartupError`. Steady-state errors are isolated per item
//! (`PersistError`) unless the store reports `StoreError::Unusable`.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Unknown or non-instantiable implementation names, bad values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown report source `{0}`")]
    UnknownSource(String),

    #[error("unknown report store `{0}`")]
    UnknownStore(String),

    #[error("report source `{0}` is already registered")]
    DuplicateSource(String),

    #[error("report store `{0}` is already registered")]
    DuplicateStore(String),

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Resource acquisition failure of a report source.
#[derive(Debug, Error)]
pub enum SourceInitError {
    #[error("report source `{0}` was initialized before configure()")]
    NotConfigured(String),

    #[error("report source `{name}` could not bind {addr}: {source}")]
    Bind {
        name: String,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Fatal runtime failure of a report source worker.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("report source `{0}` was run before initialize()")]
    NotInitialized(String),

    #[error("report source `{name}` failed: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Durable storage could not be opened.
#[derive(Debug, Error)]
pub enum StoreInitError {
    #[error("cannot open store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt store file {path} (line {line}): {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// A single report could not be persisted. The report is dropped.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("report carries no task identifier")]
    MissingTaskId,

    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write report: {0}")]
    Io(#[from] io::Error),
}

/// Store runtime errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// The durable medium is broken. Fatal to the store worker.
    #[error("storage is unusable: {0}")]
    Unusable(String),

    #[error("store is shut down")]
    Closed,

    /// Opened with `open_existing`; queries only.
    #[error("store was opened read-only")]
    ReadOnly,

    #[error("store worker has no storage queue; call configure() first")]
    NotConfigured,

    #[error("store i/o error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Whether the store worker must stop and escalate.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unusable(_))
    }
}

/// Query-time failure, returned to the caller.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt record in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("invalid query argument: {0}")]
    InvalidArgument(String),
}

/// Anything that aborts startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    SourceInit(#[from] SourceInitError),

    #[error(transparent)]
    StoreInit(#[from] StoreInitError),
}
