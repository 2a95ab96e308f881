//! tracehub - trace report collector の CLI
//!
//! - `tracehub serve [DATA_DIR]`: backplane を起動（Ctrl-C / SIGTERM で停止）
//! - `tracehub query --data-dir DIR ...`: file-tree store を開いて検索、JSON lines で出力

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::TryStreamExt;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracehub_core::app::{AppBuilder, BackplaneConfig, QueryFacade, StopReason, wait_for_signal};
use tracehub_core::domain::TaskId;
use tracehub_core::impls::FileTreeReportStore;
use tracehub_core::ports::{ReportSequence, ReportStore, SystemClock};

/// Exit status when a source or the store fails to start.
const EXIT_STARTUP: u8 = 1;
/// Exit status when the store became unusable while running.
const EXIT_STORE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "tracehub")]
#[command(about = "Trace report collector: ingestion backplane and query tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ingestion backplane until Ctrl-C / SIGTERM
    Serve(ServeArgs),
    /// Query a file-tree store
    Query(QueryArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Store directory for the file-tree store
    #[arg(env = "TRACEHUB_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// TOML config file; flags and environment override its values
    #[arg(short, long, env = "TRACEHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Report sources, comma-separated (udp, tcp, static)
    #[arg(long, env = "TRACEHUB_SOURCES", value_delimiter = ',')]
    sources: Option<Vec<String>>,

    /// Report store (file-tree, memory)
    #[arg(long, env = "TRACEHUB_STORE")]
    store: Option<String>,

    #[arg(long, env = "TRACEHUB_INCOMING_CAPACITY")]
    incoming_capacity: Option<usize>,

    #[arg(long, env = "TRACEHUB_STORAGE_CAPACITY")]
    storage_capacity: Option<usize>,

    /// Seconds between store syncs
    #[arg(long, env = "TRACEHUB_SYNC_INTERVAL_SECS")]
    sync_interval_secs: Option<u64>,

    /// Seconds to wait for the queues to drain on shutdown
    #[arg(long, env = "TRACEHUB_SHUTDOWN_GRACE_SECS")]
    shutdown_grace_secs: Option<u64>,

    /// How long the relay may wait for room in the storage queue (0 = never)
    #[arg(long, env = "TRACEHUB_RELAY_OFFER_TIMEOUT_MS")]
    relay_offer_timeout_ms: Option<u64>,

    #[arg(long, env = "TRACEHUB_UDP_BIND")]
    udp_bind: Option<SocketAddr>,

    #[arg(long, env = "TRACEHUB_TCP_BIND")]
    tcp_bind: Option<SocketAddr>,
}

impl ServeArgs {
    fn into_config(self) -> Result<BackplaneConfig> {
        let mut config = match &self.config {
            Some(path) => BackplaneConfig::load(path)?,
            None => BackplaneConfig::default(),
        };
        if let Some(dir) = self.data_dir {
            config.store_directory = Some(dir);
        }
        if let Some(sources) = self.sources {
            config.sources = sources;
        }
        if let Some(store) = self.store {
            config.store = store;
        }
        if let Some(n) = self.incoming_capacity {
            config.incoming_capacity = n;
        }
        if let Some(n) = self.storage_capacity {
            config.storage_capacity = n;
        }
        if let Some(secs) = self.sync_interval_secs {
            config.sync_interval_secs = secs;
        }
        if let Some(secs) = self.shutdown_grace_secs {
            config.shutdown_grace_secs = secs;
        }
        if let Some(ms) = self.relay_offer_timeout_ms {
            config.relay_offer_timeout_ms = ms;
        }
        if let Some(addr) = self.udp_bind {
            config.udp.bind = addr;
        }
        if let Some(addr) = self.tcp_bind {
            config.tcp.bind = addr;
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Store directory of a file-tree store
    #[arg(long, env = "TRACEHUB_DATA_DIR")]
    data_dir: PathBuf,

    #[command(subcommand)]
    what: QueryCommand,
}

#[derive(Subcommand, Debug)]
enum QueryCommand {
    /// Reports of one task, in persistence order
    Task { id: String },
    /// Most recently active tasks
    Latest {
        #[arg(default_value_t = 10)]
        n: usize,
    },
    /// Reports of the most recently active task
    LatestTask,
    /// Tasks active within a recency window
    Since {
        #[arg(long)]
        window_hours: Option<i64>,
    },
    /// Tasks carrying a tag
    Tag { tag: String },
    /// Task and report counts
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracehub=info,tracehub_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Query(args) => match query(args).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("query failed: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn serve(args: ServeArgs) -> ExitCode {
    let app = match start_app(args).await {
        Ok(app) => app,
        Err(e) => {
            error!("startup failed: {e:#}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    let mut running = app.start();
    match running.run_until(wait_for_signal()).await {
        Ok(StopReason::StoreFailed(e)) => {
            error!(error = %e, "store became unusable");
            ExitCode::from(EXIT_STORE)
        }
        Ok(reason) => {
            let counts = running.counts();
            info!(
                ?reason,
                received = counts.received,
                dropped = counts.dropped,
                persisted = counts.persisted,
                "tracehub stopped"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "store shutdown failed");
            ExitCode::from(EXIT_STORE)
        }
    }
}

async fn start_app(args: ServeArgs) -> Result<tracehub_core::app::App> {
    let config = args.into_config().context("failed to load configuration")?;
    info!(
        sources = ?config.sources,
        store = %config.store,
        directory = ?config.store_directory,
        "starting tracehub"
    );
    AppBuilder::new(config)
        .build()
        .await
        .context("failed to start backplane")
}

async fn query(args: QueryArgs) -> Result<()> {
    let store = FileTreeReportStore::open_existing(&args.data_dir, Arc::new(SystemClock))
        .await
        .with_context(|| format!("failed to open store at {}", args.data_dir.display()))?;
    let store = Arc::new(store);
    let facade = QueryFacade::new(store.clone(), Arc::new(SystemClock));

    let result = run_query(&facade, args.what).await;
    store.shutdown().await.context("failed to close store")?;
    result
}

async fn run_query(facade: &QueryFacade, what: QueryCommand) -> Result<()> {
    match what {
        QueryCommand::Task { id } => {
            print_reports(facade.reports_by_task(&TaskId::new(id)).await?).await
        }
        QueryCommand::Latest { n } => print_lines(&facade.latest_tasks(n).await?),
        QueryCommand::LatestTask => print_reports(facade.latest_task_reports().await?).await,
        QueryCommand::Since { window_hours } => {
            print_lines(&facade.tasks_in_window(window_hours).await?)
        }
        QueryCommand::Tag { tag } => print_lines(&facade.tasks_by_tag(&tag).await?),
        QueryCommand::Stats => print_lines(&[facade.stats().await?]),
    }
}

async fn print_reports(reports: ReportSequence) -> Result<()> {
    let mut stream = reports.stream();
    let mut out = std::io::stdout();
    while let Some(report) = stream.try_next().await? {
        writeln!(out, "{}", serde_json::to_string(&report)?)?;
    }
    Ok(())
}

fn print_lines<T: Serialize>(items: &[T]) -> Result<()> {
    let mut out = std::io::stdout().lock();
    for item in items {
        writeln!(out, "{}", serde_json::to_string(item)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn query_on_a_missing_store_leaves_the_disk_alone() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("typo");

        let result = query(QueryArgs {
            data_dir: data_dir.clone(),
            what: QueryCommand::Stats,
        })
        .await;

        assert!(result.is_err());
        assert!(!data_dir.exists());
    }
}
