use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use guardrail::cache::{
    AppCache, CacheLookup, CacheReport, ExpiringCache, FileStore, Namespace, WriteOutcome,
};
use guardrail::config::{GuardrailConfig, LoggingSettings};
use guardrail::maintenance::run_sweeper;

/// Maintenance tool for Guardrail cache stores.
#[derive(Debug, Parser)]
#[command(name = "guardrail", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache store file, overriding the configured path
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report live, expired, foreign and corrupt entries per namespace
    Stats,
    /// Remove expired entries and values that are not JSON
    Sweep,
    /// Remove quiz data, user stats and the leaderboard, keeping settings
    Purge {
        /// Only remove this namespace (quiz-data, user-stats, leaderboard, settings)
        #[arg(long, conflicts_with = "all")]
        namespace: Option<Namespace>,

        /// Remove every entry
        #[arg(long)]
        all: bool,
    },
    /// Print the value stored under a key
    Get { key: String },
    /// Store a JSON value under a key
    Put {
        key: String,
        /// JSON document to store
        value: String,
        /// Expire after this many milliseconds
        #[arg(long)]
        ttl_ms: Option<u64>,
    },
    /// Sweep periodically until interrupted
    Watch {
        /// Seconds between sweeps, overriding the configured interval
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Print the effective rate limit policies
    Policies,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GuardrailConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => GuardrailConfig::default(),
    };

    init_tracing(&config.logging);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store_path = cli.store.unwrap_or_else(|| config.cache.store_path.clone());
    let open_cache = || -> anyhow::Result<ExpiringCache<FileStore>> {
        let store = config
            .cache
            .open_store(Some(store_path.as_path()))
            .with_context(|| format!("failed to open store {}", store_path.display()))?;
        Ok(ExpiringCache::new(store))
    };

    match cli.command {
        Command::Policies => {
            let policies = config.rate_limiting.load_policies()?;
            print!("{}", serde_yaml::to_string(&policies)?);
        }
        Command::Stats => {
            let app = AppCache::new(open_cache()?);
            for namespace in Namespace::ALL {
                let report = app.inspect_namespace(namespace);
                print_report(namespace.name(), &report);
            }
            let other = app.inner().inspect_matching(|key| Namespace::of(key).is_none());
            print_report("other", &other);
            println!("{:<12} {} bytes", "used", app.inner().store().used_bytes());
        }
        Command::Sweep => {
            let removed = open_cache()?.clear_expired();
            println!("removed {} entries", removed);
        }
        Command::Purge { namespace, all } => {
            let cache = open_cache()?;
            let removed = match (namespace, all) {
                (_, true) => cache.clear_all(),
                (Some(namespace), false) => AppCache::new(cache).clear_namespace(namespace),
                (None, false) => AppCache::new(cache).clear_all(),
            };
            println!("removed {} entries", removed);
        }
        Command::Get { key } => match open_cache()?.lookup::<serde_json::Value>(&key) {
            CacheLookup::Hit(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            CacheLookup::Miss => println!("miss"),
            CacheLookup::Expired => println!("expired (removed)"),
            CacheLookup::Corrupt => println!("corrupt (removed)"),
        },
        Command::Put { key, value, ttl_ms } => {
            let ttl = ttl_ms.map(Duration::from_millis);
            let outcome = open_cache()?
                .put_json(&key, &value, ttl)
                .context("value must be a JSON document")?;
            match outcome {
                WriteOutcome::Stored => println!("stored"),
                WriteOutcome::StoredAfterSweep { evicted } => {
                    println!("stored after evicting {} expired entries", evicted)
                }
                WriteOutcome::Dropped => anyhow::bail!("store is full, value was not written"),
            }
        }
        Command::Watch { interval_secs } => {
            let every = interval_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.cache.sweep_interval());
            anyhow::ensure!(!every.is_zero(), "interval must be greater than zero");

            info!(store = %store_path.display(), interval_secs = every.as_secs(), "Watching store");
            let cache = Arc::new(open_cache()?);
            let removed = run_sweeper(cache, every, shutdown_signal()).await;
            info!(removed, "Watch finished");
        }
    }

    Ok(())
}

fn print_report(label: &str, report: &CacheReport) {
    println!(
        "{:<12} total={:<6} live={:<6} expired={:<6} foreign={:<6} corrupt={}",
        label, report.total, report.live, report.expired, report.foreign, report.corrupt
    );
}

fn init_tracing(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
