//! `cerebrum-migrate`: populate the audit log from the legacy change log.

use anyhow::{Context, Result};
use cerebrum::core::audit::callbacks::CallbackRegistry;
use cerebrum::core::config::CerebrumConfig;
use cerebrum::core::db::DbSettings;
use cerebrum::core::pool::PoolSettings;
use cerebrum::modules::migrate::{self, MigrationOptions};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[clap(
    name = "cerebrum-migrate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Migrate change_log records to the audit log"
)]
struct Cli {
    /// change_id to process (range N-M or single value N)
    #[clap(required = true, value_parser = parse_range)]
    change_ids: Vec<(i64, i64)>,
    /// Commit changes
    #[clap(short = 'c', long, conflicts_with = "dryrun")]
    commit: bool,
    /// Dry run (do not commit; this is the default)
    #[clap(short = 'r', long)]
    dryrun: bool,
    /// Number of worker threads (default from config)
    #[clap(long, value_name = "N")]
    threads: Option<usize>,
    /// Report statistics every N seconds; 0 disables (default from config)
    #[clap(long, value_name = "N")]
    stats: Option<f64>,
    /// TOML config file
    #[clap(long, default_value = "cerebrum.toml")]
    config: PathBuf,
    /// Database file (overrides the config)
    #[clap(long)]
    database: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset
    #[clap(long, default_value = "info")]
    log_level: String,
}

fn parse_range(raw: &str) -> Result<(i64, i64), String> {
    migrate::parse_change_id_range(raw).map_err(|e| e.to_string())
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    tracing::info!(args = ?cli, "start of cerebrum-migrate");

    let mut config = CerebrumConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    if let Some(threads) = cli.threads {
        anyhow::ensure!(threads > 0, "--threads must be at least 1");
        config.pool.workers = threads;
    }
    if let Some(stats) = cli.stats {
        anyhow::ensure!(
            stats.is_finite() && stats >= 0.0,
            "--stats must be a finite, non-negative number"
        );
        config.pool.stats_interval_secs = stats;
    }
    let db_path = cli.database.clone().unwrap_or_else(|| config.database.path.clone());

    let options = MigrationOptions {
        ranges: cli.change_ids.clone(),
        commit: cli.commit && !cli.dryrun,
        pool: PoolSettings::from(&config.pool),
    };
    let settings = DbSettings::new(config, CallbackRegistry::with_defaults());

    let report = migrate::run_migration(&db_path, &settings, &options)
        .with_context(|| format!("migrating change_log in {}", db_path.display()))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
