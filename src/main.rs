use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use escrow_ledger::notify::LogNotifier;
use escrow_ledger::reaper::Reaper;
use escrow_ledger::{Currency, DealService, Ledger, LedgerConfig, ReaperConfig};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Ledger daemon: keeps the escrow store open and runs the idle reaper.
#[derive(Parser, Debug)]
#[command(name = "escrowd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the sled database directory
    #[arg(long, env = "ESCROW_DB_PATH", default_value = "escrow.db")]
    db_path: String,

    /// Seconds between reaper sweeps
    #[arg(long, env = "ESCROW_REAPER_INTERVAL_SECS", default_value_t = 30)]
    reaper_interval_secs: u64,

    /// Seconds after completion before a deal is archived
    #[arg(long, env = "ESCROW_IDLE_THRESHOLD_SECS", default_value_t = 600)]
    idle_threshold_secs: u64,

    /// Seconds before an unfinished trigger claim is dropped
    #[arg(long, env = "ESCROW_CLAIM_TIMEOUT_SECS", default_value_t = 120)]
    claim_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ESCROW_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (json, pretty)
    #[arg(long, env = "ESCROW_LOG_FORMAT", default_value = "pretty")]
    log_format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    init_logging(&args.log_level, &args.log_format)?;

    let ledger = Ledger::open(&args.db_path)
        .with_context(|| format!("failed to open ledger at {}", args.db_path))?;

    let service = DealService::new(ledger.clone(), LedgerConfig::default());
    for currency in Currency::ALL {
        tracing::info!(
            %currency,
            outstanding = service.outstanding(currency)?,
            "ledger opened"
        );
    }

    let config = ReaperConfig {
        interval: Duration::from_secs(args.reaper_interval_secs),
        idle_threshold: Duration::from_secs(args.idle_threshold_secs),
        claim_timeout: Duration::from_secs(args.claim_timeout_secs),
    };
    let reaper = Reaper::new(ledger.clone(), Arc::new(LogNotifier), config).spawn();

    tracing::info!(db = %args.db_path, "escrowd running");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutting down");
    reaper.stop().await?;
    ledger.flush().await?;

    Ok(())
}

fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log level")?;
    let subscriber = tracing_subscriber::registry().with(env_filter);

    match format {
        "json" => subscriber
            .with(fmt::layer().json().with_target(true))
            .init(),
        _ => subscriber
            .with(fmt::layer().pretty().with_target(true))
            .init(),
    }

    Ok(())
}
