//! Tax Rate Sync - monthly tax rate push
//!
//! Long-running service that wakes up every `interval_ms`, and on the last
//! calendar day of the month pushes tax rates changed in the trailing window
//! to the accounting platform.
//!
//! Exit codes:
//! - 0: Service stopped cleanly (or `--once` cycle succeeded)
//! - 1: Startup error or failed `--once` cycle

mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use tax_rate_sync::config::{Config, LogLevel};
use tax_rate_sync::gateway::HttpConnector;
use tax_rate_sync::log_sink::{FileLogSink, LogEntry, LogSink};
use tax_rate_sync::logging::init_logging;
use tax_rate_sync::orchestrator::UpdateOrchestrator;
use tax_rate_sync::scheduler::{LocalClock, Scheduler};
use tax_rate_sync::store::NdjsonTaxRateStore;

#[derive(Parser, Debug)]
#[command(name = "tax_rate_sync")]
#[command(about = "Push changed tax rates to the accounting platform at month end")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "tax_rate_sync.toml")]
    config: PathBuf,

    /// Run one update cycle now, skipping the month-end check, then exit
    #[arg(long)]
    once: bool,

    /// Override the configured log level
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    init_logging(
        args.log_level.unwrap_or(config.logging.level),
        config.logging.format,
    )?;

    tracing::info!(
        config = %args.config.display(),
        base_url = %config.api.base_url,
        records = %config.storage.records_path.display(),
        window_days = config.window_days,
        "configuration loaded"
    );

    let sink: Arc<dyn LogSink> = Arc::new(FileLogSink::new(&config.storage.log_store_path));
    let clock = Arc::new(LocalClock);
    let orchestrator = Arc::new(UpdateOrchestrator::new(
        config.api.clone(),
        config.window_days,
        Arc::new(NdjsonTaxRateStore::new(&config.storage.records_path)),
        Arc::new(HttpConnector::new(config.api.user_agent.clone())),
        sink.clone(),
        clock.clone(),
    ));

    if args.once {
        return match orchestrator.run_update_cycle().await {
            Ok(report) => {
                tracing::info!(
                    candidates = report.candidates,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "update cycle finished"
                );
                Ok(())
            }
            Err(e) => {
                sink.log(LogEntry::from_error(&e));
                Err(e.into())
            }
        };
    }

    let token = shutdown::create_shutdown_token();
    let mut handle = Scheduler::new(config.interval(), clock, orchestrator, sink).start(token);
    handle.join().await.context("scheduler task failed")?;

    Ok(())
}
