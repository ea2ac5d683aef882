//! chain-monitor entry point.

use anyhow::Context;
use chain_monitor::config::MonitorConfig;
use chain_monitor::logging::{init_logging, LogConfig};
use chain_monitor::monitoring::alerts::{read_daily_logs, RuleStore};
use chain_monitor::monitoring::report::{MonitoringReport, ReportPeriod};
use chain_monitor::monitoring::{HistoryStore, MonitoringLoop, TrendAnalyzer};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Testnet health monitor and alert dispatcher
#[derive(Parser, Debug)]
#[command(name = "chain-monitor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./chain-monitor.toml if present)
    #[arg(short, long, env = "CHAIN_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitoring loop until interrupted
    Run {
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,
    },
    /// Build a report from persisted history and alert logs
    Report {
        /// Include alerts from the last N hours
        #[arg(long, default_value = "24")]
        hours: i64,
    },
    /// Print the loaded alert rules
    Rules,
    /// Write a sample configuration file
    InitConfig {
        #[arg(default_value = "chain-monitor.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("chain-monitor: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command.unwrap_or(Command::Run { once: false });

    if let Command::InitConfig { path, force } = &command {
        if path.exists() && !force {
            anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
        }
        MonitorConfig::generate_sample_config(path)?;
        println!("Wrote sample configuration to {}", path.display());
        return Ok(());
    }

    let config = MonitorConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let mut log_config = LogConfig::from_settings(&config.log);
    if let Some(level) = cli.log_level {
        log_config = log_config.with_level(level);
    }
    let _guard = init_logging(&log_config).context("failed to initialize logging")?;

    config
        .ensure_directories()
        .context("failed to create monitoring directories")?;

    match command {
        Command::Run { once } => run_monitor(config, once).await,
        Command::Report { hours } => print_report(&config, hours).await,
        Command::Rules => print_rules(&config).await,
        Command::InitConfig { .. } => Ok(()),
    }
}

async fn run_monitor(config: MonitorConfig, once: bool) -> anyhow::Result<()> {
    let mut monitor = MonitoringLoop::from_config(config).await?;

    if once {
        let outcome = monitor.tick().await?;
        info!(
            status = outcome.record.status.as_str(),
            fired = outcome.fired_alerts,
            "Single tick completed"
        );
        monitor.stop(Utc::now()).await;
        return Ok(());
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    monitor.run(cancel).await?;
    Ok(())
}

async fn print_report(config: &MonitorConfig, hours: i64) -> anyhow::Result<()> {
    let now = Utc::now();
    let history = HistoryStore::load(&config.paths.history_file, config.retention(), now).await;
    let records = history.all();

    let since = now - chrono::Duration::hours(hours);
    let mut alerts = read_daily_logs(&config.paths.alerts_dir, since).await?;
    alerts.reverse();

    let trends = TrendAnalyzer::new(config.trend.clone()).analyze(&records);
    let report = MonitoringReport::build(
        &records,
        alerts,
        trends,
        ReportPeriod::covering(&records, now),
        now,
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn print_rules(config: &MonitorConfig) -> anyhow::Result<()> {
    let store = RuleStore::open(&config.paths.rules_file).await;
    let rules = store.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&rules)?);
    Ok(())
}

/// SIGINT / SIGTERM を待つ
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, flushing monitoring state");
}
