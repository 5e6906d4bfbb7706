//! Fanout webhook delivery tool.
//!
//! Reads a job file, delivers every payload to every endpoint with per-endpoint
//! rate limiting, and prints the delivery report as JSON.

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use fanout_delivery::{DeliveryReport, FanoutEngine};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod config;
mod job;

use config::{Config, CONFIG_FILE};
use job::JobFile;

/// Exit status when at least one payload failed.
const EXIT_FAILED: u8 = 1;

/// Exit status when delivery was interrupted.
const EXIT_CANCELLED: u8 = 130;

/// Deliver payloads to webhook endpoints.
#[derive(Debug, Parser)]
#[command(name = "fanout", version, about)]
struct Cli {
    /// Job file listing endpoints and payloads (JSON).
    job_file: PathBuf,

    /// Configuration file.
    #[arg(short, long, env = "FANOUT_CONFIG", default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Print the report as a single line.
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    init_tracing(&config.log_filter);

    let job_file = JobFile::load(&cli.job_file)?;
    let payloads = job_file.payloads()?;

    let engine = FanoutEngine::http(config.to_client_config(), config.to_delivery_options())
        .context("failed to create delivery engine")?;
    let job = engine.job(&job_file.endpoints, payloads).context("invalid job")?;

    info!(
        job_id = %job.id(),
        endpoints = job.endpoints().len(),
        payloads = job.payloads().len(),
        max_attempts = config.max_attempts,
        "job loaded"
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            warn!("shutdown requested, stopping after the current round");
            cancel.cancel();
        }
    });

    let report = engine.deliver_until_cancelled(job, cancel).await;
    print_report(&report, cli.compact)?;

    Ok(exit_code(&report))
}

/// Initializes tracing on stderr so stdout carries only the report.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

fn print_report(report: &DeliveryReport, compact: bool) -> Result<()> {
    let json = if compact {
        serde_json::to_string(report)
    } else {
        serde_json::to_string_pretty(report)
    }
    .context("failed to serialize report")?;

    println!("{json}");
    Ok(())
}

fn exit_code(report: &DeliveryReport) -> ExitCode {
    if !report.all_delivered() {
        ExitCode::from(EXIT_FAILED)
    } else if report.cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else {
        ExitCode::SUCCESS
    }
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use fanout_core::{DeliveryResult, Endpoint, JobId};

    use super::*;

    fn report(results: Vec<DeliveryResult>, cancelled: bool) -> DeliveryReport {
        let mut map = BTreeMap::new();
        map.insert(Endpoint::parse("https://a.example.com/hook").unwrap(), results);
        DeliveryReport {
            job_id: JobId::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            rounds_completed: 1,
            cancelled,
            results: map,
        }
    }

    #[test]
    fn exit_code_reflects_outcome() {
        let delivered = report(vec![DeliveryResult::delivered(0, Vec::new())], false);
        assert_eq!(exit_code(&delivered), ExitCode::SUCCESS);

        let failed = report(vec![DeliveryResult::failed(0, Vec::new(), "boom")], false);
        assert_eq!(exit_code(&failed), ExitCode::from(EXIT_FAILED));

        let cancelled = report(vec![DeliveryResult::delivered(0, Vec::new())], true);
        assert_eq!(exit_code(&cancelled), ExitCode::from(EXIT_CANCELLED));
    }

    #[test]
    fn cli_parses_arguments() {
        let cli = Cli::try_parse_from(["fanout", "job.json", "--config", "alt.toml", "--compact"])
            .unwrap();
        assert_eq!(cli.job_file, PathBuf::from("job.json"));
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        assert!(cli.compact);
    }
}
