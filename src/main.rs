use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tweet_harvest::browser::chromium::ResponseObserver;
use tweet_harvest::browser::{BrowserSession, ChromiumSession};
use tweet_harvest::cli::Cli;
use tweet_harvest::config::Config;
use tweet_harvest::constants::{BLOCKED_MEDIA_MARKERS, RELEVANT_URL_MARKERS};
use tweet_harvest::harvest::classify::matches_any;
use tweet_harvest::harvest::{HarvestReport, Harvester, StopReason};
use tweet_harvest::output;
use tweet_harvest::sink::{CsvBufferSink, CsvFileSink, SinkOutput};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Everything the user typed is checked before the browser starts
    let token = config.resolve_token(cli.token.as_deref())?;
    let target = cli.target().context("Invalid arguments")?;

    let output_path = if cli.stdout {
        None
    } else {
        output::ensure_dir(&config.output_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create output directory: {}",
                    config.output_dir.display()
                )
            })?;
        Some(output::output_path(&config.output_dir, &cli.output_name()))
    };

    info!(
        mode = target.mode().as_str(),
        limit = cli.limit,
        url = %target.start_url(),
        "Starting tweet-harvest"
    );

    let mut session = ChromiumSession::launch(&config.chromium_config(token))
        .await
        .context("Failed to launch browser")?;

    if let Err(e) = session
        .install_request_filter(|url| matches_any(url, BLOCKED_MEDIA_MARKERS))
        .await
    {
        warn!("Media blocking unavailable: {e}");
    }
    let observer: ResponseObserver =
        Arc::new(|url, status| debug!(url, status, "Timeline response observed"));
    if let Err(e) = session
        .install_response_filter(
            RELEVANT_URL_MARKERS.iter().map(ToString::to_string).collect(),
            observer,
        )
        .await
    {
        warn!("Response logging unavailable: {e}");
    }

    let cancel = CancellationToken::new();
    let signal_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            warn!("Interrupt received, stopping after the current step");
            cancel.cancel();
        }
    });

    let harvester = Harvester::new(config.harvest_config()).with_cancellation(cancel);
    let report = match output_path {
        Some(path) => {
            let mut sink = CsvFileSink::new(path);
            harvester
                .run(&mut session, &mut sink, &target, cli.limit)
                .await
        }
        None => {
            let mut sink = CsvBufferSink::new();
            harvester
                .run(&mut session, &mut sink, &target, cli.limit)
                .await
        }
    };

    signal_handle.abort();
    if let Err(e) = session.close().await {
        warn!("Failed to close browser: {e}");
    }

    log_report(&report, cli.limit);

    if report.stop == StopReason::AuthFailed {
        bail!("Authentication failed; check --token or DEV_ACCESS_TOKEN");
    }
    if let Some(SinkOutput::Buffer(text)) = &report.output {
        print!("{text}");
    }

    Ok(())
}

fn log_report(report: &HarvestReport, limit: usize) {
    let collected = report.records.len();
    match &report.output {
        Some(SinkOutput::File { path, rows }) => {
            info!(path = %path.display(), rows, "Output written");
        }
        Some(SinkOutput::Buffer(_)) => debug!("Output buffered for stdout"),
        None => warn!("No output produced"),
    }
    if report.sink_errors > 0 {
        warn!(
            errors = report.sink_errors,
            "Some records could not be written to the output"
        );
    }
    if collected < limit {
        warn!(
            collected,
            limit,
            reason = %report.stop,
            "Harvest ended before reaching the limit"
        );
    }
    info!(
        collected,
        responses = report.responses,
        timeouts = report.timeouts,
        rate_limit_hits = report.rate_limit_hits,
        reason = %report.stop,
        "Harvest complete"
    );
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tweet_harvest=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    // Logs go to stderr so `--stdout` output stays clean
    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
