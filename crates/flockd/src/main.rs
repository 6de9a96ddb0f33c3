//! flockd: the flock daemon binary.
//!
//! # Usage
//!
//! ```text
//! flockd run --config /etc/flock/flock.toml
//! flockd run --config flock.toml --log-format json
//! flockd check-config --config flock.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flockd::{Fleet, build_router, daemon, load_config};

const DEFAULT_FILTER: &str = "info,flockd=debug,flock=debug";

#[derive(Parser)]
#[command(name = "flockd", about = "flock worker-fleet daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loops and the admission API.
    Run {
        /// Path to flock.toml (defaults apply when omitted).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Log output format.
        #[arg(long, value_enum, default_value = "text")]
        log_format: LogFormat,
    },
    /// Parse and validate a config file, then print the effective config.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, log_format } => {
            init_tracing(log_format);
            run(config).await
        }
        Command::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}

async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path.as_deref())?;
    info!(
        provisioner = ?config.provisioner.kind,
        min_workers = config.fleet.min_workers,
        max_workers = config.fleet.max_workers,
        worker_capacity = config.fleet.worker_capacity,
        "flockd starting"
    );

    // ── Subsystems ─────────────────────────────────────────────

    let (provisioner, health) = daemon::ports_for(&config);
    let fleet = Fleet::new(&config, provisioner, health);
    let router = build_router(fleet.api_state());

    // ── Shutdown signal + control loops ────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = fleet.spawn(shutdown_rx);

    // ── Admission API ──────────────────────────────────────────

    let listener = tokio::net::TcpListener::bind(config.api.listen).await?;
    info!(addr = %config.api.listen, "API server starting");

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    for handle in handles {
        let _ = handle.await;
    }

    info!("flockd stopped");
    Ok(())
}
