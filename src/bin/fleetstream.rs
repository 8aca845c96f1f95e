//! Binary entry point for the fleetstream service.
#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use time::OffsetDateTime;
use tracing_subscriber::{fmt, EnvFilter};

use fleetstream::store::{StoreOptions, TelemetryStore};
use fleetstream::{server, Config, FleetError};

#[derive(Parser, Debug)]
#[command(
    name = "fleetstream",
    version,
    about = "Real-time fleet telemetry ingestion and distribution service",
    disable_help_subcommand = true
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true, env = "FLEETSTREAM_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug)]
struct Overrides {
    /// HTTP listen port.
    #[arg(long, env = "FLEETSTREAM_HTTP_PORT")]
    http_port: Option<u16>,

    /// MQTT broker hostname.
    #[arg(long, env = "FLEETSTREAM_BROKER_HOST")]
    broker_host: Option<String>,

    /// MQTT broker port.
    #[arg(long, env = "FLEETSTREAM_BROKER_PORT")]
    broker_port: Option<u16>,

    /// SQLite database path.
    #[arg(long, env = "FLEETSTREAM_DB_PATH")]
    db_path: Option<PathBuf>,

    /// MQTT topic filter to subscribe to.
    #[arg(long, env = "FLEETSTREAM_TOPIC")]
    topic: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service (the default when no subcommand is given).
    Serve,
    /// Run one forced rollup pass over the configured database and exit.
    Rollup,
    /// Validate the configuration and print the effective values.
    CheckConfig,
}

#[tokio::main]
async fn main() {
    install_tracing_subscriber();
    if let Err(err) = run().await {
        tracing::error!(error = %err, "fatal");
        std::process::exit(1);
    }
}

async fn run() -> fleetstream::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_toml_path(path)?,
        None => Config::default(),
    };
    if let Some(port) = cli.overrides.http_port {
        config.http_port = port;
    }
    if let Some(host) = cli.overrides.broker_host {
        config.broker.host = host;
    }
    if let Some(port) = cli.overrides.broker_port {
        config.broker.port = port;
    }
    if let Some(path) = cli.overrides.db_path {
        config.telemetry_db.path = path;
    }
    if let Some(topic) = cli.overrides.topic {
        config.subscription_topic = topic;
    }
    config.validate()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(config).await,
        Command::Rollup => run_rollup(config).await,
        Command::CheckConfig => {
            println!("{config:#?}");
            Ok(())
        }
    }
}

async fn run_rollup(config: Config) -> fleetstream::Result<()> {
    let store = TelemetryStore::open(
        &config.telemetry_db.path,
        StoreOptions::from(&config.telemetry_db),
    )?;
    let summary = tokio::task::spawn_blocking(move || {
        store.compute_rollups(OffsetDateTime::now_utc(), true)
    })
    .await
    .map_err(|err| FleetError::Internal(format!("rollup task failure: {err}")))??;

    if summary.windows.is_empty() {
        println!("no events to roll up");
        return Ok(());
    }
    for window in &summary.windows {
        println!(
            "window {:>6}s: {} bucket(s) over [{}, {})",
            window.window_seconds, window.buckets_upserted, window.range_start, window.range_end
        );
    }
    Ok(())
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
