#![forbid(unsafe_code)]

//! `flutter-debug-bridge`: debug adapter binary.
//!
//! Loads configuration, initializes tracing (never on stdout, which may
//! carry the debug protocol) and serves one client on stdio or TCP.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use flutter_debug_bridge::config::BridgeConfig;
use flutter_debug_bridge::daemon::spawner::TokioSpawner;
use flutter_debug_bridge::dap::server;
use flutter_debug_bridge::runtime::vm_service::WebSocketConnector;
use flutter_debug_bridge::session::debug_session::SessionDeps;
use flutter_debug_bridge::session::hooks::FlutterHooks;
use flutter_debug_bridge::session::registry::SessionRegistry;
use flutter_debug_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "flutter-debug-bridge", about = "Flutter debug adapter", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accept a single client on this TCP port instead of stdio.
    #[arg(long)]
    port: Option<u16>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format, args.log_file.as_ref())?;
    info!("flutter-debug-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match &args.config {
        Some(path) => BridgeConfig::load_from_path(path)?,
        None => BridgeConfig::default(),
    };
    let config = Arc::new(config);
    info!(runner = %config.runner, namespace = %config.namespace, "configuration loaded");

    let deps = SessionDeps {
        connector: Arc::new(WebSocketConnector::new(config.timeouts.command())),
        config,
        registry: SessionRegistry::new(),
        spawner: Arc::new(TokioSpawner),
        hooks: Arc::new(FlutterHooks),
    };

    // ── Serve the client ────────────────────────────────
    let outcome = match args.port {
        Some(port) => server::serve_tcp(port, deps).await,
        None => server::serve_stdio(deps).await,
    };

    if let Err(err) = &outcome {
        error!(%err, "debug adapter failed");
    }
    info!("flutter-debug-bridge shut down");
    outcome
}

fn init_tracing(log_format: LogFormat, log_file: Option<&PathBuf>) -> Result<()> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| AppError::Config(format!("cannot open log file: {err}")))?;
            install_subscriber(log_format, Mutex::new(file))
        }
        None => install_subscriber(log_format, std::io::stderr),
    }
}

fn install_subscriber<W>(log_format: LogFormat, writer: W) -> Result<()>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(false);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
