#![forbid(unsafe_code)]

//! `pilot-deck` — browser automation control plane server binary.
//!
//! Bootstraps configuration, wires the session manager to the HTTP
//! decision oracle and browser sidecars, then serves the HTTP/websocket
//! transport and the IPC server for `pilot-deck-ctl`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use pilot_deck::config::GlobalConfig;
use pilot_deck::driver::http_browser::HttpBrowserLauncher;
use pilot_deck::driver::http_oracle::HttpOracle;
use pilot_deck::driver::Collaborators;
use pilot_deck::ipc::server::spawn_ipc_server;
use pilot_deck::orchestrator::bridge::EventBridge;
use pilot_deck::orchestrator::session_manager::SessionManager;
use pilot_deck::stream::FrameStreamer;
use pilot_deck::transport::{self, AppState};
use pilot_deck::{AppError, Result};

/// Environment variable holding the IPC shared secret.
const IPC_TOKEN_ENV: &str = "PILOT_DECK_IPC_TOKEN";

/// How long running sessions get to reach a suspension point on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "pilot-deck",
    about = "Browser automation control plane",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured HTTP port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("pilot-deck server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    let config = Arc::new(config);
    info!(port = config.http_port, "configuration loaded");

    // ── Collaborators ───────────────────────────────────
    let oracle_config = config
        .oracle
        .as_ref()
        .ok_or_else(|| AppError::Config("[oracle] section is required".into()))?;
    let browser_config = config
        .browser
        .as_ref()
        .ok_or_else(|| AppError::Config("[browser] section is required".into()))?;
    let collaborators = Collaborators {
        oracle: Arc::new(HttpOracle::new(oracle_config)?),
        launcher: Arc::new(HttpBrowserLauncher::new(browser_config)?),
    };

    // ── Build shared application state ──────────────────
    let runtime = Handle::current();
    let bridge = EventBridge::new(&config.bridge, runtime.clone());
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&config),
        bridge,
        collaborators,
        runtime.clone(),
    ));
    let streamer = FrameStreamer::new(&config.stream, runtime);
    let ipc_auth_token = std::env::var(IPC_TOKEN_ENV).ok().filter(|token| !token.is_empty());
    if ipc_auth_token.is_none() {
        warn!("{IPC_TOKEN_ENV} not set; IPC commands are accepted without a token");
    }

    let state = Arc::new(AppState::new(
        Arc::clone(&config),
        Arc::clone(&sessions),
        streamer,
        ipc_auth_token,
    ));

    // ── Start transports ────────────────────────────────
    let ct = CancellationToken::new();

    let ipc_handle = spawn_ipc_server(Arc::clone(&state), ct.clone())?;

    let http_ct = ct.clone();
    let http_state = Arc::clone(&state);
    let http_handle = tokio::spawn(async move {
        if let Err(err) = transport::serve(http_state, http_ct).await {
            error!(%err, "http transport failed");
        }
    });

    info!("pilot-deck ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received; stopping sessions");

    // A second signal during the drain exits immediately.
    tokio::spawn(async {
        shutdown_signal().await;
        warn!("second shutdown signal received; forcing exit");
        std::process::exit(130);
    });

    sessions.shutdown(SHUTDOWN_GRACE).await;
    ct.cancel();

    // ── Wait for background tasks ───────────────────────
    let _ = tokio::join!(http_handle, ipc_handle);
    info!("pilot-deck shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

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
