#![forbid(unsafe_code)]

//! `replhost`: session daemon.
//!
//! Takes the state-directory lock, reconciles sessions left behind by a
//! previous daemon, and serves `replhost-ctl` over a local socket until a
//! signal or a `shutdown` command arrives.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use replhost::config::{expand_home, GlobalConfig};
use replhost::ipc::{spawn_ipc_server, IpcState};
use replhost::orchestrator::SessionManager;
use replhost::persistence::{DaemonInfo, StateDir};
use replhost::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "replhost", about = "Persistent interpreter session daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the state directory.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Override the IPC socket name.
    #[arg(long)]
    ipc_name: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("replhost daemon bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::discover(args.config.as_deref())?;
    if let Some(dir) = args.state_dir {
        config.state_dir = expand_home(&dir);
    }
    if let Some(name) = args.ipc_name {
        config.ipc_name = name;
    }
    let config = Arc::new(config);
    info!(state_dir = %config.state_dir.display(), ipc_name = %config.ipc_name, "configuration loaded");

    // ── Claim the state directory ───────────────────────
    let state_dir = StateDir::open(&config.state_dir)?;
    let lock = state_dir.lock()?;

    let auth_token = uuid::Uuid::new_v4().to_string();
    state_dir.write_daemon_info(&DaemonInfo {
        pid: std::process::id(),
        ipc_name: config.ipc_name.clone(),
        auth_token: auth_token.clone(),
        started_at: Utc::now(),
    })?;

    // ── Recover sessions from a previous daemon ─────────
    let manager = Arc::new(SessionManager::new(Arc::clone(&config), Some(state_dir.clone())));
    match manager.reconcile_persisted().await {
        Ok(0) => info!("no stale sessions found on startup"),
        Ok(count) => warn!(count, "marked sessions from a previous daemon as crashed"),
        Err(err) => error!(%err, "failed to reconcile persisted sessions"),
    }

    // ── Start IPC server ────────────────────────────────
    let shutdown = CancellationToken::new();
    let ipc_state = Arc::new(IpcState {
        manager: Arc::clone(&manager),
        auth_token: Some(auth_token),
        shutdown: shutdown.clone(),
    });
    let ipc_handle = match spawn_ipc_server(ipc_state) {
        Ok(handle) => handle,
        Err(err) => {
            if let Err(clear_err) = state_dir.clear_daemon_info() {
                warn!(%clear_err, "failed to remove daemon info");
            }
            return Err(err);
        }
    };

    info!(pid = std::process::id(), "replhost daemon ready");

    // ── Wait for shutdown ───────────────────────────────
    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        () = shutdown.cancelled() => info!("shutdown command received"),
    }
    shutdown.cancel();

    manager.stop_all().await;
    if let Err(err) = state_dir.clear_daemon_info() {
        error!(%err, "failed to remove daemon info");
    }
    if let Err(err) = ipc_handle.await {
        warn!(%err, "IPC server task failed");
    }
    drop(lock);

    info!("replhost daemon shut down");
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
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

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
