//! Local IPC server for `replhost-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! (see [`crate::ipc::protocol`]) and routes them to the session manager.

use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::ipc::protocol::{IpcCommand, IpcRequest, IpcResponse};
use crate::orchestrator::SessionManager;
use crate::{AppError, Result};

/// Shared state for connection handlers.
#[derive(Debug)]
pub struct IpcState {
    /// Session supervisor.
    pub manager: Arc<SessionManager>,
    /// Shared secret every request must carry; `None` disables the check.
    pub auth_token: Option<String>,
    /// Cancelled by the `shutdown` command and on daemon exit.
    pub shutdown: CancellationToken,
}

/// Spawn the IPC server task.
///
/// The listener stops accepting once `state.shutdown` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(state: Arc<IpcState>) -> Result<tokio::task::JoinHandle<()>> {
    let name = state.manager.config().ipc_name.clone();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = state.shutdown.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(stream, Arc::clone(&state)));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(stream: interprocess::local_socket::tokio::Stream, state: Arc<IpcState>) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(request, &state).await,
                        Err(err) => IpcResponse::failure(&AppError::Ipc(format!("invalid request: {err}"))),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed","error_kind":"ipc"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        debug!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Authenticate and route an IPC command.
async fn dispatch_command(request: IpcRequest, state: &IpcState) -> IpcResponse {
    let verb = request.command.verb();
    let span = info_span!("ipc_command", command = verb);

    if let Some(ref expected) = state.auth_token {
        match request.auth_token {
            Some(ref provided) if provided == expected => {}
            _ => {
                warn!(command = verb, "IPC request rejected: invalid auth token");
                return IpcResponse::failure(&AppError::Ipc("unauthorized".into()));
            }
        }
    }

    match execute(request.command, state).instrument(span).await {
        Ok(data) => IpcResponse::success(data),
        Err(err) => {
            debug!(command = verb, %err, "IPC command failed");
            IpcResponse::failure(&err)
        }
    }
}

fn to_data<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

async fn execute(command: IpcCommand, state: &IpcState) -> Result<serde_json::Value> {
    let manager = &state.manager;
    match command {
        IpcCommand::Ping => Ok(serde_json::json!({ "pid": std::process::id() })),
        IpcCommand::Start { session, options } => to_data(&manager.start(&session, options).await?),
        IpcCommand::Stop { session } => to_data(&manager.stop(&session).await?),
        IpcCommand::Status { session } => to_data(&manager.status(&session).await?),
        IpcCommand::List => to_data(&manager.list().await),
        IpcCommand::Send {
            session,
            code,
            force,
        } => {
            let request_id = manager.send(&session, code, force).await?;
            Ok(serde_json::json!({ "request_id": request_id }))
        }
        IpcCommand::Read {
            session,
            since,
            drain,
        } => to_data(&manager.read(&session, since, drain).await?),
        IpcCommand::Wait {
            session,
            request_id,
            timeout_ms,
        } => to_data(
            &manager
                .wait(&session, request_id, Duration::from_millis(timeout_ms))
                .await?,
        ),
        IpcCommand::Checkpoint {
            session,
            checkpoint,
        } => to_data(&manager.checkpoint(&session, &checkpoint).await?),
        IpcCommand::Rollback {
            session,
            checkpoint,
        } => to_data(&manager.rollback(&session, &checkpoint).await?),
        IpcCommand::Checkpoints { session } => to_data(&manager.list_checkpoints(&session).await?),
        IpcCommand::DeleteCheckpoint {
            session,
            checkpoint,
        } => {
            manager.delete_checkpoint(&session, &checkpoint).await?;
            Ok(serde_json::json!({ "session": session, "deleted": checkpoint }))
        }
        IpcCommand::Pause { session } => to_data(&manager.pause(&session).await?),
        IpcCommand::Resume { session } => to_data(&manager.resume(&session).await?),
        IpcCommand::Remove { session } => {
            manager.remove(&session).await?;
            Ok(serde_json::json!({ "session": session, "removed": true }))
        }
        IpcCommand::Shutdown => {
            info!("shutdown requested over IPC");
            state.shutdown.cancel();
            Ok(serde_json::json!({ "shutting_down": true }))
        }
    }
}
