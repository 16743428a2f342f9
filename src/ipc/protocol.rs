//! Wire types for the daemon's control socket.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "start", "session": "main", "options": {"kernel": "python"}, "auth_token": "..."}
//! {"command": "send", "session": "main", "code": "x = 1", "force": false, "auth_token": "..."}
//! {"command": "read", "session": "main", "since": 3, "drain": false, "auth_token": "..."}
//! {"command": "checkpoint", "session": "main", "checkpoint": "c0", "auth_token": "..."}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "no session named 'x'", "error_kind": "session_not_found"}
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;
use crate::orchestrator::StartOptions;
use crate::{AppError, Result};

/// Request envelope: the command plus the daemon's shared secret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpcRequest {
    /// Token copied from `daemon.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// The operation to perform.
    #[serde(flatten)]
    pub command: IpcCommand,
}

/// Operations exposed over the control socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Liveness check; answers with the daemon's pid.
    Ping,
    /// Start (or restart) a session.
    Start {
        session: String,
        #[serde(default)]
        options: StartOptions,
    },
    /// Stop a session.
    Stop { session: String },
    /// Status of one session.
    Status { session: String },
    /// Status of every session.
    List,
    /// Submit a payload; answers with the request id.
    Send {
        session: String,
        code: String,
        #[serde(default)]
        force: bool,
    },
    /// Read captured output.
    Read {
        session: String,
        #[serde(default)]
        since: Option<u64>,
        #[serde(default)]
        drain: bool,
    },
    /// Block until a request finishes or the timeout elapses.
    Wait {
        session: String,
        request_id: u64,
        timeout_ms: u64,
    },
    /// Create a checkpoint.
    Checkpoint { session: String, checkpoint: String },
    /// Restore a checkpoint.
    Rollback { session: String, checkpoint: String },
    /// List a session's checkpoints.
    Checkpoints { session: String },
    /// Delete a checkpoint.
    DeleteCheckpoint { session: String, checkpoint: String },
    /// Refuse unforced sends.
    Pause { session: String },
    /// Accept sends again.
    Resume { session: String },
    /// Forget a session that is not live.
    Remove { session: String },
    /// Stop every session and exit the daemon.
    Shutdown,
}

impl IpcCommand {
    /// Verb used in logs.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::Status { .. } => "status",
            Self::List => "list",
            Self::Send { .. } => "send",
            Self::Read { .. } => "read",
            Self::Wait { .. } => "wait",
            Self::Checkpoint { .. } => "checkpoint",
            Self::Rollback { .. } => "rollback",
            Self::Checkpoints { .. } => "checkpoints",
            Self::DeleteCheckpoint { .. } => "delete_checkpoint",
            Self::Pause { .. } => "pause",
            Self::Resume { .. } => "resume",
            Self::Remove { .. } => "remove",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error classification on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl IpcResponse {
    /// Successful response carrying `data`.
    #[must_use]
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            error_kind: None,
        }
    }

    /// Failed response describing `err`.
    #[must_use]
    pub fn failure(err: &AppError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(err.message().to_owned()),
            error_kind: Some(err.kind()),
        }
    }

    /// Turn the envelope back into a `Result`, restoring the error kind.
    ///
    /// # Errors
    ///
    /// Returns the daemon-side error when `ok` is false; an unclassified
    /// failure is reported as `AppError::Ipc`.
    pub fn into_result(self) -> Result<serde_json::Value> {
        if self.ok {
            return Ok(self.data.unwrap_or(serde_json::Value::Null));
        }
        let message = self
            .error
            .unwrap_or_else(|| "daemon reported an unspecified error".to_owned());
        Err(self.error_kind.unwrap_or(ErrorKind::Ipc).into_error(message))
    }
}
