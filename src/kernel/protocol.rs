//! Kernel wire protocol.
//!
//! One JSON object per line in each direction over the kernel's stdio.
//!
//! | Direction       | Message                                                   |
//! |-----------------|-----------------------------------------------------------|
//! | host → kernel   | `{"op":"exec","id":N,"code":"..."}`                       |
//! | host → kernel   | `{"op":"snapshot","id":N}`                                |
//! | host → kernel   | `{"op":"restore","id":N,"state":{...}}`                   |
//! | kernel → host   | `{"event":"ready","kernel":"...","version":"..."}`        |
//! | kernel → host   | `{"event":"result","id":N,"ok":true,"stdout":"","stderr":""}` |
//! | kernel → host   | `{"event":"snapshot","id":N,"state":{...}}`               |
//! | kernel → host   | `{"event":"restored","id":N}`                             |
//! | kernel → host   | `{"event":"error","id":N,"message":"..."}`                |
//!
//! The kernel must emit `ready` before anything else and must answer
//! requests in the order received. Closing the kernel's stdin asks it to
//! exit.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;

/// Host-to-kernel request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum KernelRequest {
    /// Execute `code` in the kernel's global scope.
    Exec {
        /// Wire sequence number echoed in the reply.
        id: u64,
        /// Source text.
        code: String,
    },
    /// Serialize the kernel's restorable state.
    Snapshot {
        /// Wire sequence number echoed in the reply.
        id: u64,
    },
    /// Replace the kernel's state with a previous snapshot.
    Restore {
        /// Wire sequence number echoed in the reply.
        id: u64,
        /// State exactly as returned by an earlier `snapshot` reply.
        state: serde_json::Value,
    },
}

impl KernelRequest {
    /// Wire sequence number of the request.
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Exec { id, .. } | Self::Snapshot { id } | Self::Restore { id, .. } => *id,
        }
    }

    /// Compact single-line JSON encoding (without the newline).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Kernel-to-host event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KernelEvent {
    /// Readiness signal; the first line a kernel writes.
    Ready {
        /// Kernel implementation label.
        kernel: String,
        /// Interpreter version, if reported.
        #[serde(default)]
        version: Option<String>,
    },
    /// Reply to `exec`.
    Result {
        /// Sequence number of the `exec` request.
        id: u64,
        /// Whether execution succeeded.
        ok: bool,
        /// Captured standard output.
        #[serde(default)]
        stdout: String,
        /// Captured standard error.
        #[serde(default)]
        stderr: String,
    },
    /// Reply to `snapshot`.
    Snapshot {
        /// Sequence number of the `snapshot` request.
        id: u64,
        /// Opaque restorable state.
        state: serde_json::Value,
    },
    /// Reply to `restore`.
    Restored {
        /// Sequence number of the `restore` request.
        id: u64,
    },
    /// A request could not be served.
    Error {
        /// Sequence number of the failed request, when known.
        #[serde(default)]
        id: Option<u64>,
        /// Failure description.
        message: String,
    },
}

impl KernelEvent {
    /// Sequence number the event answers, if any.
    #[must_use]
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Ready { .. } => None,
            Self::Result { id, .. } | Self::Snapshot { id, .. } | Self::Restored { id } => {
                Some(*id)
            }
            Self::Error { id, .. } => *id,
        }
    }
}

/// A decoded line from a kernel's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A protocol event.
    Event(KernelEvent),
    /// Anything else the kernel printed directly to its stdout.
    Raw(String),
    /// A line over the message limit was dropped unread.
    Oversized {
        /// Limit the line exceeded, in bytes.
        limit: usize,
    },
}

/// Classify one stdout line from a kernel.
///
/// Returns `None` for blank lines. Lines that look like JSON objects but do
/// not decode as a [`KernelEvent`] are passed through as [`Inbound::Raw`] so
/// user output that happens to start with `{` is never lost.
#[must_use]
pub fn parse_inbound_line(line: &str) -> Option<Inbound> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.trim().is_empty() {
        return None;
    }

    if trimmed.trim_start().starts_with('{') {
        match serde_json::from_str::<KernelEvent>(trimmed) {
            Ok(event) => return Some(Inbound::Event(event)),
            Err(err) => debug!(%err, "kernel line is not a protocol event"),
        }
    }

    Some(Inbound::Raw(trimmed.to_owned()))
}
