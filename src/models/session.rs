//! Session model and lifecycle helpers.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state for a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Registered but no process launched yet.
    Unstarted,
    /// Process spawned, waiting for the ready signal.
    Starting,
    /// Kernel ready and accepting requests.
    Running,
    /// Explicit stop in progress.
    Stopping,
    /// Stopped explicitly.
    Stopped,
    /// Process died without an explicit stop, or never became ready.
    Crashed,
}

impl SessionState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unstarted, Self::Starting | Self::Stopped)
                | (Self::Starting, Self::Running | Self::Crashed | Self::Stopping)
                | (Self::Running, Self::Stopping | Self::Crashed)
                | (Self::Stopping, Self::Stopped)
                | (Self::Crashed, Self::Stopped)
        )
    }

    /// Whether a process is (or is about to be) attached to the session.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// Upper-case label as printed by the CLI.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "UNSTARTED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Crashed => "CRASHED",
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted session record, one `session.json` per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionRecord {
    /// Unique session name.
    pub name: String,
    /// Last known lifecycle state.
    pub state: SessionState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last state change or flag update.
    pub updated_at: DateTime<Utc>,
    /// Kernel process id while one is attached.
    pub pid: Option<u32>,
    /// Kernel label (`builtin`, `python`, `command`).
    pub kernel: String,
    /// Kernel working directory.
    pub working_dir: Option<PathBuf>,
    /// Whether unforced sends are refused.
    #[serde(default)]
    pub paused: bool,
    /// Why the process last went away, if known.
    #[serde(default)]
    pub exit_reason: Option<String>,
}

/// Point-in-time view of a session returned by `status` and `list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionInfo {
    /// Unique session name.
    pub name: String,
    /// Current lifecycle state after liveness reconciliation.
    pub state: SessionState,
    /// Whether the kernel process is alive right now.
    pub alive: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
    /// Kernel process id.
    pub pid: Option<u32>,
    /// Kernel label.
    pub kernel: String,
    /// Kernel working directory.
    pub working_dir: Option<PathBuf>,
    /// Whether unforced sends are refused.
    pub paused: bool,
    /// Highest request id issued so far (0 when none).
    pub last_request_id: u64,
    /// Requests accepted but not yet finished.
    pub pending_requests: usize,
    /// Checkpoint names, oldest first.
    pub checkpoints: Vec<String>,
    /// Why the process last went away, if known.
    pub exit_reason: Option<String>,
}

/// Notification emitted on every lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// Session name.
    pub session: String,
    /// State before the transition.
    pub from: SessionState,
    /// State after the transition.
    pub to: SessionState,
    /// Optional reason (exit status, timeout).
    pub reason: Option<String>,
    /// Transition time.
    pub at: DateTime<Utc>,
}
