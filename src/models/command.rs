//! Command request and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::output::OutputStream;

/// Result state of a submitted request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Queued or executing.
    Pending,
    /// The kernel reported success.
    Completed,
    /// The kernel reported an error, or the session went away first.
    Failed,
}

/// A unit of work sent into a session together with its outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommandResult {
    /// Monotonic per-session request id, starting at 1.
    pub id: u64,
    /// Code or text executed by the kernel.
    pub payload: String,
    /// Current result state.
    pub state: RequestState,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
    /// Completion timestamp, once finished.
    pub completed_at: Option<DateTime<Utc>>,
}

impl CommandResult {
    /// Construct a pending result for a freshly submitted payload.
    #[must_use]
    pub fn pending(id: u64, payload: String) -> Self {
        Self {
            id,
            payload,
            state: RequestState::Pending,
            stdout: String::new(),
            stderr: String::new(),
            submitted_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Record the kernel's reply. Output captured outside the reply while
    /// the request ran stays in front of the reply's own output.
    pub fn finish(&mut self, ok: bool, stdout: &str, stderr: &str) {
        self.state = if ok {
            RequestState::Completed
        } else {
            RequestState::Failed
        };
        self.stdout.push_str(stdout);
        self.stderr.push_str(stderr);
        self.completed_at = Some(Utc::now());
    }

    /// Append a line printed outside the protocol while the request ran.
    pub fn append_line(&mut self, stream: OutputStream, line: &str) {
        let target = match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        };
        target.push_str(line);
        target.push('\n');
    }

    /// Mark the request failed without a kernel reply.
    pub fn abandon(&mut self, reason: &str) {
        self.state = RequestState::Failed;
        self.stderr.push_str(reason);
        self.completed_at = Some(Utc::now());
    }

    /// Whether the request has finished either way.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state != RequestState::Pending
    }
}
