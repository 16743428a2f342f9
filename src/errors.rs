//! Error types shared across the application.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// A session with this name is already starting, running or stopping.
    AlreadyRunning(String),
    /// No session with this name is registered.
    SessionNotFound(String),
    /// The session exists but is not in the `Running` state.
    SessionNotRunning(String),
    /// The kernel did not signal readiness within the startup window.
    StartupTimeout(String),
    /// A checkpoint with this name already exists for the session.
    DuplicateCheckpoint(String),
    /// The requested checkpoint does not exist for the session.
    CheckpointNotFound(String),
    /// The kernel process exited without an explicit stop.
    ProcessCrashed(String),
    /// The session is paused and the send was not forced.
    SessionPaused(String),
    /// A session or checkpoint name failed validation.
    InvalidName(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// IPC communication failure.
    Ipc(String),
    /// Kernel protocol failure (framing, malformed reply, timeout).
    Kernel(String),
}

/// Stable, serializable classification of an [`AppError`].
///
/// Crosses the IPC boundary so the CLI can map failures to exit codes
/// without parsing message text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`AppError::AlreadyRunning`].
    AlreadyRunning,
    /// See [`AppError::SessionNotFound`].
    SessionNotFound,
    /// See [`AppError::SessionNotRunning`].
    SessionNotRunning,
    /// See [`AppError::StartupTimeout`].
    StartupTimeout,
    /// See [`AppError::DuplicateCheckpoint`].
    DuplicateCheckpoint,
    /// See [`AppError::CheckpointNotFound`].
    CheckpointNotFound,
    /// See [`AppError::ProcessCrashed`].
    ProcessCrashed,
    /// See [`AppError::SessionPaused`].
    SessionPaused,
    /// See [`AppError::InvalidName`].
    InvalidName,
    /// See [`AppError::Config`].
    Config,
    /// See [`AppError::Io`].
    Io,
    /// See [`AppError::Ipc`].
    Ipc,
    /// See [`AppError::Kernel`].
    Kernel,
}

impl ErrorKind {
    /// Process exit code reported by `replhost-ctl` for this kind.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::AlreadyRunning => 10,
            Self::SessionNotFound => 11,
            Self::SessionNotRunning => 12,
            Self::StartupTimeout => 13,
            Self::DuplicateCheckpoint => 14,
            Self::CheckpointNotFound => 15,
            Self::ProcessCrashed => 16,
            Self::SessionPaused => 17,
            Self::InvalidName => 18,
            Self::Config => 20,
            Self::Io => 21,
            Self::Ipc => 22,
            Self::Kernel => 23,
        }
    }

    /// Rebuild an [`AppError`] of this kind carrying `message`.
    #[must_use]
    pub fn into_error(self, message: String) -> AppError {
        match self {
            Self::AlreadyRunning => AppError::AlreadyRunning(message),
            Self::SessionNotFound => AppError::SessionNotFound(message),
            Self::SessionNotRunning => AppError::SessionNotRunning(message),
            Self::StartupTimeout => AppError::StartupTimeout(message),
            Self::DuplicateCheckpoint => AppError::DuplicateCheckpoint(message),
            Self::CheckpointNotFound => AppError::CheckpointNotFound(message),
            Self::ProcessCrashed => AppError::ProcessCrashed(message),
            Self::SessionPaused => AppError::SessionPaused(message),
            Self::InvalidName => AppError::InvalidName(message),
            Self::Config => AppError::Config(message),
            Self::Io => AppError::Io(message),
            Self::Ipc => AppError::Ipc(message),
            Self::Kernel => AppError::Kernel(message),
        }
    }
}

impl AppError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::SessionNotRunning(_) => ErrorKind::SessionNotRunning,
            Self::StartupTimeout(_) => ErrorKind::StartupTimeout,
            Self::DuplicateCheckpoint(_) => ErrorKind::DuplicateCheckpoint,
            Self::CheckpointNotFound(_) => ErrorKind::CheckpointNotFound,
            Self::ProcessCrashed(_) => ErrorKind::ProcessCrashed,
            Self::SessionPaused(_) => ErrorKind::SessionPaused,
            Self::InvalidName(_) => ErrorKind::InvalidName,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Ipc(_) => ErrorKind::Ipc,
            Self::Kernel(_) => ErrorKind::Kernel,
        }
    }

    /// The bare message without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::AlreadyRunning(msg)
            | Self::SessionNotFound(msg)
            | Self::SessionNotRunning(msg)
            | Self::StartupTimeout(msg)
            | Self::DuplicateCheckpoint(msg)
            | Self::CheckpointNotFound(msg)
            | Self::ProcessCrashed(msg)
            | Self::SessionPaused(msg)
            | Self::InvalidName(msg)
            | Self::Config(msg)
            | Self::Io(msg)
            | Self::Ipc(msg)
            | Self::Kernel(msg) => msg,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning(msg) => write!(f, "already running: {msg}"),
            Self::SessionNotFound(msg) => write!(f, "session not found: {msg}"),
            Self::SessionNotRunning(msg) => write!(f, "session not running: {msg}"),
            Self::StartupTimeout(msg) => write!(f, "startup timeout: {msg}"),
            Self::DuplicateCheckpoint(msg) => write!(f, "duplicate checkpoint: {msg}"),
            Self::CheckpointNotFound(msg) => write!(f, "checkpoint not found: {msg}"),
            Self::ProcessCrashed(msg) => write!(f, "process crashed: {msg}"),
            Self::SessionPaused(msg) => write!(f, "session paused: {msg}"),
            Self::InvalidName(msg) => write!(f, "invalid name: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Kernel(msg) => write!(f, "kernel: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
