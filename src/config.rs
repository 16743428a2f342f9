//! Global configuration parsing, discovery, and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::validate_name;
use crate::{AppError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "REPLHOST_CONFIG";

/// Environment variable overriding `state_dir`.
pub const STATE_DIR_ENV: &str = "REPLHOST_STATE_DIR";

/// Default `kernel.max_message_bytes`: 1 MiB.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1_048_576;

/// Smallest accepted `kernel.max_message_bytes`.
pub const MIN_MESSAGE_BYTES: usize = 4096;

/// Which kernel implementation a session runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    /// The bundled `replhost-kernel` interpreter.
    Builtin,
    /// A Python interpreter running the embedded bootstrap.
    #[default]
    Python,
    /// An arbitrary program that speaks the kernel protocol.
    Command,
}

impl KernelKind {
    /// Lower-case label used in logs and status output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::Python => "python",
            Self::Command => "command",
        }
    }

    /// Parse a label as accepted on the command line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for unknown labels.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "builtin" => Ok(Self::Builtin),
            "python" => Ok(Self::Python),
            "command" => Ok(Self::Command),
            other => Err(AppError::Config(format!("unknown kernel kind: {other}"))),
        }
    }
}

/// How session kernels are launched.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct KernelConfig {
    /// Kernel implementation.
    #[serde(default)]
    pub kind: KernelKind,
    /// Program override; required when `kind = "command"`.
    #[serde(default)]
    pub program: Option<String>,
    /// Extra arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Virtual environment whose interpreter runs the python kernel.
    #[serde(default)]
    pub venv: Option<PathBuf>,
    /// Working directory for new kernels; the daemon's cwd when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Longest protocol line exchanged with a kernel. Bounds result events
    /// and snapshots; kernels clip output to fit.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            kind: KernelKind::default(),
            program: None,
            args: Vec::new(),
            venv: None,
            working_dir: None,
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

/// Bounded waits (seconds) applied to supervisor operations.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Maximum wait for a kernel's ready line.
    #[serde(default = "default_startup_seconds")]
    pub startup_seconds: u64,
    /// Grace period between SIGTERM and force-kill on stop.
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    /// Maximum wait for a snapshot or restore to complete.
    #[serde(default = "default_checkpoint_seconds")]
    pub checkpoint_seconds: u64,
    /// Upper bound on a client-requested `wait`.
    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_seconds: default_startup_seconds(),
            stop_grace_seconds: default_stop_grace_seconds(),
            checkpoint_seconds: default_checkpoint_seconds(),
            max_wait_seconds: default_max_wait_seconds(),
        }
    }
}

fn default_startup_seconds() -> u64 {
    10
}

fn default_stop_grace_seconds() -> u64 {
    5
}

fn default_checkpoint_seconds() -> u64 {
    30
}

fn default_max_wait_seconds() -> u64 {
    3600
}

/// Output buffer sizing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OutputConfig {
    /// Maximum buffered output lines per session before eviction.
    #[serde(default = "default_output_capacity")]
    pub capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            capacity: default_output_capacity(),
        }
    }
}

fn default_output_capacity() -> usize {
    1000
}

/// Checkpoint retention and durability.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CheckpointConfig {
    /// Also write checkpoints under the state directory.
    #[serde(default)]
    pub persist: bool,
    /// Checkpoints kept per session; the oldest are pruned beyond this.
    #[serde(default = "default_max_per_session")]
    pub max_per_session: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            persist: false,
            max_per_session: default_max_per_session(),
        }
    }
}

fn default_max_per_session() -> usize {
    32
}

fn default_ipc_name() -> String {
    "replhost".into()
}

fn default_session_name() -> String {
    "main".into()
}

fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(env::temp_dir)
        .join("replhost")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the daemon lock, session records and checkpoints.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Named pipe / Unix socket identifier.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Session used when a command names none.
    #[serde(default = "default_session_name")]
    pub default_session: String,
    /// Kernel launch settings.
    #[serde(default)]
    pub kernel: KernelConfig,
    /// Timeouts for bounded operations.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Output buffer settings.
    #[serde(default)]
    pub output: OutputConfig,
    /// Checkpoint retention settings.
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            ipc_name: default_ipc_name(),
            default_session: default_session_name(),
            kernel: KernelConfig::default(),
            timeouts: TimeoutConfig::default(),
            output: OutputConfig::default(),
            checkpoints: CheckpointConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Locate and load the configuration, falling back to defaults.
    ///
    /// Search order: `explicit`, `$REPLHOST_CONFIG`,
    /// `<config_dir>/replhost/config.toml`. `$REPLHOST_STATE_DIR` is applied
    /// last and wins over the file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a named file is unreadable or invalid.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = explicit {
            Self::load_from_path(path)?
        } else if let Ok(path) = env::var(CONFIG_ENV) {
            Self::load_from_path(path)?
        } else {
            match dirs::config_dir().map(|dir| dir.join("replhost").join("config.toml")) {
                Some(path) if path.is_file() => {
                    debug!(path = %path.display(), "using discovered config file");
                    Self::load_from_path(path)?
                }
                _ => {
                    let mut config = Self::default();
                    config.validate()?;
                    config
                }
            }
        };

        if let Ok(dir) = env::var(STATE_DIR_ENV) {
            config.state_dir = expand_home(Path::new(&dir));
        }
        Ok(config)
    }

    /// Startup window for a kernel's ready signal.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.startup_seconds)
    }

    /// Grace period between SIGTERM and force-kill.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.timeouts.stop_grace_seconds)
    }

    /// Maximum wait for snapshot or restore replies.
    #[must_use]
    pub fn checkpoint_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.checkpoint_seconds)
    }

    /// Longest wait a single `wait` call may block for.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.timeouts.max_wait_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }

        if self.output.capacity == 0 {
            return Err(AppError::Config(
                "output.capacity must be greater than zero".into(),
            ));
        }

        if self.checkpoints.max_per_session == 0 {
            return Err(AppError::Config(
                "checkpoints.max_per_session must be greater than zero".into(),
            ));
        }

        if self.timeouts.startup_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.startup_seconds must be greater than zero".into(),
            ));
        }

        if self.timeouts.max_wait_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.max_wait_seconds must be greater than zero".into(),
            ));
        }

        if self.kernel.max_message_bytes < MIN_MESSAGE_BYTES {
            return Err(AppError::Config(format!(
                "kernel.max_message_bytes must be at least {MIN_MESSAGE_BYTES}"
            )));
        }

        if self.kernel.kind == KernelKind::Command && self.kernel.program.is_none() {
            return Err(AppError::Config(
                "kernel.program is required when kernel.kind = \"command\"".into(),
            ));
        }

        validate_name(&self.default_session)
            .map_err(|err| AppError::Config(format!("default_session: {err}")))?;

        self.state_dir = expand_home(&self.state_dir);
        if let Some(ref venv) = self.kernel.venv {
            self.kernel.venv = Some(expand_home(venv));
        }
        if let Some(ref dir) = self.kernel.working_dir {
            self.kernel.working_dir = Some(expand_home(dir));
        }

        Ok(())
    }
}

/// Expand a leading `~/` against the user's home directory.
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
