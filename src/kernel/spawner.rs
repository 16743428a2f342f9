//! Kernel process spawner.
//!
//! Resolves the program for a session's kernel, launches it with piped
//! stdio and `kill_on_drop(true)`, and waits a bounded time for the
//! kernel's `ready` line. A kernel that stays silent past the window is
//! killed and `AppError::StartupTimeout` is returned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::config::{KernelConfig, KernelKind};
use crate::kernel::codec::{KernelCodec, KernelFrame};
use crate::kernel::protocol::{parse_inbound_line, Inbound, KernelEvent};
use crate::kernel::python::PYTHON_BOOTSTRAP;
use crate::{AppError, Result};

/// File name of the bundled interpreter binary.
pub const BUILTIN_KERNEL_BIN: &str = "replhost-kernel";

/// Environment variable carrying the session name into the kernel.
pub const SESSION_ENV: &str = "REPLHOST_SESSION";

/// Environment variable telling the kernel its protocol line limit.
pub const MESSAGE_LIMIT_ENV: &str = "REPLHOST_MAX_MESSAGE_BYTES";

/// How long to wait for an exit status after a kernel closes stdout early.
const EXIT_REAP_WINDOW: Duration = Duration::from_millis(250);

/// Fully resolved command line for one kernel process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelLaunch {
    /// Kernel implementation.
    pub kind: KernelKind,
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory of the process.
    pub working_dir: PathBuf,
    /// Virtual environment activated for the process.
    pub venv: Option<PathBuf>,
    /// Protocol line limit in bytes, both directions.
    pub max_message_bytes: usize,
}

impl KernelLaunch {
    /// Resolve a launch from configuration plus per-start overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a virtual environment or working
    /// directory does not exist, or if a `command` kernel has no program.
    pub fn resolve(
        config: &KernelConfig,
        kind: Option<KernelKind>,
        venv: Option<&Path>,
        working_dir: Option<&Path>,
    ) -> Result<Self> {
        let kind = kind.unwrap_or(config.kind);

        let working_dir = match working_dir.or(config.working_dir.as_deref()) {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()
                .map_err(|err| AppError::Config(format!("cannot resolve working dir: {err}")))?,
        };
        if !working_dir.is_dir() {
            return Err(AppError::Config(format!(
                "working directory not found: {}",
                working_dir.display()
            )));
        }

        let venv = venv.or(config.venv.as_deref()).map(Path::to_path_buf);

        let (program, args) = match kind {
            KernelKind::Builtin => {
                let program = match config.program {
                    Some(ref program) => PathBuf::from(program),
                    None => builtin_kernel_path()?,
                };
                (program, config.args.clone())
            }
            KernelKind::Python => {
                let program = match (&config.program, &venv) {
                    (Some(program), _) => PathBuf::from(program),
                    (None, Some(venv)) => venv_python(venv)?,
                    (None, None) => PathBuf::from("python3"),
                };
                let mut args = vec!["-u".to_owned(), "-c".to_owned(), PYTHON_BOOTSTRAP.to_owned()];
                args.extend(config.args.iter().cloned());
                (program, args)
            }
            KernelKind::Command => {
                let program = config.program.as_ref().ok_or_else(|| {
                    AppError::Config("kernel.program is required for command kernels".into())
                })?;
                (PathBuf::from(program), config.args.clone())
            }
        };

        Ok(Self {
            kind,
            program,
            args,
            working_dir,
            venv,
            max_message_bytes: config.max_message_bytes,
        })
    }
}

/// Locate the bundled kernel next to the running executable.
fn builtin_kernel_path() -> Result<PathBuf> {
    let exe = std::env::current_exe()
        .map_err(|err| AppError::Config(format!("cannot locate current executable: {err}")))?;
    let file_name = format!("{BUILTIN_KERNEL_BIN}{}", std::env::consts::EXE_SUFFIX);
    Ok(exe.with_file_name(file_name))
}

/// Interpreter inside a virtual environment.
fn venv_python(venv: &Path) -> Result<PathBuf> {
    if !venv.is_dir() {
        return Err(AppError::Config(format!(
            "virtual environment not found: {}",
            venv.display()
        )));
    }

    let python = if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    };
    if !python.exists() {
        return Err(AppError::Config(format!(
            "python not found in virtual environment: {}",
            python.display()
        )));
    }
    Ok(python)
}

/// Live stdio connection to a spawned kernel.
///
/// The caller keeps `child` alive (it has `kill_on_drop(true)`), writes
/// requests to `stdin` and drains `stdout` / `stderr`.
#[derive(Debug)]
pub struct KernelConnection {
    /// Child process handle.
    pub child: Child,
    /// OS process id.
    pub pid: Option<u32>,
    /// Kernel stdin for requests.
    pub stdin: ChildStdin,
    /// Framed kernel stdout, positioned after the ready line.
    pub stdout: FramedRead<ChildStdout, KernelCodec>,
    /// Kernel stderr.
    pub stderr: ChildStderr,
    /// Lines printed before the ready signal.
    pub preamble: Vec<String>,
    /// Kernel label and version from the ready signal.
    pub banner: String,
}

/// Spawn a kernel and wait for its ready signal.
///
/// # Errors
///
/// - `AppError::Kernel`: the OS refused to spawn the program.
/// - `AppError::StartupTimeout`: no ready signal within `startup_timeout`.
/// - `AppError::ProcessCrashed`: the process exited before signalling.
pub async fn spawn_kernel(
    launch: &KernelLaunch,
    session: &str,
    startup_timeout: Duration,
) -> Result<KernelConnection> {
    let mut cmd = Command::new(&launch.program);
    cmd.args(&launch.args)
        .env(SESSION_ENV, session)
        .env(MESSAGE_LIMIT_ENV, launch.max_message_bytes.to_string())
        .current_dir(&launch.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(ref venv) = launch.venv {
        cmd.env("VIRTUAL_ENV", venv);
        let bin = if cfg!(windows) {
            venv.join("Scripts")
        } else {
            venv.join("bin")
        };
        let mut paths = vec![bin];
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        if let Ok(joined) = std::env::join_paths(paths) {
            cmd.env("PATH", joined);
        }
    }

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Kernel(format!(
            "failed to spawn kernel '{}': {err}",
            launch.program.display()
        ))
    })?;
    let pid = child.id();

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Kernel("failed to capture kernel stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Kernel("failed to capture kernel stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Kernel("failed to capture kernel stderr".into()))?;

    let mut framed = FramedRead::new(stdout, KernelCodec::with_max_length(launch.max_message_bytes));
    let mut preamble = Vec::new();

    let waited = tokio::time::timeout(startup_timeout, async {
        loop {
            match framed.next().await {
                Some(Ok(KernelFrame::Oversized { limit })) => {
                    warn!(session, limit, "over-long kernel line before ready signal dropped");
                }
                Some(Ok(KernelFrame::Line(line))) => match parse_inbound_line(&line) {
                    Some(Inbound::Event(KernelEvent::Ready { kernel, version })) => {
                        let banner = version.map_or_else(|| kernel.clone(), |v| format!("{kernel} {v}"));
                        return Ok(banner);
                    }
                    Some(Inbound::Event(other)) => {
                        warn!(session, ?other, "kernel event before ready signal ignored");
                    }
                    Some(Inbound::Raw(raw)) => {
                        debug!(session, line = %raw, "kernel preamble line");
                        preamble.push(raw);
                    }
                    Some(Inbound::Oversized { .. }) | None => {}
                },
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(AppError::ProcessCrashed(
                        "kernel exited before ready signal".into(),
                    ))
                }
            }
        }
    })
    .await;

    match waited {
        Ok(Ok(banner)) => {
            info!(session, pid = pid.unwrap_or(0), kernel = %banner, "kernel ready");
            Ok(KernelConnection {
                child,
                pid,
                stdin,
                stdout: framed,
                stderr,
                preamble,
                banner,
            })
        }
        Ok(Err(err)) => {
            let status = tokio::time::timeout(EXIT_REAP_WINDOW, child.wait())
                .await
                .ok()
                .and_then(std::result::Result::ok);
            child.kill().await.ok();
            match (err, status) {
                (AppError::ProcessCrashed(msg), Some(status)) => {
                    Err(AppError::ProcessCrashed(format!("{msg} ({status})")))
                }
                (err, _) => Err(err),
            }
        }
        Err(_elapsed) => {
            child.kill().await.ok();
            Err(AppError::StartupTimeout(format!(
                "kernel did not emit ready signal within {startup_timeout:?}"
            )))
        }
    }
}
