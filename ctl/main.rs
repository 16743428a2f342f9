#![forbid(unsafe_code)]

//! `replhost-ctl`: command-line client for the `replhost` daemon.
//!
//! Connects to the daemon's IPC socket (launching the daemon on `start` when
//! none is running) and prints results as JSON.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use replhost::config::{expand_home, GlobalConfig, KernelKind};
use replhost::ipc::{IpcClient, IpcCommand};
use replhost::models::command::{CommandResult, RequestState};
use replhost::models::output::{OutputEntry, OutputRead, OutputStream};
use replhost::orchestrator::StartOptions;
use replhost::persistence::StateDir;
use replhost::{AppError, Result};

/// How long `start` waits for an auto-launched daemon to answer.
const DAEMON_LAUNCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval for daemon launch and `read --follow`.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Lines of recent output printed by `status`.
const STATUS_TAIL_LINES: usize = 10;

#[derive(Debug, Parser)]
#[command(
    name = "replhost-ctl",
    about = "Control persistent interpreter sessions",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the state directory.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// IPC socket name; read from the daemon's state file when omitted.
    #[arg(long, global = true)]
    ipc_name: Option<String>,

    /// Session to operate on; `default_session` from the config when omitted.
    #[arg(long, global = true)]
    session: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a session, launching the daemon if needed.
    Start {
        /// Session name.
        name: Option<String>,
        /// Kernel implementation: builtin, python or command.
        #[arg(long)]
        kernel: Option<String>,
        /// Virtual environment for the python kernel.
        #[arg(long)]
        venv: Option<PathBuf>,
        /// Working directory of the kernel.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Reload checkpoints persisted by a previous run of the session.
        #[arg(long)]
        load_checkpoints: bool,
    },

    /// Stop a session.
    Stop {
        /// Session name.
        name: Option<String>,
    },

    /// Show a session's state and liveness.
    Status {
        /// Session name.
        name: Option<String>,
    },

    /// List every session.
    List,

    /// Submit code to the session.
    Send {
        /// Code to execute.
        code: String,
        /// Send even if the session is paused.
        #[arg(long)]
        force: bool,
        /// Wait up to SECS for the request to finish and print its output.
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,
    },

    /// Print captured output.
    Read {
        /// Only output of requests after this id.
        #[arg(long)]
        since: Option<u64>,
        /// Clear the buffer after reading.
        #[arg(long, conflicts_with = "follow")]
        drain: bool,
        /// Keep printing new output until interrupted.
        #[arg(long)]
        follow: bool,
        /// Only the last N lines.
        #[arg(long, short = 'n', value_name = "N")]
        lines: Option<usize>,
    },

    /// Capture the session state under a name.
    Checkpoint {
        /// Checkpoint name.
        name: String,
    },

    /// Restore a checkpoint, discarding later state.
    Rollback {
        /// Checkpoint name.
        name: String,
    },

    /// List the session's checkpoints.
    Checkpoints,

    /// Delete a checkpoint.
    DeleteCheckpoint {
        /// Checkpoint name.
        name: String,
    },

    /// Refuse sends until resumed.
    Pause,

    /// Accept sends again.
    Resume,

    /// Forget a stopped or crashed session.
    Remove {
        /// Session name.
        name: Option<String>,
    },

    /// Print how to watch a session live.
    Attach,

    /// Stop every session and the daemon.
    Shutdown,
}

fn main() {
    let args = Cli::parse();
    match run(&args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {err}");
            if matches!(err, AppError::Ipc(_)) {
                eprintln!("Is the replhost daemon running? `replhost-ctl start` launches it.");
            }
            std::process::exit(err.kind().exit_code());
        }
    }
}

/// Resolved client-side context.
struct Context {
    config: GlobalConfig,
    state_dir: StateDir,
}

impl Context {
    fn load(args: &Cli) -> Result<Self> {
        let mut config = GlobalConfig::discover(args.config.as_deref())?;
        if let Some(ref dir) = args.state_dir {
            config.state_dir = expand_home(dir);
        }
        let state_dir = StateDir::open(&config.state_dir)?;
        Ok(Self { config, state_dir })
    }

    fn session(&self, args: &Cli, positional: Option<&String>) -> String {
        positional
            .or(args.session.as_ref())
            .cloned()
            .unwrap_or_else(|| self.config.default_session.clone())
    }

    /// Client for the running daemon, per `daemon.json`.
    fn client(&self, args: &Cli) -> Result<IpcClient> {
        let info = self.state_dir.read_daemon_info()?;
        let ipc_name = args
            .ipc_name
            .clone()
            .or_else(|| info.as_ref().map(|i| i.ipc_name.clone()))
            .unwrap_or_else(|| self.config.ipc_name.clone());
        Ok(IpcClient::new(ipc_name, info.map(|i| i.auth_token)))
    }

    /// Client for the running daemon, launching one if none answers.
    fn client_or_launch(&self, args: &Cli) -> Result<IpcClient> {
        let client = self.client(args)?;
        if client.ping() {
            return Ok(client);
        }

        launch_daemon(args, &self.state_dir)?;
        let deadline = Instant::now() + DAEMON_LAUNCH_TIMEOUT;
        while Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
            let client = self.client(args)?;
            if client.ping() {
                return Ok(client);
            }
        }
        Err(AppError::Ipc(format!(
            "daemon did not come up within {DAEMON_LAUNCH_TIMEOUT:?}; see {}",
            self.state_dir.log_path().display()
        )))
    }
}

fn run(args: &Cli) -> Result<i32> {
    let ctx = Context::load(args)?;

    match &args.command {
        Command::Start {
            name,
            kernel,
            venv,
            cwd,
            load_checkpoints,
        } => {
            let session = ctx.session(args, name.as_ref());
            let options = StartOptions {
                kernel: kernel.as_deref().map(KernelKind::parse).transpose()?,
                venv: venv.as_deref().map(absolute).transpose()?,
                working_dir: cwd.as_deref().map(absolute).transpose()?,
                load_checkpoints: *load_checkpoints,
            };
            let client = ctx.client_or_launch(args)?;
            print_json(&client.call(IpcCommand::Start { session, options })?);
        }
        Command::Stop { name } => {
            let session = ctx.session(args, name.as_ref());
            print_json(&ctx.client(args)?.call(IpcCommand::Stop { session })?);
        }
        Command::Status { name } => {
            let session = ctx.session(args, name.as_ref());
            let client = ctx.client(args)?;
            print_json(&client.call(IpcCommand::Status {
                session: session.clone(),
            })?);
            let read: OutputRead = client.call_as(IpcCommand::Read {
                session,
                since: None,
                drain: false,
            })?;
            let recent = read.tail(STATUS_TAIL_LINES);
            if !recent.is_empty() {
                eprintln!("--- recent output ---");
                print_entries(recent);
            }
        }
        Command::List => print_json(&ctx.client(args)?.call(IpcCommand::List)?),
        Command::Send { code, force, wait } => {
            let session = ctx.session(args, None);
            return send(&ctx.client(args)?, session, code.clone(), *force, *wait);
        }
        Command::Read {
            since,
            drain,
            follow,
            lines,
        } => {
            let session = ctx.session(args, None);
            let client = ctx.client(args)?;
            if *follow {
                follow_output(&client, &session, *since, *lines)?;
            } else {
                let read: OutputRead = client.call_as(IpcCommand::Read {
                    session,
                    since: *since,
                    drain: *drain,
                })?;
                if let Some(marker) = read.marker() {
                    eprintln!("{marker}");
                }
                match lines {
                    Some(lines) => print_entries(read.tail(*lines)),
                    None => print_entries(&read.entries),
                }
            }
        }
        Command::Checkpoint { name } => {
            let session = ctx.session(args, None);
            print_json(&ctx.client(args)?.call(IpcCommand::Checkpoint {
                session,
                checkpoint: name.clone(),
            })?);
        }
        Command::Rollback { name } => {
            let session = ctx.session(args, None);
            let outcome = ctx.client(args)?.call(IpcCommand::Rollback {
                session,
                checkpoint: name.clone(),
            })?;
            if let Some(warning) = outcome.get("warning").and_then(serde_json::Value::as_str) {
                eprintln!("Warning: {warning}");
            }
            print_json(&outcome);
        }
        Command::Checkpoints => {
            let session = ctx.session(args, None);
            print_json(&ctx.client(args)?.call(IpcCommand::Checkpoints { session })?);
        }
        Command::DeleteCheckpoint { name } => {
            let session = ctx.session(args, None);
            print_json(&ctx.client(args)?.call(IpcCommand::DeleteCheckpoint {
                session,
                checkpoint: name.clone(),
            })?);
        }
        Command::Pause => {
            let session = ctx.session(args, None);
            print_json(&ctx.client(args)?.call(IpcCommand::Pause { session })?);
        }
        Command::Resume => {
            let session = ctx.session(args, None);
            print_json(&ctx.client(args)?.call(IpcCommand::Resume { session })?);
        }
        Command::Remove { name } => {
            let session = ctx.session(args, name.as_ref());
            print_json(&ctx.client(args)?.call(IpcCommand::Remove { session })?);
        }
        Command::Attach => print_attach_instructions(&ctx.session(args, None)),
        Command::Shutdown => print_json(&ctx.client(args)?.call(IpcCommand::Shutdown)?),
    }
    Ok(0)
}

fn send(client: &IpcClient, session: String, code: String, force: bool, wait: Option<u64>) -> Result<i32> {
    let data = client.call(IpcCommand::Send {
        session: session.clone(),
        code,
        force,
    })?;
    let request_id = data
        .get("request_id")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| AppError::Ipc("send response carried no request id".into()))?;

    let Some(seconds) = wait else {
        println!("{request_id}");
        return Ok(0);
    };

    let result: CommandResult = client.call_as(IpcCommand::Wait {
        session,
        request_id,
        timeout_ms: seconds.saturating_mul(1000),
    })?;
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    match result.state {
        RequestState::Completed => Ok(0),
        RequestState::Failed => Ok(1),
        RequestState::Pending => {
            eprintln!("request {request_id} still running after {seconds}s");
            Ok(0)
        }
    }
}

fn follow_output(client: &IpcClient, session: &str, since: Option<u64>, lines: Option<usize>) -> Result<()> {
    let mut last_seq: Option<u64> = None;
    loop {
        let read: OutputRead = client.call_as(IpcCommand::Read {
            session: session.to_owned(),
            since,
            drain: false,
        })?;
        if last_seq.is_none() {
            if let Some(marker) = read.marker() {
                eprintln!("{marker}");
            }
            match lines {
                Some(lines) => print_entries(read.tail(lines)),
                None => print_entries(&read.entries),
            }
        } else {
            print_entries(read.after_seq(last_seq));
        }
        last_seq = read.last_seq().or(last_seq).or(Some(0));
        thread::sleep(POLL_INTERVAL);
    }
}

fn print_entries(entries: &[OutputEntry]) {
    for entry in entries {
        match entry.stream {
            OutputStream::Stdout => println!("{}", entry.text),
            OutputStream::Stderr => eprintln!("{}", entry.text),
        }
    }
}

fn print_attach_instructions(session: &str) {
    println!("Session '{session}' runs inside the replhost daemon; its output is buffered there.");
    println!();
    println!("Follow it live:");
    println!("  replhost-ctl --session {session} read --follow");
    println!();
    println!("Or keep it open in a terminal multiplexer pane:");
    println!("  tmux new-window -n {session} 'replhost-ctl --session {session} read --follow'");
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn absolute(path: &Path) -> Result<PathBuf> {
    let path = expand_home(path);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Spawn the sibling `replhost` binary detached, logging to `daemon.log`.
fn launch_daemon(args: &Cli, state_dir: &StateDir) -> Result<()> {
    let exe = std::env::current_exe()?;
    let daemon = exe.with_file_name(format!("replhost{}", std::env::consts::EXE_SUFFIX));
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(state_dir.log_path())?;

    let mut command = ProcessCommand::new(&daemon);
    command.arg("--state-dir").arg(state_dir.root());
    if let Some(ref config) = args.config {
        command.arg("--config").arg(config);
    }
    if let Some(ref name) = args.ipc_name {
        command.arg("--ipc-name").arg(name);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(log));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group, so a Ctrl-C aimed at the ctl leaves the daemon alone.
        command.process_group(0);
    }

    let child = command
        .spawn()
        .map_err(|err| AppError::Io(format!("failed to launch {}: {err}", daemon.display())))?;
    eprintln!("Launched replhost daemon (pid {})", child.id());
    Ok(())
}
