//! Session lifecycle management: start, stop, status, pause, resume,
//! remove, and reconciliation of sessions left behind by a previous daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::KernelKind;
use crate::kernel::reader::{run_reader, run_stderr_reader};
use crate::kernel::signal;
use crate::kernel::spawner::{spawn_kernel, KernelConnection, KernelLaunch};
use crate::kernel::writer::KernelWriter;
use crate::models::output::OutputStream;
use crate::models::session::{SessionInfo, SessionState};
use crate::models::validate_name;
use crate::orchestrator::handle::{KernelLink, SessionHandle};
use crate::orchestrator::worker::{run_session_worker, WorkerParts};
use crate::orchestrator::SessionManager;
use crate::persistence::state_dir::is_stale;
use crate::{AppError, Result};

/// Buffered lines between a reader task and the session worker.
const READER_CHANNEL_CAPACITY: usize = 256;

/// Slack on top of the stop grace period before giving up on the worker.
const WORKER_JOIN_MARGIN: Duration = Duration::from_secs(2);

/// Per-start overrides of the configured kernel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StartOptions {
    /// Kernel implementation; the configured one when unset.
    pub kernel: Option<KernelKind>,
    /// Virtual environment for the python kernel.
    pub venv: Option<PathBuf>,
    /// Working directory of the kernel process.
    pub working_dir: Option<PathBuf>,
    /// Reload checkpoints persisted by a previous instance of the session.
    pub load_checkpoints: bool,
}

impl SessionManager {
    /// Start a session's kernel and wait for it to become ready.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidName` for a malformed name.
    /// - `AppError::AlreadyRunning` if the session is starting, running or
    ///   stopping.
    /// - `AppError::Config` if the kernel launch cannot be resolved.
    /// - `AppError::StartupTimeout` / `AppError::ProcessCrashed` /
    ///   `AppError::Kernel` if the kernel never became ready; the session is
    ///   then `CRASHED`.
    pub async fn start(&self, name: &str, options: StartOptions) -> Result<SessionInfo> {
        let span = info_span!("start_session", session = name);
        async move {
            validate_name(name)?;
            if let Ok(existing) = self.registry().lookup(name).await {
                let state = existing.state().await;
                if state.is_live() {
                    return Err(AppError::AlreadyRunning(format!(
                        "session '{name}' is {state}"
                    )));
                }
            }

            let launch = KernelLaunch::resolve(
                &self.config().kernel,
                options.kernel,
                options.venv.as_deref(),
                options.working_dir.as_deref(),
            )?;

            let (handle, op) = self
                .registry()
                .register_starting(name, launch.kind.as_str(), Some(launch.working_dir.clone()))
                .await?;

            info!(program = %launch.program.display(), kernel = launch.kind.as_str(), "starting kernel");

            let connection = match spawn_kernel(&launch, name, self.config().startup_timeout()).await {
                Ok(connection) => connection,
                Err(err) => {
                    warn!(%err, "kernel failed to start");
                    let mut inner = handle.lock().await;
                    handle.transition(&mut inner, SessionState::Crashed, Some(err.to_string()));
                    return Err(err);
                }
            };

            self.attach(&handle, connection, options.load_checkpoints).await;
            drop(op);
            Ok(handle.info().await)
        }
        .instrument(span)
        .await
    }

    /// Wire a ready kernel to a new worker and mark the session running.
    async fn attach(&self, handle: &Arc<SessionHandle>, connection: KernelConnection, load_checkpoints: bool) {
        let KernelConnection {
            child,
            pid,
            stdin,
            stdout,
            stderr,
            preamble,
            banner,
        } = connection;
        let name = handle.name().to_owned();

        let restored = if load_checkpoints {
            self.load_persisted_checkpoints(&name)
        } else {
            Vec::new()
        };

        let cancel = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(READER_CHANNEL_CAPACITY);
        let (stderr_tx, stderr_rx) = mpsc::channel(READER_CHANNEL_CAPACITY);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_reader(name.clone(), stdout, inbound_tx, cancel.child_token()));
        tokio::spawn(run_stderr_reader(
            name.clone(),
            stderr,
            self.config().kernel.max_message_bytes,
            stderr_tx,
            cancel.child_token(),
        ));

        // The worker blocks on the session lock until the session is running.
        let mut inner = handle.lock().await;
        for line in &preamble {
            inner.output.push_text(0, OutputStream::Stdout, line);
        }
        let loaded = restored.len();
        for checkpoint in restored {
            for pruned in inner.checkpoints.load(checkpoint) {
                info!(session = %name, checkpoint = %pruned.name, "persisted checkpoint beyond retention skipped");
            }
        }

        let worker = tokio::spawn(run_session_worker(WorkerParts {
            handle: Arc::clone(handle),
            child,
            writer: KernelWriter::new(name.clone(), stdin),
            inbound: inbound_rx,
            stderr: stderr_rx,
            jobs: jobs_rx,
            cancel: cancel.clone(),
            stop_grace: self.config().stop_grace(),
        }));

        inner.record.pid = pid;
        inner.link = Some(KernelLink {
            jobs: jobs_tx,
            cancel,
            worker: Some(worker),
        });
        handle.transition(&mut inner, SessionState::Running, None);
        drop(inner);

        info!(session = %name, pid = pid.unwrap_or(0), kernel = %banner, checkpoints = loaded, "session running");
    }

    fn load_persisted_checkpoints(&self, name: &str) -> Vec<crate::models::checkpoint::Checkpoint> {
        let Some(dir) = self.state_dir() else {
            warn!(session = name, "no state directory; nothing to reload");
            return Vec::new();
        };
        match dir.load_checkpoints(name) {
            Ok(checkpoints) => checkpoints
                .into_iter()
                .filter(|checkpoint| match checkpoint.verify() {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(session = name, checkpoint = %checkpoint.name, %err, "discarding corrupt checkpoint");
                        false
                    }
                })
                .collect(),
            Err(err) => {
                warn!(session = name, %err, "failed to load persisted checkpoints");
                Vec::new()
            }
        }
    }

    /// Stop a session: close the kernel's stdin, send SIGTERM, wait out the
    /// grace period, then force-kill. Queued requests are failed.
    ///
    /// Stopping an already stopped session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if the name is unknown.
    pub async fn stop(&self, name: &str) -> Result<SessionInfo> {
        let span = info_span!("stop_session", session = name);
        async move {
            let handle = self.registry().lookup(name).await?;
            let _op = handle.begin_op().await;

            let link = {
                let mut inner = handle.lock().await;
                match inner.record.state {
                    SessionState::Stopped => {
                        drop(inner);
                        info!("session already stopped");
                        return Ok(handle.info().await);
                    }
                    SessionState::Unstarted | SessionState::Crashed => None,
                    SessionState::Starting | SessionState::Running | SessionState::Stopping => {
                        handle.transition(&mut inner, SessionState::Stopping, None);
                        inner.link.take()
                    }
                }
            };

            if let Some(link) = link {
                link.cancel.cancel();
                if let Some(worker) = link.worker {
                    let limit = self.config().stop_grace() + WORKER_JOIN_MARGIN;
                    match tokio::time::timeout(limit, worker).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => warn!(%err, "session worker failed"),
                        Err(_) => warn!("session worker did not finish in time"),
                    }
                }
            }

            let mut inner = handle.lock().await;
            let abandoned = inner.abandon_pending("session stopped\n");
            let reason = inner
                .record
                .exit_reason
                .clone()
                .filter(|_| inner.record.state == SessionState::Crashed)
                .unwrap_or_else(|| "stopped".to_owned());
            handle.transition(&mut inner, SessionState::Stopped, Some(reason));
            drop(inner);
            handle.notify_all();

            info!(abandoned, "session stopped");
            Ok(handle.info().await)
        }
        .instrument(span)
        .await
    }

    /// Session state plus liveness. A running session whose process died
    /// is reported (and recorded) as `CRASHED`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if the name is unknown.
    pub async fn status(&self, name: &str) -> Result<SessionInfo> {
        let handle = self.registry().lookup(name).await?;
        Ok(handle.info().await)
    }

    /// Status of every session, oldest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut sessions = Vec::new();
        for handle in self.registry().list().await {
            sessions.push(handle.info().await);
        }
        sessions
    }

    /// Refuse unforced sends until [`SessionManager::resume`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` or `AppError::SessionNotRunning`.
    pub async fn pause(&self, name: &str) -> Result<SessionInfo> {
        self.set_paused(name, true).await
    }

    /// Accept sends again after [`SessionManager::pause`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` or `AppError::SessionNotRunning`.
    pub async fn resume(&self, name: &str) -> Result<SessionInfo> {
        self.set_paused(name, false).await
    }

    async fn set_paused(&self, name: &str, paused: bool) -> Result<SessionInfo> {
        let span = info_span!("set_paused", session = name, paused);
        async move {
            let handle = self.registry().lookup(name).await?;
            let _op = handle.begin_op().await;
            {
                let mut inner = handle.lock().await;
                handle.reconcile_liveness(&mut inner);
                if inner.record.state != SessionState::Running {
                    return Err(AppError::SessionNotRunning(format!(
                        "session '{name}' is {}",
                        inner.record.state
                    )));
                }
                if inner.record.paused != paused {
                    inner.record.paused = paused;
                    handle.touch(&mut inner);
                }
            }
            if paused {
                info!("session paused");
            } else {
                info!("session resumed");
            }
            Ok(handle.info().await)
        }
        .instrument(span)
        .await
    }

    /// Unregister a session that is not live and delete its persisted
    /// record and checkpoints.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionNotFound` if the name is unknown.
    /// - `AppError::AlreadyRunning` if the session is still live.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let span = info_span!("remove_session", session = name);
        async move {
            let handle = self.registry().lookup(name).await?;
            let _op = handle.begin_op().await;
            let state = handle.state().await;
            if state.is_live() {
                return Err(AppError::AlreadyRunning(format!(
                    "session '{name}' is {state}; stop it first"
                )));
            }

            self.registry().unregister(name).await?;
            if let Some(dir) = self.state_dir() {
                dir.remove_session(name)?;
            }
            info!("session removed");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Stop every live session. Used on daemon shutdown.
    pub async fn stop_all(&self) {
        for handle in self.registry().list().await {
            if !handle.state().await.is_live() {
                continue;
            }
            if let Err(err) = self.stop(handle.name()).await {
                warn!(session = %handle.name(), %err, "failed to stop session during shutdown");
            }
        }
    }

    /// Load sessions persisted by a previous daemon.
    ///
    /// Entries recorded as live are marked `CRASHED`: either their kernel
    /// is gone (stale), or it is an orphan of the previous daemon and is
    /// sent SIGTERM. Returns the number of entries reconciled that way.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the state directory cannot be listed.
    pub async fn reconcile_persisted(&self) -> Result<usize> {
        let Some(dir) = self.state_dir().cloned() else {
            return Ok(0);
        };
        let span = info_span!("reconcile_persisted", state_dir = %dir.root().display());
        async move {
            let mut reconciled = 0;
            for mut record in dir.list_sessions()? {
                if record.state.is_live() {
                    let reason = match record.pid {
                        Some(pid) if !is_stale(&record) => {
                            let delivered = signal::terminate(pid);
                            warn!(session = %record.name, pid, delivered, "terminating orphaned kernel");
                            format!("orphaned by previous daemon (pid {pid} sent SIGTERM)")
                        }
                        _ => "stale: kernel process not running after daemon restart".to_owned(),
                    };
                    info!(session = %record.name, from = %record.state, reason = %reason, "reconciling persisted session");
                    record.state = if record.state == SessionState::Stopping {
                        SessionState::Stopped
                    } else {
                        SessionState::Crashed
                    };
                    record.pid = None;
                    record.exit_reason = Some(reason);
                    record.updated_at = Utc::now();
                    if let Err(err) = dir.save_session(&record) {
                        warn!(session = %record.name, %err, "failed to persist reconciled session");
                    }
                    reconciled += 1;
                }
                self.registry().register_record(record).await;
            }
            Ok(reconciled)
        }
        .instrument(span)
        .await
    }
}
