//! Session worker task.
//!
//! One worker per running session owns the kernel process. It drains the
//! session's job queue strictly in FIFO order, keeping at most one request
//! in flight, and routes kernel replies back into the session state. Lines
//! the kernel prints outside the protocol (and everything on its stderr)
//! are captured into the output buffer attributed to the running request,
//! or to the last finished one between requests.
//!
//! The worker ends when the session is stopped (cancellation) or when the
//! kernel goes away on its own, in which case the session becomes
//! `CRASHED` and every queued request is failed.

use std::collections::VecDeque;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::kernel::protocol::{Inbound, KernelEvent, KernelRequest};
use crate::kernel::signal;
use crate::kernel::writer::KernelWriter;
use crate::models::output::OutputStream;
use crate::models::session::SessionState;
use crate::orchestrator::handle::SessionHandle;
use crate::{AppError, Result};

/// How long to keep draining kernel output after the process exited.
const EXIT_DRAIN_WINDOW: Duration = Duration::from_millis(250);

/// Work queued for a session's kernel.
#[derive(Debug)]
pub(crate) enum Job {
    /// Execute a submitted payload.
    Exec { request_id: u64, code: String },
    /// Capture the kernel's restorable state.
    Snapshot {
        reply: oneshot::Sender<Result<serde_json::Value>>,
    },
    /// Replace the kernel's state.
    Restore {
        state: serde_json::Value,
        reply: oneshot::Sender<Result<()>>,
    },
}

impl Job {
    fn fail(self, make_error: impl Fn() -> AppError) {
        match self {
            Self::Exec { .. } => {}
            Self::Snapshot { reply } => {
                let _ = reply.send(Err(make_error()));
            }
            Self::Restore { reply, .. } => {
                let _ = reply.send(Err(make_error()));
            }
        }
    }
}

enum InFlight {
    Exec {
        wire_id: u64,
        request_id: u64,
    },
    Snapshot {
        wire_id: u64,
        reply: oneshot::Sender<Result<serde_json::Value>>,
    },
    Restore {
        wire_id: u64,
        reply: oneshot::Sender<Result<()>>,
    },
}

impl InFlight {
    fn wire_id(&self) -> u64 {
        match self {
            Self::Exec { wire_id, .. }
            | Self::Snapshot { wire_id, .. }
            | Self::Restore { wire_id, .. } => *wire_id,
        }
    }
}

enum Dispatched {
    Sent(InFlight),
    Skipped,
    Broken(String),
}

enum Exit {
    Stopped,
    Gone(String),
}

/// Everything a worker needs, handed over by the supervisor after the
/// kernel signalled ready.
pub(crate) struct WorkerParts {
    pub handle: Arc<SessionHandle>,
    pub child: Child,
    pub writer: KernelWriter<ChildStdin>,
    pub inbound: mpsc::Receiver<Inbound>,
    pub stderr: mpsc::Receiver<String>,
    pub jobs: mpsc::UnboundedReceiver<Job>,
    pub cancel: CancellationToken,
    pub stop_grace: Duration,
}

/// Run a session worker until the session stops or the kernel exits.
pub(crate) async fn run_session_worker(parts: WorkerParts) {
    let WorkerParts {
        handle,
        mut child,
        mut writer,
        mut inbound,
        mut stderr,
        mut jobs,
        cancel,
        stop_grace,
    } = parts;
    let session = handle.name().to_owned();

    let mut queue: VecDeque<Job> = VecDeque::new();
    let mut inflight: Option<InFlight> = None;
    let mut next_wire: u64 = 0;
    let mut stderr_open = true;

    let exit = loop {
        if inflight.is_none() {
            let mut broken = None;
            while let Some(job) = queue.pop_front() {
                match dispatch(&handle, &mut writer, &mut next_wire, job).await {
                    Dispatched::Sent(sent) => {
                        inflight = Some(sent);
                        break;
                    }
                    Dispatched::Skipped => {}
                    Dispatched::Broken(reason) => {
                        broken = Some(reason);
                        break;
                    }
                }
            }
            if let Some(reason) = broken {
                break Exit::Gone(reason);
            }
        }

        tokio::select! {
            biased;

            () = cancel.cancelled() => break Exit::Stopped,

            message = inbound.recv() => {
                if let Some(message) = message {
                    on_inbound(&handle, &mut inflight, message).await;
                } else {
                    let status = timeout(EXIT_DRAIN_WINDOW, child.wait())
                        .await
                        .ok()
                        .and_then(std::result::Result::ok);
                    break Exit::Gone(describe_exit(status, "kernel closed its stdout"));
                }
            }

            line = stderr.recv(), if stderr_open => {
                match line {
                    Some(line) => capture_line(&handle, OutputStream::Stderr, &line).await,
                    None => stderr_open = false,
                }
            }

            job = jobs.recv() => {
                match job {
                    Some(job) => queue.push_back(job),
                    None => break Exit::Stopped,
                }
            }

            status = child.wait() => {
                drain_after_exit(&handle, &mut inflight, &mut inbound, &mut stderr).await;
                break Exit::Gone(describe_exit(status.ok(), "kernel process exited"));
            }
        }
    };

    match exit {
        Exit::Stopped => {
            debug!(session, "worker stopping kernel");
            terminate(&session, child, writer, stop_grace).await;
            let stopped = || AppError::SessionNotRunning(format!("session '{session}' was stopped"));
            fail_inflight(&handle, inflight, &stopped).await;
            for job in queue.drain(..) {
                job.fail(stopped);
            }
        }
        Exit::Gone(reason) => {
            warn!(session, reason = %reason, "kernel went away");
            if child.start_kill().is_ok() {
                let _ = timeout(EXIT_DRAIN_WINDOW, child.wait()).await;
            }
            let crashed = || AppError::ProcessCrashed(format!("session '{session}': {reason}"));
            fail_inflight(&handle, inflight, &crashed).await;
            for job in queue.drain(..) {
                job.fail(crashed);
            }

            let mut inner = handle.lock().await;
            inner.abandon_pending(&format!("{reason}\n"));
            if inner.record.state != SessionState::Stopping {
                handle.transition(&mut inner, SessionState::Crashed, Some(reason.clone()));
                inner.link = None;
            }
            drop(inner);
            handle.notify_all();
        }
    }

    debug!(session, "session worker finished");
}

async fn dispatch(
    handle: &SessionHandle,
    writer: &mut KernelWriter<ChildStdin>,
    next_wire: &mut u64,
    job: Job,
) -> Dispatched {
    match job {
        Job::Exec { request_id, code } => {
            {
                let mut inner = handle.lock().await;
                let pending = inner
                    .results
                    .get(&request_id)
                    .is_some_and(|result| !result.is_finished());
                if !pending {
                    return Dispatched::Skipped;
                }
                inner.current_request = Some(request_id);
            }

            *next_wire += 1;
            let wire_id = *next_wire;
            debug!(session = %handle.name(), request_id, wire_id, "dispatching request");
            match writer.send(&KernelRequest::Exec { id: wire_id, code }).await {
                Ok(()) => Dispatched::Sent(InFlight::Exec {
                    wire_id,
                    request_id,
                }),
                Err(err) => Dispatched::Broken(err.to_string()),
            }
        }
        Job::Snapshot { reply } => {
            if reply.is_closed() {
                return Dispatched::Skipped;
            }
            *next_wire += 1;
            let wire_id = *next_wire;
            match writer.send(&KernelRequest::Snapshot { id: wire_id }).await {
                Ok(()) => Dispatched::Sent(InFlight::Snapshot { wire_id, reply }),
                Err(err) => {
                    let reason = err.to_string();
                    let _ = reply.send(Err(err));
                    Dispatched::Broken(reason)
                }
            }
        }
        Job::Restore { state, reply } => {
            if reply.is_closed() {
                return Dispatched::Skipped;
            }
            *next_wire += 1;
            let wire_id = *next_wire;
            match writer
                .send(&KernelRequest::Restore { id: wire_id, state })
                .await
            {
                Ok(()) => Dispatched::Sent(InFlight::Restore { wire_id, reply }),
                Err(err) => {
                    let reason = err.to_string();
                    let _ = reply.send(Err(err));
                    Dispatched::Broken(reason)
                }
            }
        }
    }
}

async fn on_inbound(handle: &SessionHandle, inflight: &mut Option<InFlight>, message: Inbound) {
    let event = match message {
        Inbound::Raw(line) => {
            capture_line(handle, OutputStream::Stdout, &line).await;
            return;
        }
        Inbound::Oversized { limit } => {
            let Some(current) = inflight.take() else {
                warn!(session = %handle.name(), limit, "over-long kernel line with no request in flight");
                return;
            };
            warn!(session = %handle.name(), wire_id = current.wire_id(), limit, "kernel reply over the message limit");
            let oversized = || {
                AppError::Kernel(format!(
                    "kernel reply exceeded the {limit} byte message limit (kernel.max_message_bytes)"
                ))
            };
            fail_inflight(handle, Some(current), &oversized).await;
            return;
        }
        Inbound::Event(KernelEvent::Ready { .. }) => {
            debug!(session = %handle.name(), "duplicate ready signal ignored");
            return;
        }
        Inbound::Event(event) => event,
    };

    let answers_inflight = match (inflight.as_ref(), event.id()) {
        (Some(current), Some(id)) => current.wire_id() == id,
        (Some(_), None) => matches!(event, KernelEvent::Error { .. }),
        (None, _) => false,
    };
    if !answers_inflight {
        warn!(session = %handle.name(), id = ?event.id(), "kernel reply does not match any request");
        return;
    }
    let Some(current) = inflight.take() else {
        return;
    };

    match (current, event) {
        (
            InFlight::Exec { request_id, .. },
            KernelEvent::Result {
                ok, stdout, stderr, ..
            },
        ) => complete_exec(handle, request_id, ok, &stdout, &stderr).await,
        (InFlight::Exec { request_id, .. }, KernelEvent::Error { message, .. }) => {
            complete_exec(handle, request_id, false, "", &format!("{message}\n")).await;
        }
        (InFlight::Snapshot { reply, .. }, KernelEvent::Snapshot { state, .. }) => {
            let _ = reply.send(Ok(state));
        }
        (InFlight::Restore { reply, .. }, KernelEvent::Restored { .. }) => {
            let _ = reply.send(Ok(()));
        }
        (InFlight::Snapshot { reply, .. }, KernelEvent::Error { message, .. }) => {
            let _ = reply.send(Err(AppError::Kernel(message)));
        }
        (InFlight::Restore { reply, .. }, KernelEvent::Error { message, .. }) => {
            let _ = reply.send(Err(AppError::Kernel(message)));
        }
        (current, event) => {
            warn!(session = %handle.name(), ?event, "kernel reply has the wrong kind");
            let mismatch = || AppError::Kernel("kernel answered with the wrong reply kind".into());
            fail_inflight(handle, Some(current), &mismatch).await;
        }
    }
}

async fn complete_exec(handle: &SessionHandle, request_id: u64, ok: bool, stdout: &str, stderr: &str) {
    let mut inner = handle.lock().await;
    inner.output.push_text(request_id, OutputStream::Stdout, stdout);
    inner.output.push_text(request_id, OutputStream::Stderr, stderr);
    if let Some(result) = inner.results.get_mut(&request_id) {
        result.finish(ok, stdout, stderr);
    }
    if inner.current_request == Some(request_id) {
        inner.current_request = None;
    }
    inner.last_finished_request = inner.last_finished_request.max(request_id);
    inner.prune_results();
    drop(inner);

    debug!(session = %handle.name(), request_id, ok, "request finished");
    handle.notify_finished(request_id);
}

async fn capture_line(handle: &SessionHandle, stream: OutputStream, line: &str) {
    let mut inner = handle.lock().await;
    let request_id = inner.current_request.unwrap_or(inner.last_finished_request);
    inner.output.push_text(request_id, stream, line);
    if let Some(result) = inner
        .results
        .get_mut(&request_id)
        .filter(|result| !result.is_finished())
    {
        result.append_line(stream, line);
    }
}

async fn fail_inflight(
    handle: &SessionHandle,
    inflight: Option<InFlight>,
    make_error: &(dyn Fn() -> AppError + Sync),
) {
    match inflight {
        None => {}
        Some(InFlight::Exec { request_id, .. }) => {
            let message = format!("{}\n", make_error());
            complete_exec(handle, request_id, false, "", &message).await;
        }
        Some(InFlight::Snapshot { reply, .. }) => {
            let _ = reply.send(Err(make_error()));
        }
        Some(InFlight::Restore { reply, .. }) => {
            let _ = reply.send(Err(make_error()));
        }
    }
}

/// Process whatever the kernel managed to write before it exited.
async fn drain_after_exit(
    handle: &SessionHandle,
    inflight: &mut Option<InFlight>,
    inbound: &mut mpsc::Receiver<Inbound>,
    stderr: &mut mpsc::Receiver<String>,
) {
    while let Ok(Some(message)) = timeout(EXIT_DRAIN_WINDOW, inbound.recv()).await {
        on_inbound(handle, inflight, message).await;
    }
    while let Ok(line) = stderr.try_recv() {
        capture_line(handle, OutputStream::Stderr, &line).await;
    }
}

/// Close stdin, send SIGTERM, wait out the grace period, then force-kill.
async fn terminate(
    session: &str,
    mut child: Child,
    writer: KernelWriter<ChildStdin>,
    grace: Duration,
) {
    writer.close().await;
    if let Some(pid) = child.id() {
        signal::terminate(pid);
    }

    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => info!(session, %status, "kernel exited"),
        Ok(Err(err)) => warn!(session, %err, "error waiting for kernel process"),
        Err(_) => {
            warn!(session, "kernel did not exit within grace period, forcing kill");
            if let Err(err) = child.kill().await {
                warn!(session, %err, "failed to force-kill kernel process");
            }
        }
    }
}

fn describe_exit(status: Option<ExitStatus>, fallback: &str) -> String {
    status.map_or_else(|| fallback.to_owned(), |status| format!("kernel process exited ({status})"))
}
