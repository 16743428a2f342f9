//! Command channel: asynchronous payload delivery and output retrieval.
//!
//! `send` enqueues and returns the request id immediately; the session
//! worker executes payloads one at a time in submission order. Output is
//! read back from the session's bounded buffer, and `wait` blocks (bounded)
//! until a specific request has finished.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, info_span, Instrument};

use crate::models::command::CommandResult;
use crate::models::output::OutputRead;
use crate::models::session::SessionState;
use crate::orchestrator::worker::Job;
use crate::orchestrator::SessionManager;
use crate::{AppError, Result};

impl SessionManager {
    /// Submit `payload` for execution and return its request id.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionNotFound` if the name is unknown.
    /// - `AppError::ProcessCrashed` if the kernel died.
    /// - `AppError::SessionNotRunning` if the session is in any other
    ///   non-running state.
    /// - `AppError::SessionPaused` if the session is paused and `force` is
    ///   not set.
    pub async fn send(&self, name: &str, payload: String, force: bool) -> Result<u64> {
        let span = info_span!("send", session = name);
        async move {
            let handle = self.registry().lookup(name).await?;
            let _op = handle.begin_op().await;
            let mut inner = handle.lock().await;
            handle.reconcile_liveness(&mut inner);

            match inner.record.state {
                SessionState::Running => {}
                SessionState::Crashed => {
                    return Err(AppError::ProcessCrashed(format!(
                        "session '{name}' crashed: {}",
                        inner.record.exit_reason.as_deref().unwrap_or("kernel exited")
                    )))
                }
                other => {
                    return Err(AppError::SessionNotRunning(format!(
                        "session '{name}' is {other}"
                    )))
                }
            }
            if inner.record.paused && !force {
                return Err(AppError::SessionPaused(format!(
                    "session '{name}' is paused; resume it or force the send"
                )));
            }

            let request_id = inner.last_request_id + 1;
            inner
                .results
                .insert(request_id, CommandResult::pending(request_id, payload.clone()));

            let queued = inner.link.as_ref().is_some_and(|link| {
                link.jobs
                    .send(Job::Exec {
                        request_id,
                        code: payload,
                    })
                    .is_ok()
            });
            if !queued {
                inner.results.remove(&request_id);
                return Err(AppError::ProcessCrashed(format!(
                    "session '{name}' has no live kernel worker"
                )));
            }

            inner.last_request_id = request_id;
            info!(request_id, forced = force && inner.record.paused, "request queued");
            Ok(request_id)
        }
        .instrument(span)
        .await
    }

    /// Read captured output produced by requests after `since` (everything
    /// when `None`). With `drain` the buffer is cleared afterwards.
    ///
    /// Works in every session state, so output of a crashed or stopped
    /// session can still be inspected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if the name is unknown.
    pub async fn read(&self, name: &str, since: Option<u64>, drain: bool) -> Result<OutputRead> {
        let handle = self.registry().lookup(name).await?;
        let mut inner = handle.lock().await;
        let read = if drain {
            inner.output.drain(since)
        } else {
            inner.output.read(since)
        };
        debug!(session = name, ?since, drain, lines = read.entries.len(), truncated = read.truncated, "output read");
        Ok(read)
    }

    /// Wait until `request_id` has finished or `timeout` elapses, and
    /// return the request's result (still `pending` on timeout). `timeout`
    /// is capped at `timeouts.max_wait_seconds`.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionNotFound` if the name is unknown.
    /// - `AppError::Kernel` if the request id was never issued or its
    ///   result is no longer retained.
    pub async fn wait(&self, name: &str, request_id: u64, timeout: Duration) -> Result<CommandResult> {
        let handle = self.registry().lookup(name).await?;
        let mut finished = handle.subscribe_finished();
        let deadline = Instant::now() + timeout.min(self.config().max_wait());

        loop {
            let result = {
                let inner = handle.lock().await;
                inner.results.get(&request_id).cloned().ok_or_else(|| {
                    if request_id == 0 || request_id > inner.last_request_id {
                        AppError::Kernel(format!(
                            "request {request_id} was never issued in session '{name}'"
                        ))
                    } else {
                        AppError::Kernel(format!(
                            "result of request {request_id} is no longer retained"
                        ))
                    }
                })?
            };
            if result.is_finished() {
                return Ok(result);
            }

            match tokio::time::timeout_at(deadline, finished.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => {
                    debug!(session = name, request_id, "wait timed out");
                    let inner = handle.lock().await;
                    return Ok(inner.results.get(&request_id).cloned().unwrap_or(result));
                }
            }
        }
    }
}
