//! Checkpoint capture, rollback and retention.
//!
//! A checkpoint is taken by queueing a snapshot job behind every payload
//! already submitted to the session, so it reflects the state after all of
//! them. Rollback verifies the stored digest, then queues a restore job.
//! Each session keeps at most `checkpoints.max_per_session` checkpoints;
//! the oldest are pruned first.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{info, info_span, warn, Instrument};

use crate::models::checkpoint::{Checkpoint, CheckpointSummary};
use crate::models::session::SessionState;
use crate::models::validate_name;
use crate::orchestrator::handle::SessionInner;
use crate::orchestrator::worker::Job;
use crate::orchestrator::SessionManager;
use crate::{AppError, Result};

/// Ordered, bounded set of a session's checkpoints (oldest first).
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    entries: Vec<Checkpoint>,
    limit: usize,
}

impl CheckpointStore {
    /// Create an empty store keeping at most `limit` checkpoints.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Whether a checkpoint with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|c| c.name == name)
    }

    /// Look up a checkpoint by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Checkpoint> {
        self.entries.iter().find(|c| c.name == name)
    }

    /// Add a checkpoint and return the ones pruned to stay within the limit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DuplicateCheckpoint` if the name is taken.
    pub fn insert(&mut self, checkpoint: Checkpoint) -> Result<Vec<Checkpoint>> {
        if self.contains(&checkpoint.name) {
            return Err(AppError::DuplicateCheckpoint(format!(
                "checkpoint '{}' already exists in session '{}'",
                checkpoint.name, checkpoint.session
            )));
        }
        Ok(self.load(checkpoint))
    }

    /// Add a checkpoint, replacing one with the same name, and return the
    /// ones pruned to stay within the limit.
    pub fn load(&mut self, checkpoint: Checkpoint) -> Vec<Checkpoint> {
        self.entries.retain(|c| c.name != checkpoint.name);
        self.entries.push(checkpoint);
        let excess = self.entries.len().saturating_sub(self.limit);
        self.entries.drain(..excess).collect()
    }

    /// Remove a checkpoint by name.
    pub fn remove(&mut self, name: &str) -> Option<Checkpoint> {
        let index = self.entries.iter().position(|c| c.name == name)?;
        Some(self.entries.remove(index))
    }

    /// Names, oldest first.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.name.clone()).collect()
    }

    /// Listing entries, oldest first.
    #[must_use]
    pub fn summaries(&self) -> Vec<CheckpointSummary> {
        self.entries.iter().map(Checkpoint::summary).collect()
    }

    /// Number of checkpoints held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no checkpoints are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of a rollback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RollbackOutcome {
    /// The checkpoint that was restored.
    pub checkpoint: CheckpointSummary,
    /// Reminder that state created after the checkpoint is gone.
    pub warning: String,
}

fn ensure_running(inner: &SessionInner, session: &str) -> Result<()> {
    match inner.record.state {
        SessionState::Running => Ok(()),
        other => Err(AppError::SessionNotRunning(format!(
            "session '{session}' is {other}"
        ))),
    }
}

fn queue(inner: &SessionInner, session: &str, job: Job) -> Result<()> {
    inner
        .link
        .as_ref()
        .and_then(|link| link.jobs.send(job).ok())
        .ok_or_else(|| AppError::ProcessCrashed(format!("session '{session}' has no live kernel worker")))
}

impl SessionManager {
    /// Capture the session's current state under `checkpoint`.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidName` for a malformed checkpoint name.
    /// - `AppError::SessionNotFound` / `AppError::SessionNotRunning`.
    /// - `AppError::DuplicateCheckpoint` if the name is taken.
    /// - `AppError::Kernel` if the kernel fails or does not answer within
    ///   `timeouts.checkpoint_seconds`.
    pub async fn checkpoint(&self, session: &str, checkpoint: &str) -> Result<CheckpointSummary> {
        let span = info_span!("checkpoint", session, checkpoint);
        async move {
            validate_name(checkpoint)?;
            let handle = self.registry().lookup(session).await?;
            let _op = handle.begin_op().await;

            let (reply_rx, kernel) = {
                let mut inner = handle.lock().await;
                handle.reconcile_liveness(&mut inner);
                ensure_running(&inner, session)?;
                if inner.checkpoints.contains(checkpoint) {
                    return Err(AppError::DuplicateCheckpoint(format!(
                        "checkpoint '{checkpoint}' already exists in session '{session}'"
                    )));
                }
                let (reply, reply_rx) = oneshot::channel();
                queue(&inner, session, Job::Snapshot { reply })?;
                (reply_rx, inner.record.kernel.clone())
            };

            let limit = self.config().checkpoint_timeout();
            let state = match tokio::time::timeout(limit, reply_rx).await {
                Ok(Ok(result)) => result?,
                Ok(Err(_)) => {
                    return Err(AppError::ProcessCrashed(format!(
                        "session '{session}' went away during the snapshot"
                    )))
                }
                Err(_) => {
                    return Err(AppError::Kernel(format!(
                        "snapshot did not complete within {limit:?}"
                    )))
                }
            };

            let created = Checkpoint::new(checkpoint.to_owned(), session.to_owned(), kernel, state)?;
            let persist = self.config().checkpoints.persist;
            if persist {
                if let Some(dir) = self.state_dir() {
                    dir.save_checkpoint(&created)?;
                }
            }

            let summary = created.summary();
            let pruned = handle.lock().await.checkpoints.insert(created)?;
            for old in pruned {
                info!(pruned = %old.name, "checkpoint pruned by retention limit");
                if persist {
                    if let Some(dir) = self.state_dir() {
                        if let Err(err) = dir.remove_checkpoint(session, &old.name) {
                            warn!(pruned = %old.name, %err, "failed to delete pruned checkpoint");
                        }
                    }
                }
            }

            info!(size_bytes = summary.size_bytes, "checkpoint created");
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Restore the session's state from `checkpoint`. State created since
    /// the checkpoint is discarded; the checkpoint itself is kept.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionNotFound` / `AppError::SessionNotRunning`.
    /// - `AppError::CheckpointNotFound` if the checkpoint does not exist.
    /// - `AppError::Kernel` if the payload fails verification, belongs to a
    ///   different kernel, or the kernel rejects or times out the restore.
    pub async fn rollback(&self, session: &str, checkpoint: &str) -> Result<RollbackOutcome> {
        let span = info_span!("rollback", session, checkpoint);
        async move {
            let handle = self.registry().lookup(session).await?;
            let _op = handle.begin_op().await;

            let (reply_rx, summary) = {
                let mut inner = handle.lock().await;
                handle.reconcile_liveness(&mut inner);
                ensure_running(&inner, session)?;
                let target = inner.checkpoints.get(checkpoint).cloned().ok_or_else(|| {
                    AppError::CheckpointNotFound(format!(
                        "no checkpoint '{checkpoint}' in session '{session}'"
                    ))
                })?;
                target.verify()?;
                if target.kernel != inner.record.kernel {
                    return Err(AppError::Kernel(format!(
                        "checkpoint '{checkpoint}' was taken by a {} kernel, session runs {}",
                        target.kernel, inner.record.kernel
                    )));
                }

                let summary = target.summary();
                let (reply, reply_rx) = oneshot::channel();
                queue(
                    &inner,
                    session,
                    Job::Restore {
                        state: target.state,
                        reply,
                    },
                )?;
                (reply_rx, summary)
            };

            warn!("rolling back; state changes since the checkpoint are discarded");

            let limit = self.config().checkpoint_timeout();
            match tokio::time::timeout(limit, reply_rx).await {
                Ok(Ok(result)) => result?,
                Ok(Err(_)) => {
                    return Err(AppError::ProcessCrashed(format!(
                        "session '{session}' went away during the restore"
                    )))
                }
                Err(_) => {
                    return Err(AppError::Kernel(format!(
                        "restore did not complete within {limit:?}"
                    )))
                }
            }

            info!("rollback complete");
            Ok(RollbackOutcome {
                warning: format!(
                    "state changes made after checkpoint '{checkpoint}' were discarded"
                ),
                checkpoint: summary,
            })
        }
        .instrument(span)
        .await
    }

    /// Checkpoints of a session, oldest first. Works in every state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if the name is unknown.
    pub async fn list_checkpoints(&self, session: &str) -> Result<Vec<CheckpointSummary>> {
        let handle = self.registry().lookup(session).await?;
        let inner = handle.lock().await;
        Ok(inner.checkpoints.summaries())
    }

    /// Delete a checkpoint (and its persisted copy).
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` or `AppError::CheckpointNotFound`.
    pub async fn delete_checkpoint(&self, session: &str, checkpoint: &str) -> Result<()> {
        let span = info_span!("delete_checkpoint", session, checkpoint);
        async move {
            let handle = self.registry().lookup(session).await?;
            let _op = handle.begin_op().await;
            handle
                .lock()
                .await
                .checkpoints
                .remove(checkpoint)
                .ok_or_else(|| {
                    AppError::CheckpointNotFound(format!(
                        "no checkpoint '{checkpoint}' in session '{session}'"
                    ))
                })?;

            if let Some(dir) = self.state_dir() {
                dir.remove_checkpoint(session, checkpoint)?;
            }
            info!("checkpoint deleted");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
