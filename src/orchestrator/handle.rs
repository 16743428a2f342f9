//! Per-session handle shared by the registry, the supervisor and the
//! session worker.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch, Mutex, MutexGuard, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::kernel::signal::pid_alive;
use crate::models::command::CommandResult;
use crate::models::output::OutputBuffer;
use crate::models::session::{SessionInfo, SessionRecord, SessionState, StateChange};
use crate::orchestrator::checkpoint_manager::CheckpointStore;
use crate::orchestrator::worker::Job;
use crate::persistence::StateDir;

/// Finished results kept per session for `wait`; older ones are pruned.
const RESULT_HISTORY: usize = 1024;

/// Where lifecycle transitions are published.
#[derive(Debug, Clone)]
pub struct StateSink {
    state_dir: Option<StateDir>,
    events: broadcast::Sender<StateChange>,
}

impl StateSink {
    /// Create a sink persisting to `state_dir` (when given) and
    /// broadcasting to `events`.
    #[must_use]
    pub fn new(state_dir: Option<StateDir>, events: broadcast::Sender<StateChange>) -> Self {
        Self { state_dir, events }
    }

    /// State directory, when sessions are persisted.
    #[must_use]
    pub fn state_dir(&self) -> Option<&StateDir> {
        self.state_dir.as_ref()
    }

    /// Subscribe to state-change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    pub(crate) fn persist(&self, record: &SessionRecord) {
        if let Some(ref dir) = self.state_dir {
            if let Err(err) = dir.save_session(record) {
                warn!(session = %record.name, %err, "failed to persist session record");
            }
        }
    }

    fn publish(&self, change: StateChange) {
        // No receivers is not an error.
        let _ = self.events.send(change);
    }
}

/// Connection between a running session and its worker task.
#[derive(Debug)]
pub(crate) struct KernelLink {
    /// Job queue drained by the worker in FIFO order.
    pub jobs: mpsc::UnboundedSender<Job>,
    /// Cancelling asks the worker to terminate the kernel.
    pub cancel: CancellationToken,
    /// Worker task.
    pub worker: Option<JoinHandle<()>>,
}

/// Mutable session state guarded by [`SessionHandle::lock`].
#[derive(Debug)]
pub(crate) struct SessionInner {
    pub record: SessionRecord,
    pub output: OutputBuffer,
    pub results: BTreeMap<u64, CommandResult>,
    pub last_request_id: u64,
    pub last_finished_request: u64,
    pub current_request: Option<u64>,
    pub checkpoints: CheckpointStore,
    pub link: Option<KernelLink>,
}

impl SessionInner {
    /// Requests accepted but not yet finished.
    pub fn pending_requests(&self) -> usize {
        self.results.values().filter(|r| !r.is_finished()).count()
    }

    /// Fail every unfinished request with `reason`.
    pub fn abandon_pending(&mut self, reason: &str) -> usize {
        let mut count = 0;
        for result in self.results.values_mut().filter(|r| !r.is_finished()) {
            result.abandon(reason);
            count += 1;
        }
        self.current_request = None;
        count
    }

    /// Drop the oldest finished results beyond the history limit.
    pub fn prune_results(&mut self) {
        while self.results.len() > RESULT_HISTORY {
            let Some((&oldest, result)) = self.results.iter().next() else {
                break;
            };
            if !result.is_finished() {
                break;
            }
            self.results.remove(&oldest);
        }
    }
}

/// Registry entry for one named session.
#[derive(Debug)]
pub struct SessionHandle {
    name: String,
    created_at: DateTime<Utc>,
    /// Serializes mutating operations (send, checkpoint, rollback, stop,
    /// pause, resume) on this session.
    op_lock: Arc<Mutex<()>>,
    inner: Mutex<SessionInner>,
    finished: watch::Sender<u64>,
    sink: StateSink,
}

impl SessionHandle {
    pub(crate) fn new(
        record: SessionRecord,
        output_capacity: usize,
        checkpoint_limit: usize,
        sink: StateSink,
    ) -> Self {
        let (finished, _) = watch::channel(0);
        Self {
            name: record.name.clone(),
            created_at: record.created_at,
            op_lock: Arc::new(Mutex::new(())),
            inner: Mutex::new(SessionInner {
                record,
                output: OutputBuffer::new(output_capacity),
                results: BTreeMap::new(),
                last_request_id: 0,
                last_finished_request: 0,
                current_request: None,
                checkpoints: CheckpointStore::new(checkpoint_limit),
                link: None,
            }),
            finished,
            sink,
        }
    }

    /// A fresh record for a session about to be started.
    pub(crate) fn unstarted_record(
        name: &str,
        kernel: &str,
        working_dir: Option<PathBuf>,
    ) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            name: name.to_owned(),
            state: SessionState::Unstarted,
            created_at: now,
            updated_at: now,
            pid: None,
            kernel: kernel.to_owned(),
            working_dir,
            paused: false,
            exit_reason: None,
        }
    }

    /// Session name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Acquire the per-session operation lock.
    pub(crate) async fn begin_op(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.op_lock).lock_owned().await
    }

    pub(crate) fn try_begin_op(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.op_lock).try_lock_owned().ok()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().await
    }

    pub(crate) fn sink(&self) -> &StateSink {
        &self.sink
    }

    /// Current state without liveness reconciliation.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.record.state
    }

    /// Apply a lifecycle transition, persist it and broadcast it.
    ///
    /// Returns `false` (and changes nothing) if the transition is not
    /// permitted from the current state.
    pub(crate) fn transition(
        &self,
        inner: &mut SessionInner,
        to: SessionState,
        reason: Option<String>,
    ) -> bool {
        let from = inner.record.state;
        if !from.can_transition_to(to) {
            if from != to {
                warn!(session = %self.name, %from, %to, "ignoring invalid state transition");
            }
            return false;
        }

        let at = Utc::now();
        inner.record.state = to;
        inner.record.updated_at = at;
        if matches!(to, SessionState::Crashed | SessionState::Stopped) {
            inner.record.pid = None;
            if reason.is_some() {
                inner.record.exit_reason.clone_from(&reason);
            }
        } else if to == SessionState::Starting {
            inner.record.exit_reason = None;
        }

        info!(session = %self.name, %from, %to, reason = reason.as_deref().unwrap_or(""), "session state changed");
        self.sink.persist(&inner.record);
        self.sink.publish(StateChange {
            session: self.name.clone(),
            from,
            to,
            reason,
            at,
        });
        true
    }

    /// Persist the record after a non-state change (pid, paused flag).
    pub(crate) fn touch(&self, inner: &mut SessionInner) {
        inner.record.updated_at = Utc::now();
        self.sink.persist(&inner.record);
    }

    /// Record that `request_id` finished and wake waiters.
    pub(crate) fn notify_finished(&self, request_id: u64) {
        self.finished.send_if_modified(|highest| {
            if request_id > *highest {
                *highest = request_id;
                true
            } else {
                false
            }
        });
    }

    /// Wake every waiter, e.g. after pending requests were abandoned.
    pub(crate) fn notify_all(&self) {
        self.finished.send_modify(|_| {});
    }

    pub(crate) fn subscribe_finished(&self) -> watch::Receiver<u64> {
        self.finished.subscribe()
    }

    /// Move a `RUNNING` session whose process has disappeared to
    /// `CRASHED`, before the worker notices the closed pipes.
    pub(crate) fn reconcile_liveness(&self, inner: &mut SessionInner) {
        if !cfg!(unix) || inner.record.state != SessionState::Running {
            return;
        }
        let Some(pid) = inner.record.pid else {
            return;
        };
        if pid_alive(pid) {
            return;
        }

        let abandoned = inner.abandon_pending("kernel process exited\n");
        self.transition(
            inner,
            SessionState::Crashed,
            Some(format!("process {pid} no longer exists")),
        );
        if abandoned > 0 {
            self.notify_all();
        }
    }

    /// Reconcile liveness and build a status snapshot.
    pub async fn info(&self) -> SessionInfo {
        let mut inner = self.inner.lock().await;
        self.reconcile_liveness(&mut inner);

        let alive = inner.record.state.is_live()
            && inner.record.pid.is_some_and(|pid| !cfg!(unix) || pid_alive(pid));

        SessionInfo {
            name: inner.record.name.clone(),
            state: inner.record.state,
            alive,
            created_at: inner.record.created_at,
            updated_at: inner.record.updated_at,
            pid: inner.record.pid,
            kernel: inner.record.kernel.clone(),
            working_dir: inner.record.working_dir.clone(),
            paused: inner.record.paused,
            last_request_id: inner.last_request_id,
            pending_requests: inner.pending_requests(),
            checkpoints: inner.checkpoints.names(),
            exit_reason: inner.record.exit_reason.clone(),
        }
    }
}
