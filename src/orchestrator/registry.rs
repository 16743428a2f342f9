//! Process-wide directory of sessions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::models::session::{SessionRecord, SessionState, StateChange};
use crate::models::validate_name;
use crate::orchestrator::handle::{SessionHandle, StateSink};
use crate::persistence::StateDir;
use crate::{AppError, Result};

/// Capacity of the state-change broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Maps session names to their handles.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
    sink: StateSink,
    output_capacity: usize,
    checkpoint_limit: usize,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(
        state_dir: Option<StateDir>,
        output_capacity: usize,
        checkpoint_limit: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sessions: Mutex::new(HashMap::new()),
            sink: StateSink::new(state_dir, events),
            output_capacity,
            checkpoint_limit,
        }
    }

    /// Subscribe to lifecycle notifications of every session.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.sink.subscribe()
    }

    /// State directory, when sessions are persisted.
    #[must_use]
    pub fn state_dir(&self) -> Option<&StateDir> {
        self.sink.state_dir()
    }

    /// Atomically register `name` in the `STARTING` state.
    ///
    /// A non-live entry with the same name is replaced. The returned guard
    /// holds the new session's operation lock, so no other operation can
    /// observe the session until the caller releases it.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidName` if the name is malformed.
    /// - `AppError::AlreadyRunning` if the session is starting, running or
    ///   stopping.
    pub async fn register_starting(
        &self,
        name: &str,
        kernel: &str,
        working_dir: Option<PathBuf>,
    ) -> Result<(Arc<SessionHandle>, OwnedMutexGuard<()>)> {
        validate_name(name)?;
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.get(name) {
            let state = existing.state().await;
            if state.is_live() {
                return Err(AppError::AlreadyRunning(format!(
                    "session '{name}' is {state}"
                )));
            }
            debug!(session = name, %state, "replacing finished session entry");
        }

        let handle = Arc::new(SessionHandle::new(
            SessionHandle::unstarted_record(name, kernel, working_dir),
            self.output_capacity,
            self.checkpoint_limit,
            self.sink.clone(),
        ));
        let op = handle
            .try_begin_op()
            .ok_or_else(|| AppError::AlreadyRunning(format!("session '{name}' is busy")))?;
        {
            let mut inner = handle.lock().await;
            handle.transition(&mut inner, SessionState::Starting, None);
        }
        sessions.insert(name.to_owned(), Arc::clone(&handle));
        Ok((handle, op))
    }

    /// Register a session recovered from a persisted record.
    pub async fn register_record(&self, record: SessionRecord) -> Arc<SessionHandle> {
        let name = record.name.clone();
        let handle = Arc::new(SessionHandle::new(
            record,
            self.output_capacity,
            self.checkpoint_limit,
            self.sink.clone(),
        ));
        self.sessions
            .lock()
            .await
            .insert(name, Arc::clone(&handle));
        handle
    }

    /// Remove `name` from the registry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if the name is unknown.
    pub async fn unregister(&self, name: &str) -> Result<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| AppError::SessionNotFound(format!("no session named '{name}'")))
    }

    /// Look up a session by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if the name is unknown.
    pub async fn lookup(&self, name: &str) -> Result<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound(format!("no session named '{name}'")))
    }

    /// All sessions ordered by creation time.
    pub async fn list(&self) -> Vec<Arc<SessionHandle>> {
        let mut handles: Vec<_> = self.sessions.lock().await.values().cloned().collect();
        handles.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.name().cmp(b.name()))
        });
        handles
    }
}
