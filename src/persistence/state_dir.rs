//! On-disk state directory.
//!
//! ```text
//! <root>/daemon.lock                        exclusive lock held by the daemon
//! <root>/daemon.json                        pid, ipc name, auth token, start time
//! <root>/daemon.log                         daemon stderr when auto-launched
//! <root>/sessions/<name>/session.json       session record
//! <root>/sessions/<name>/checkpoints/<cp>.json
//! ```
//!
//! Every JSON file is written to a temporary sibling and renamed into
//! place, so readers never observe a partial record.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::kernel::signal::pid_alive;
use crate::models::checkpoint::Checkpoint;
use crate::models::session::SessionRecord;
use crate::models::validate_name;
use crate::{AppError, Result};

/// Lock file name.
pub const LOCK_FILE: &str = "daemon.lock";
/// Daemon descriptor file name.
pub const DAEMON_FILE: &str = "daemon.json";
/// Daemon log file name.
pub const LOG_FILE: &str = "daemon.log";

const SESSIONS_DIR: &str = "sessions";
const SESSION_FILE: &str = "session.json";
const CHECKPOINTS_DIR: &str = "checkpoints";

/// Descriptor written by a running daemon so clients can find and
/// authenticate to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonInfo {
    /// Daemon process id.
    pub pid: u32,
    /// IPC socket name the daemon listens on.
    pub ipc_name: String,
    /// Shared secret required on every IPC request.
    pub auth_token: String,
    /// Daemon start time.
    pub started_at: DateTime<Utc>,
}

/// Exclusive daemon lock; released when dropped.
#[derive(Debug)]
pub struct DaemonLock {
    file: File,
    path: PathBuf,
}

impl DaemonLock {
    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!(%err, path = %self.path.display(), "daemon lock release failed");
        }
    }
}

/// Handle to a state directory root.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Open (creating if needed) a state directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(SESSIONS_DIR)).map_err(|err| {
            AppError::Io(format!(
                "cannot create state dir {}: {err}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the daemon log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Acquire the exclusive daemon lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyRunning` if another daemon holds the lock,
    /// or `AppError::Io` if the lock file cannot be opened.
    pub fn lock(&self) -> Result<DaemonLock> {
        let path = self.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| AppError::Io(format!("cannot open {}: {err}", path.display())))?;

        file.try_lock_exclusive().map_err(|_| {
            AppError::AlreadyRunning(format!(
                "another daemon holds {}",
                path.display()
            ))
        })?;

        Ok(DaemonLock { file, path })
    }

    /// Write `daemon.json`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on write failure.
    pub fn write_daemon_info(&self, info: &DaemonInfo) -> Result<()> {
        write_json_atomic(&self.root.join(DAEMON_FILE), info)
    }

    /// Read `daemon.json`, if present.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be decoded.
    pub fn read_daemon_info(&self) -> Result<Option<DaemonInfo>> {
        read_json(&self.root.join(DAEMON_FILE))
    }

    /// Remove `daemon.json`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if an existing file cannot be removed.
    pub fn clear_daemon_info(&self) -> Result<()> {
        remove_if_exists(&self.root.join(DAEMON_FILE))
    }

    fn session_dir(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(SESSIONS_DIR).join(name))
    }

    /// Persist a session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidName` or `AppError::Io`.
    pub fn save_session(&self, record: &SessionRecord) -> Result<()> {
        let path = self.session_dir(&record.name)?.join(SESSION_FILE);
        write_json_atomic(&path, record)
    }

    /// Load one session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidName`, or `AppError::Io` on a corrupt file.
    pub fn load_session(&self, name: &str) -> Result<Option<SessionRecord>> {
        read_json(&self.session_dir(name)?.join(SESSION_FILE))
    }

    /// Enumerate persisted sessions, oldest first. Unreadable entries are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the sessions directory cannot be listed.
    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let dir = self.root.join(SESSIONS_DIR);
        let mut records = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path().join(SESSION_FILE);
            match read_json::<SessionRecord>(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), %err, "skipping unreadable session record"),
            }
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(records)
    }

    /// Persisted sessions in a live state whose process no longer exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the sessions directory cannot be listed.
    pub fn stale_sessions(&self) -> Result<Vec<SessionRecord>> {
        Ok(self
            .list_sessions()?
            .into_iter()
            .filter(is_stale)
            .collect())
    }

    /// Delete a session and its persisted checkpoints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidName` or `AppError::Io`.
    pub fn remove_session(&self, name: &str) -> Result<()> {
        let dir = self.session_dir(name)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Io(format!(
                "cannot remove {}: {err}",
                dir.display()
            ))),
        }
    }

    fn checkpoint_path(&self, session: &str, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self
            .session_dir(session)?
            .join(CHECKPOINTS_DIR)
            .join(format!("{name}.json")))
    }

    /// Persist a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidName` or `AppError::Io`.
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.checkpoint_path(&checkpoint.session, &checkpoint.name)?;
        write_json_atomic(&path, checkpoint)
    }

    /// Load every persisted checkpoint of a session, oldest first.
    /// Unreadable files are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidName` or `AppError::Io`.
    pub fn load_checkpoints(&self, session: &str) -> Result<Vec<Checkpoint>> {
        let dir = self.session_dir(session)?.join(CHECKPOINTS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut checkpoints = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_json::<Checkpoint>(&path) {
                Ok(Some(checkpoint)) => checkpoints.push(checkpoint),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), %err, "skipping unreadable checkpoint"),
            }
        }

        checkpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(checkpoints)
    }

    /// Delete a persisted checkpoint; missing files are ignored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidName` or `AppError::Io`.
    pub fn remove_checkpoint(&self, session: &str, name: &str) -> Result<()> {
        remove_if_exists(&self.checkpoint_path(session, name)?)
    }
}

/// Serialize `value` to `path` through a temporary file in the same
/// directory.
/// Whether a persisted record claims a live state its process no longer has.
#[must_use]
pub fn is_stale(record: &SessionRecord) -> bool {
    record.state.is_live() && !record.pid.is_some_and(pid_alive)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Io(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(parent)?;

    let tmp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|err| AppError::Io(format!("cannot write {}: {}", path.display(), err.error)))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| AppError::Io(format!("corrupt {}: {err}", path.display()))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::Io(format!("cannot read {}: {err}", path.display()))),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(format!(
            "cannot remove {}: {err}",
            path.display()
        ))),
    }
}
