//! Session orchestration.
//!
//! [`SessionManager`] is the single entry point used by the IPC server and
//! by tests. Its operations are split by concern:
//!
//! - [`session_manager`]: process supervision (start, stop, status, pause,
//!   resume, remove, startup reconciliation).
//! - [`channel`]: payload delivery and output retrieval.
//! - [`checkpoint_manager`]: snapshot capture, rollback and retention.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::GlobalConfig;
use crate::models::session::StateChange;
use crate::persistence::StateDir;

pub mod channel;
pub mod checkpoint_manager;
pub mod handle;
pub mod registry;
pub mod session_manager;
pub(crate) mod worker;

pub use checkpoint_manager::{CheckpointStore, RollbackOutcome};
pub use handle::SessionHandle;
pub use registry::SessionRegistry;
pub use session_manager::StartOptions;

/// Owns every session of the daemon.
#[derive(Debug)]
pub struct SessionManager {
    config: Arc<GlobalConfig>,
    registry: SessionRegistry,
}

impl SessionManager {
    /// Create a manager. Sessions and checkpoints are persisted under
    /// `state_dir` when one is given.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, state_dir: Option<StateDir>) -> Self {
        let registry = SessionRegistry::new(
            state_dir,
            config.output.capacity,
            config.checkpoints.max_per_session,
        );
        Self { config, registry }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Session registry.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Subscribe to lifecycle notifications of every session.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.registry.subscribe()
    }

    fn state_dir(&self) -> Option<&StateDir> {
        self.registry.state_dir()
    }
}
