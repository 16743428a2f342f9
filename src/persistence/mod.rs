//! Persistence layer modules.

pub mod state_dir;

pub use state_dir::{DaemonInfo, DaemonLock, StateDir};
