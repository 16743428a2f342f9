#![forbid(unsafe_code)]

//! Persistent interpreter sessions with checkpoint and rollback.
//!
//! The `replhost` daemon owns long-lived kernel processes; `replhost-ctl`
//! drives them over a local socket.

pub mod config;
pub mod errors;
pub mod interp;
pub mod ipc;
pub mod kernel;
pub mod models;
pub mod orchestrator;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, ErrorKind, Result};
