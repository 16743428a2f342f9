//! Local IPC layer for `replhost-ctl` interaction.
//!
//! Provides a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! server that accepts JSON-line commands from the companion CLI, and the
//! blocking client the CLI uses to reach it.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{IpcCommand, IpcRequest, IpcResponse};
pub use server::{spawn_ipc_server, IpcState};
