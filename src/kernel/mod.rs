//! Kernel processes and the protocol spoken with them.
//!
//! A kernel is a long-lived interpreter process owned by one session. The
//! daemon talks to it over stdio using newline-delimited JSON (see
//! [`protocol`]).

pub mod codec;
pub mod protocol;
pub mod python;
pub mod reader;
pub mod signal;
pub mod spawner;
pub mod writer;
