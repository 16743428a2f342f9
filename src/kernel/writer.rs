//! Kernel request writer.
//!
//! Serialises [`KernelRequest`]s to compact single-line JSON and writes
//! them, newline-terminated, to the kernel's stdin.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::kernel::protocol::KernelRequest;
use crate::{AppError, Result};

/// Owning wrapper around a kernel's stdin.
#[derive(Debug)]
pub struct KernelWriter<W> {
    session: String,
    stdin: W,
}

impl<W> KernelWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap `stdin` for the named session.
    pub fn new(session: String, stdin: W) -> Self {
        Self { session, stdin }
    }

    /// Write one request line and flush.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ProcessCrashed` if the kernel's stdin is closed.
    pub async fn send(&mut self, request: &KernelRequest) -> Result<()> {
        let mut line = request.encode()?;
        line.push('\n');

        let written = async {
            self.stdin.write_all(line.as_bytes()).await?;
            self.stdin.flush().await
        }
        .await;

        written.map_err(|e| {
            warn!(session = %self.session, error = %e, "kernel writer: write to stdin failed");
            AppError::ProcessCrashed(format!("kernel stdin closed: {e}"))
        })
    }

    /// Close stdin, asking the kernel to exit.
    pub async fn close(mut self) {
        if let Err(e) = self.stdin.shutdown().await {
            warn!(session = %self.session, error = %e, "kernel writer: shutdown failed");
        }
    }
}
