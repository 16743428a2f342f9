//! Kernel reader tasks.
//!
//! [`run_reader`] drains a kernel's framed stdout, classifies each line
//! with [`parse_inbound_line`] and forwards it to the session worker.
//! [`run_stderr_reader`] does the same for raw stderr lines. Both tasks end
//! on EOF by dropping their sender, which is how the worker learns that the
//! process went away.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::kernel::codec::{KernelCodec, KernelFrame};
use crate::kernel::protocol::{parse_inbound_line, Inbound};

/// Forward classified stdout lines until EOF, I/O error or cancellation.
///
/// An over-long line is dropped and reported as [`Inbound::Oversized`], so
/// the worker can fail the request it belonged to; reading continues.
pub async fn run_reader<R>(
    session: String,
    mut framed: FramedRead<R, KernelCodec>,
    tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session, "kernel reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session, "kernel reader: EOF detected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session, error = %e, "kernel reader: IO error, stopping");
                        break;
                    }
                    Some(Ok(frame)) => {
                        let inbound = match frame {
                            KernelFrame::Line(line) => match parse_inbound_line(&line) {
                                Some(inbound) => inbound,
                                None => continue,
                            },
                            KernelFrame::Oversized { limit } => {
                                warn!(session, limit, "kernel reader: dropped over-long line");
                                Inbound::Oversized { limit }
                            }
                        };
                        if tx.send(inbound).await.is_err() {
                            debug!(session, "kernel reader: worker gone, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Forward stderr lines until EOF, I/O error or cancellation.
///
/// Lines over `limit` bytes are replaced by a short notice.
pub async fn run_stderr_reader<R>(
    session: String,
    stderr: R,
    limit: usize,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stderr, KernelCodec::with_max_length(limit));

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            item = framed.next() => {
                match item {
                    None => break,
                    Some(Err(e)) => {
                        debug!(session, error = %e, "kernel stderr reader stopped");
                        break;
                    }
                    Some(Ok(frame)) => {
                        let line = match frame {
                            KernelFrame::Line(line) => line,
                            KernelFrame::Oversized { limit } => {
                                format!("[stderr line over {limit} bytes dropped]")
                            }
                        };
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
