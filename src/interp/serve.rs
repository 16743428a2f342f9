//! Stdio loop of the builtin kernel binary.

use std::io::{self, BufRead, Write};

use super::Interpreter;
use crate::kernel::codec::MAX_LINE_BYTES;
use crate::kernel::protocol::{KernelEvent, KernelRequest};

/// Label reported in the builtin kernel's `ready` event.
pub const BUILTIN_KERNEL_LABEL: &str = "builtin";

/// Serve kernel protocol requests with the default line limit.
///
/// # Errors
///
/// Returns an error if reading requests or writing events fails.
pub fn serve<R: BufRead, W: Write>(input: R, output: W) -> io::Result<i32> {
    serve_with_limit(input, output, MAX_LINE_BYTES)
}

/// Serve kernel protocol requests from `input` until EOF or `exit()`.
///
/// Every event line stays under `limit` bytes: result output is clipped
/// with a marker and a snapshot that does not fit is answered with an
/// `error` event. Returns the process exit code the caller should
/// terminate with.
///
/// # Errors
///
/// Returns an error if reading requests or writing events fails.
pub fn serve_with_limit<R: BufRead, W: Write>(input: R, mut output: W, limit: usize) -> io::Result<i32> {
    let mut interp = Interpreter::new();
    emit(
        &mut output,
        &KernelEvent::Ready {
            kernel: BUILTIN_KERNEL_LABEL.to_owned(),
            version: Some(env!("CARGO_PKG_VERSION").to_owned()),
        },
    )?;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<KernelRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                emit(
                    &mut output,
                    &KernelEvent::Error {
                        id: None,
                        message: format!("malformed request: {err}"),
                    },
                )?;
                continue;
            }
        };

        let reply = match request {
            KernelRequest::Exec { id, code } => {
                let outcome = interp.execute(&code);
                if let Some(exit_code) = outcome.exit {
                    output.write_all(clip(&outcome.stdout, limit / 2).as_bytes())?;
                    output.flush()?;
                    return Ok(exit_code);
                }
                bounded_result(id, outcome.ok, &outcome.stdout, &outcome.stderr, limit)
            }
            KernelRequest::Snapshot { id } => match interp.snapshot() {
                Ok(state) => {
                    let event = KernelEvent::Snapshot { id, state };
                    let size = encoded_len(&event);
                    if size < limit {
                        event
                    } else {
                        KernelEvent::Error {
                            id: Some(id),
                            message: format!(
                                "snapshot is {size} bytes, over the {limit} byte message limit"
                            ),
                        }
                    }
                }
                Err(message) => KernelEvent::Error {
                    id: Some(id),
                    message,
                },
            },
            KernelRequest::Restore { id, state } => match interp.restore(&state) {
                Ok(()) => KernelEvent::Restored { id },
                Err(message) => KernelEvent::Error {
                    id: Some(id),
                    message,
                },
            },
        };
        emit(&mut output, &reply)?;
    }

    Ok(0)
}

/// Result event whose encoding fits in `limit`, clipping output as needed.
fn bounded_result(id: u64, ok: bool, stdout: &str, stderr: &str, limit: usize) -> KernelEvent {
    let mut budget = limit / 2;
    loop {
        let event = KernelEvent::Result {
            id,
            ok,
            stdout: clip(stdout, budget),
            stderr: clip(stderr, budget),
        };
        if budget == 0 || encoded_len(&event) < limit {
            return event;
        }
        budget /= 2;
    }
}

/// Keep at most `budget` bytes of `text`, followed by a truncation marker.
fn clip(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_owned();
    }
    let mut end = budget;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut clipped = text[..end].to_owned();
    if !clipped.is_empty() && !clipped.ends_with('\n') {
        clipped.push('\n');
    }
    clipped.push_str(&format!(
        "[... {} bytes of output truncated ...]\n",
        text.len() - end
    ));
    clipped
}

fn encoded_len(event: &KernelEvent) -> usize {
    serde_json::to_vec(event).map_or(usize::MAX, |bytes| bytes.len())
}

fn emit<W: Write>(output: &mut W, event: &KernelEvent) -> io::Result<()> {
    let line = serde_json::to_string(event).map_err(io::Error::other)?;
    writeln!(output, "{line}")?;
    output.flush()
}
