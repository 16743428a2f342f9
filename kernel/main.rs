//! `replhost-kernel`: the builtin interpreter kernel.
//!
//! Speaks the kernel protocol on stdin/stdout. Spawned by the daemon for
//! sessions whose kernel kind is `builtin`.

use std::io;

use replhost::kernel::codec::MAX_LINE_BYTES;
use replhost::kernel::spawner::MESSAGE_LIMIT_ENV;

fn main() {
    let limit = std::env::var(MESSAGE_LIMIT_ENV)
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(MAX_LINE_BYTES);
    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    match replhost::interp::serve::serve_with_limit(stdin, stdout, limit) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("replhost-kernel: {err}");
            std::process::exit(1);
        }
    }
}
