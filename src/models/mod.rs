//! Domain model module declarations.

use std::sync::OnceLock;

use regex::Regex;

use crate::{AppError, Result};

pub mod checkpoint;
pub mod command;
pub mod output;
pub mod session;

/// Session and checkpoint names double as directory and file names.
const NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$";

fn name_regex() -> Option<&'static Regex> {
    static NAME_RE: OnceLock<Option<Regex>> = OnceLock::new();
    NAME_RE.get_or_init(|| Regex::new(NAME_PATTERN).ok()).as_ref()
}

/// Validate a session or checkpoint name.
///
/// Names must start with an ASCII alphanumeric character, contain only
/// alphanumerics, `_`, `.` or `-`, and be at most 64 characters long.
///
/// # Errors
///
/// Returns `AppError::InvalidName` if the name does not match.
pub fn validate_name(name: &str) -> Result<()> {
    if name_regex().is_some_and(|re| re.is_match(name)) {
        Ok(())
    } else {
        Err(AppError::InvalidName(format!(
            "'{name}' must match {NAME_PATTERN}"
        )))
    }
}
