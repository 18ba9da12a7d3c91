//! Boot loader defaults rewriting
//!
//! `/etc/default/grub` is a shell-style `KEY=value` file. The boot splash
//! step needs exactly one `GRUB_CMDLINE_LINUX_DEFAULT` line carrying the
//! requested kernel command line: replace the first one, drop duplicates,
//! append if absent. The file is only written when something changes, and
//! it is written atomically.

use crate::atomic::write_atomic;
use crate::error::{ProvisionError, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// Kernel command line key used for normal (non-recovery) boots
pub const CMDLINE_KEY: &str = "GRUB_CMDLINE_LINUX_DEFAULT";

/// Result of a rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    Changed,
    Unchanged,
}

fn is_assignment(line: &str, key: &str) -> bool {
    line.trim_start()
        .strip_prefix(key)
        .is_some_and(|rest| rest.starts_with('='))
}

/// Set `key="value"` in shell-style `content`.
///
/// Commented lines are left alone. Returns the new content; it equals the
/// input when the key already carries exactly this value once.
pub fn set_key(content: &str, key: &str, value: &str) -> Result<String> {
    if value.contains('"') || value.contains('\n') {
        return Err(ProvisionError::config(format!(
            "value for {key} cannot contain quotes or newlines: {value:?}"
        )));
    }

    let wanted = format!("{key}=\"{value}\"");
    let mut out: Vec<String> = Vec::new();
    let mut seen = false;

    for line in content.lines() {
        if is_assignment(line, key) {
            if !seen {
                out.push(wanted.clone());
                seen = true;
            }
        } else {
            out.push(line.to_string());
        }
    }

    if !seen {
        out.push(wanted);
    }

    let mut result = out.join("\n");
    result.push('\n');
    Ok(result)
}

/// Number of live assignments of `key` in `content`
pub fn count_key(content: &str, key: &str) -> usize {
    content.lines().filter(|l| is_assignment(l, key)).count()
}

/// Ensure `path` sets [`CMDLINE_KEY`] to `value`.
///
/// Unchanged files are not touched. Changed files are replaced atomically
/// and re-read to confirm a single assignment survived.
pub fn set_cmdline_default(path: &Path, value: &str) -> Result<Rewrite> {
    let current = fs::read_to_string(path)
        .map_err(|e| ProvisionError::rewrite(path, format!("cannot read: {e}")))?;

    let updated = set_key(&current, CMDLINE_KEY, value)?;
    if updated == current {
        return Ok(Rewrite::Unchanged);
    }

    write_atomic(path, &updated)?;

    let written = fs::read_to_string(path)
        .map_err(|e| ProvisionError::rewrite(path, format!("cannot re-read: {e}")))?;
    if count_key(&written, CMDLINE_KEY) != 1 {
        return Err(ProvisionError::rewrite(
            path,
            format!("{CMDLINE_KEY} is not set exactly once after rewrite"),
        ));
    }

    info!("Set {}=\"{}\" in {}", CMDLINE_KEY, value, path.display());
    Ok(Rewrite::Changed)
}
