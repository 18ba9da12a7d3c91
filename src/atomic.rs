//! Crash-safe file replacement
//!
//! Configuration files that a machine needs to boot (`/etc/default/grub`,
//! `/etc/apt/sources.list`) are never written in place: the new content
//! goes to a temporary file in the same directory, is fsynced, and is then
//! renamed over the original. An interruption leaves either the old or the
//! new file, never a truncated one.

use crate::error::{ProvisionError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Atomically replace `path` with `content`, keeping its permissions.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let fail = |reason: String| ProvisionError::rewrite(path, reason);

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| fail(format!("cannot create temp file in {}: {e}", dir.display())))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| fail(format!("write failed: {e}")))?;

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())
            .map_err(|e| fail(format!("cannot copy permissions: {e}")))?;
    }

    tmp.as_file()
        .sync_all()
        .map_err(|e| fail(format!("fsync failed: {e}")))?;
    tmp.persist(path)
        .map_err(|e| fail(format!("rename failed: {}", e.error)))?;

    // Make the rename itself durable
    if let Ok(d) = fs::File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}

/// `path` with `suffix` appended to its file name
pub fn backup_path(path: &Path, suffix: &str) -> Result<PathBuf> {
    let mut name = path
        .file_name()
        .ok_or_else(|| ProvisionError::rewrite(path, "path has no file name"))?
        .to_os_string();
    name.push(suffix);
    Ok(path.with_file_name(name))
}

/// Copy `path` next to itself with `suffix` appended. Returns the backup path.
pub fn backup(path: &Path, suffix: &str) -> Result<PathBuf> {
    let target = backup_path(path, suffix)?;

    fs::copy(path, &target)
        .map_err(|e| ProvisionError::rewrite(path, format!("backup to {} failed: {e}", target.display())))?;
    Ok(target)
}
