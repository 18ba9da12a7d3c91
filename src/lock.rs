//! Run lock
//!
//! One provisioning run per machine. An exclusive `flock` on a well-known
//! file is taken before preflight and released when [`RunLock`] drops (or
//! the process dies).

use crate::error::{ProvisionError, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for the duration of a run
#[derive(Debug)]
pub struct RunLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock or fail with `ConcurrentRun` if another run holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => ProvisionError::permission(format!(
                    "cannot open lock file {}: {e}",
                    path.display()
                )),
                _ => ProvisionError::Io(e),
            })?;

        let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => {
                return Err(ProvisionError::ConcurrentRun {
                    lock_path: path.to_path_buf(),
                });
            }
            Err((_, errno)) => return Err(ProvisionError::Io(errno.into())),
        };

        // Informational only; the flock is what excludes
        lock.set_len(0)?;
        writeln!(*lock, "{}", std::process::id())?;

        debug!("Acquired run lock {}", path.display());
        Ok(Self {
            _lock: lock,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
