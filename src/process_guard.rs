//! Process lifecycle management for child processes
//!
//! Makes sure a provisioning run never leaves an orphaned `apt-get` or a
//! stale working directory behind when it is interrupted.
//!
//! - Children are spawned in their own process group
//! - Child PIDs and temporary directories are tracked in a [`ChildRegistry`]
//! - On SIGINT/SIGTERM/SIGHUP every child group gets SIGTERM, then SIGKILL
//!   after a grace period, and registered directories are removed
//!
//! The registry is shared through an `Arc<Mutex<_>>` handed to the signal
//! thread; there is no process-wide singleton.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Shared handle to a registry
pub type SharedRegistry = Arc<Mutex<ChildRegistry>>;

/// Registry tracking spawned child processes and temporary directories
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    temp_dirs: Vec<PathBuf>,
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Create a registry wrapped for sharing with the signal thread
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Register a new child process
    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::debug!("Registered child process PID {}", pid);
    }

    /// Unregister a child process (called when it exits normally)
    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::debug!("Unregistered child process PID {}", pid);
    }

    /// Track a temporary directory that must not outlive the run
    pub fn register_temp_dir(&mut self, path: &Path) {
        self.temp_dirs.push(path.to_path_buf());
    }

    /// Forget a temporary directory (its owner removed it)
    pub fn unregister_temp_dir(&mut self, path: &Path) {
        self.temp_dirs.retain(|p| p != path);
    }

    /// Number of tracked children
    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Number of tracked temporary directories
    pub fn temp_dir_count(&self) -> usize {
        self.temp_dirs.len()
    }

    /// Terminate children and remove temporary directories.
    ///
    /// Sends SIGTERM to every process group, waits up to `grace_period`,
    /// then SIGKILLs the survivors. Runs at most once.
    pub fn cleanup(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            tracing::debug!("Cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        self.terminate_children(grace_period);

        for dir in self.temp_dirs.drain(..) {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => tracing::info!("Removed working directory {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {}: {}", dir.display(), e),
            }
        }
    }

    fn terminate_children(&mut self, grace_period: Duration) {
        if self.pids.is_empty() {
            tracing::debug!("No child processes to terminate");
            return;
        }

        tracing::info!("Terminating {} child process(es)...", self.pids.len());

        let pids_to_kill: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids_to_kill {
            if let Err(e) = send_signal_to_group(pid, Signal::SIGTERM) {
                tracing::warn!("Failed to send SIGTERM to process group {}: {}", pid, e);
                if let Err(e2) = send_signal(pid, Signal::SIGTERM) {
                    tracing::warn!("Failed to send SIGTERM to PID {}: {}", pid, e2);
                }
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids_to_kill.iter().all(|&pid| !is_process_alive(pid)) {
                tracing::info!("All child processes terminated gracefully");
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in &pids_to_kill {
            if is_process_alive(pid) {
                tracing::warn!("Process group {} did not terminate, sending SIGKILL", pid);
                if let Err(e) = send_signal_to_group(pid, Signal::SIGKILL) {
                    tracing::error!("Failed to send SIGKILL to process group {}: {}", pid, e);
                    let _ = send_signal(pid, Signal::SIGKILL);
                }
            }
        }

        self.pids.clear();
    }
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Negative PID signals the whole group, so apt's own children die too
pub(crate) fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Check if a process is still alive (not dead or zombie)
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/<pid>/stat is the state; Z and X are not running
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
///
/// The handler thread cleans up everything in `registry` and exits with
/// `128 + signal`. Call once, before the first child is spawned.
pub fn init_signal_handlers(registry: SharedRegistry) -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            tracing::warn!("Received {}, cleaning up before exit", signal_name);

            if let Ok(mut registry) = registry.lock() {
                registry.cleanup(Duration::from_secs(3));
            }

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// A temporary directory registered with a [`ChildRegistry`] for as long
/// as it exists, so a signal-triggered cleanup removes it too
pub struct TrackedTempDir {
    dir: TempDir,
    registry: SharedRegistry,
}

impl TrackedTempDir {
    pub fn new(prefix: &str, registry: SharedRegistry) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        if let Ok(mut guard) = registry.lock() {
            guard.register_temp_dir(dir.path());
        }
        Ok(Self { dir, registry })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for TrackedTempDir {
    fn drop(&mut self) {
        // TempDir removes the directory itself
        if let Ok(mut guard) = self.registry.lock() {
            guard.unregister_temp_dir(self.dir.path());
        }
    }
}

/// Extension trait for `std::process::Command` to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of its own process group
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls (setpgid, prctl) run between fork and exec
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                // Child dies with us even if we are SIGKILLed
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}
