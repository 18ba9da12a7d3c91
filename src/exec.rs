//! External command execution
//!
//! Every call out to `apt-get`, `systemctl`, `update-grub` and friends goes
//! through [`Exec::run`], which:
//!
//! - spawns the command in its own process group and registers its PID
//! - spools stdout/stderr into the run's temporary working directory, so a
//!   chatty child can never block on a full pipe while we poll it
//! - enforces the current step's time budget and kills the whole group
//!   when it runs out
//! - skips mutating commands in dry-run mode

use crate::error::{ProvisionError, Result};
use crate::process_guard::{
    CommandProcessGroup, SharedRegistry, TrackedTempDir, send_signal_to_group,
};
use nix::sys::signal::Signal;
use std::cell::Cell;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest time a single step may run
pub const MAX_STEP_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

/// A command line to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Changes system state; skipped under dry-run
    pub mutating: bool,
}

impl CommandSpec {
    /// A read-only query
    pub fn query(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            env: Vec::new(),
            mutating: false,
        }
    }

    /// A command that changes system state
    pub fn mutation(program: &str) -> Self {
        Self {
            mutating: true,
            ..Self::query(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Shell-like rendering for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output from a command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// None if terminated by signal
    pub exit_code: Option<i32>,
    pub success: bool,
    /// The command was not run because of dry-run mode
    pub dry_run: bool,
}

impl CommandOutput {
    /// Turn a non-zero exit into a `StepExecution` error carrying the output.
    pub fn ensure_success(self, spec: &CommandSpec) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ProvisionError::execution(
                spec.display(),
                self.exit_code,
                self.diagnostic(),
            ))
        }
    }

    /// stderr if there is any, otherwise the tail of stdout
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let lines: Vec<&str> = self.stdout.trim().lines().collect();
        let tail = lines.len().saturating_sub(20);
        lines[tail..].join("\n")
    }
}

/// Time budget of the step currently executing.
///
/// Cloned handles share the same deadline: the runner starts and clears
/// it, the executor reads it.
#[derive(Debug, Clone, Default)]
pub struct StepBudget {
    deadline: Rc<Cell<Option<(Instant, Duration)>>>,
}

impl StepBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a budget of `timeout` from now, capped at [`MAX_STEP_BUDGET`]
    pub fn start(&self, timeout: Duration) {
        let timeout = timeout.min(MAX_STEP_BUDGET);
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now);
        self.deadline.set(Some((deadline, timeout)));
    }

    pub fn clear(&self) {
        self.deadline.set(None);
    }

    /// Time left, or None when no budget is running
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .get()
            .map(|(deadline, _)| deadline.saturating_duration_since(Instant::now()))
    }

    fn total(&self) -> Duration {
        self.deadline.get().map(|(_, t)| t).unwrap_or_default()
    }
}

/// Runs external commands for one provisioning run
pub struct Exec {
    registry: SharedRegistry,
    budget: StepBudget,
    workdir: TrackedTempDir,
    dry_run: bool,
    sequence: Cell<u64>,
}

impl Exec {
    /// Create the executor and its temporary working directory.
    ///
    /// The directory is registered with `registry` so an interrupted run
    /// removes it too.
    pub fn new(registry: SharedRegistry, budget: StepBudget, dry_run: bool) -> Result<Self> {
        let workdir = TrackedTempDir::new("nova-provision-", registry.clone())?;
        debug!("Working directory: {}", workdir.path().display());

        Ok(Self {
            registry,
            budget,
            workdir,
            dry_run,
            sequence: Cell::new(0),
        })
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Run a command to completion or until the step budget runs out.
    ///
    /// A non-zero exit is returned as `Ok` with `success == false`; callers
    /// decide with [`CommandOutput::ensure_success`].
    pub fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let shown = spec.display();

        if self.dry_run && spec.mutating {
            info!("[dry-run] would run: {}", shown);
            return Ok(CommandOutput {
                success: true,
                exit_code: Some(0),
                dry_run: true,
                ..Default::default()
            });
        }

        if self.budget.remaining() == Some(Duration::ZERO) {
            return Err(ProvisionError::Timeout {
                command: shown,
                after: self.budget.total(),
            });
        }

        let n = self.sequence.get();
        self.sequence.set(n + 1);
        let out_path = self.workdir.path().join(format!("cmd-{n}.out"));
        let err_path = self.workdir.path().join(format!("cmd-{n}.err"));

        info!("exec: {}", shown);

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(File::create(&out_path)?)
            .stderr(File::create(&err_path)?)
            .in_new_process_group()
            .spawn()
            .map_err(|e| {
                ProvisionError::execution(shown.clone(), None, format!("failed to spawn: {e}"))
            })?;
        let pid = child.id();

        if let Ok(mut guard) = self.registry.lock() {
            guard.register(pid);
        }

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if self.budget.remaining() == Some(Duration::ZERO) {
                break None;
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let status = match status {
            Some(status) => status,
            None => {
                tracing::warn!("{} exceeded its time budget, killing process group {}", shown, pid);
                let _ = send_signal_to_group(pid, Signal::SIGKILL);
                let _ = child.wait();
                self.forget(pid);
                return Err(ProvisionError::Timeout {
                    command: shown,
                    after: self.budget.total(),
                });
            }
        };
        self.forget(pid);

        let stdout = read_spool(&out_path);
        let stderr = read_spool(&err_path);

        debug!("{} exited with {:?}", shown, status.code());

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: status.code(),
            success: status.success(),
            dry_run: false,
        })
    }

    /// Run and require a zero exit
    pub fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.run(spec)?.ensure_success(spec)
    }

    fn forget(&self, pid: u32) {
        if let Ok(mut guard) = self.registry.lock() {
            guard.unregister(pid);
        }
    }
}

fn read_spool(path: &Path) -> String {
    let content = std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    let _ = std::fs::remove_file(path);
    content
}
