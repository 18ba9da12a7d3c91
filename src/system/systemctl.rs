//! systemd service manager via `systemctl`

use super::{ServiceManager, UnitState};
use crate::error::Result;
use crate::exec::{CommandSpec, Exec};

pub struct Systemctl<'a> {
    exec: &'a Exec,
}

impl<'a> Systemctl<'a> {
    pub fn new(exec: &'a Exec) -> Self {
        Self { exec }
    }
}

impl ServiceManager for Systemctl<'_> {
    fn state(&self, unit: &str) -> Result<UnitState> {
        // is-enabled exits non-zero for disabled units too; parse stdout
        let spec = CommandSpec::query("systemctl").args(["is-enabled", unit]);
        let out = self.exec.run(&spec)?;
        let state = parse_is_enabled(&out.stdout, &out.stderr);
        if state == UnitState::Other && !out.success && out.stdout.trim().is_empty() {
            // Nothing on stdout: systemctl itself failed (no bus, bad unit name)
            out.ensure_success(&spec)?;
        }
        Ok(state)
    }

    fn enable(&self, unit: &str) -> Result<()> {
        self.exec
            .run_checked(&CommandSpec::mutation("systemctl").args(["enable", unit]))?;
        Ok(())
    }

    fn disable(&self, unit: &str) -> Result<()> {
        self.exec
            .run_checked(&CommandSpec::mutation("systemctl").args(["disable", unit]))?;
        Ok(())
    }
}

/// Map `systemctl is-enabled` output to a [`UnitState`].
pub fn parse_is_enabled(stdout: &str, stderr: &str) -> UnitState {
    match stdout.trim().lines().next().unwrap_or("").trim() {
        "enabled" | "enabled-runtime" | "alias" => UnitState::Enabled,
        "disabled" => UnitState::Disabled,
        "static" => UnitState::Static,
        "masked" | "masked-runtime" => UnitState::Masked,
        "indirect" => UnitState::Indirect,
        "not-found" => UnitState::NotFound,
        "" if stderr.contains("No such file or directory") || stderr.contains("not found") => {
            UnitState::NotFound
        }
        _ => UnitState::Other,
    }
}
