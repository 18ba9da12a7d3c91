//! Boot loader, Plymouth and Flatpak command wrappers

use super::{BootTools, Flatpak};
use crate::error::{ProvisionError, Result};
use crate::exec::{CommandSpec, Exec};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Boot loader regeneration and Plymouth theme selection on the host
pub struct HostBootTools<'a> {
    exec: &'a Exec,
    grub_cfg: PathBuf,
}

impl<'a> HostBootTools<'a> {
    pub fn new(exec: &'a Exec, grub_cfg: PathBuf) -> Self {
        Self { exec, grub_cfg }
    }

    fn binary_exists(&self, name: &str) -> bool {
        self.exec
            .run(&CommandSpec::query("which").arg(name))
            .map(|out| out.success)
            .unwrap_or(false)
    }
}

impl BootTools for HostBootTools<'_> {
    fn regenerate_bootloader(&self) -> Result<()> {
        // Debian ships update-grub as a wrapper; fall back to the real tool
        let spec = if self.binary_exists("update-grub") {
            CommandSpec::mutation("update-grub")
        } else if self.binary_exists("grub-mkconfig") {
            CommandSpec::mutation("grub-mkconfig")
                .arg("-o")
                .arg(self.grub_cfg.display().to_string())
        } else {
            return Err(ProvisionError::rewrite(
                self.grub_cfg.clone(),
                "neither update-grub nor grub-mkconfig is installed",
            ));
        };

        self.exec.run_checked(&spec).map_err(|e| {
            ProvisionError::rewrite(self.grub_cfg.clone(), format!("regeneration failed: {e}"))
        })?;
        Ok(())
    }

    fn bootloader_in_sync(&self, cmdline: &str) -> Result<bool> {
        match fs::read_to_string(&self.grub_cfg) {
            Ok(content) => Ok(default_entry_carries(&content, cmdline)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} does not exist yet", self.grub_cfg.display());
                Ok(false)
            }
            Err(e) => Err(ProvisionError::rewrite(
                self.grub_cfg.clone(),
                format!("cannot read: {e}"),
            )),
        }
    }

    fn plymouth_theme(&self) -> Result<Option<String>> {
        if !self.binary_exists("plymouth-set-default-theme") {
            debug!("plymouth-set-default-theme not installed");
            return Ok(None);
        }
        let out = self
            .exec
            .run_checked(&CommandSpec::query("plymouth-set-default-theme"))?;
        let theme = out.stdout.trim();
        Ok((!theme.is_empty()).then(|| theme.to_string()))
    }

    fn set_plymouth_theme(&self, theme: &str) -> Result<()> {
        self.exec.run_checked(
            &CommandSpec::mutation("plymouth-set-default-theme").args(["-R", theme]),
        )?;
        Ok(())
    }
}

/// The first `linux` line of a generated grub.cfg (the default entry)
/// carries every word of `cmdline`
pub fn default_entry_carries(grub_cfg: &str, cmdline: &str) -> bool {
    let Some(entry) = grub_cfg
        .lines()
        .map(str::trim_start)
        .find(|l| l.starts_with("linux ") || l.starts_with("linux\t"))
    else {
        return false;
    };
    let args: Vec<&str> = entry.split_whitespace().collect();
    cmdline.split_whitespace().all(|word| args.contains(&word))
}

/// `flatpak` CLI, system installation
pub struct FlatpakCli<'a> {
    exec: &'a Exec,
}

impl<'a> FlatpakCli<'a> {
    pub fn new(exec: &'a Exec) -> Self {
        Self { exec }
    }
}

impl Flatpak for FlatpakCli<'_> {
    fn remotes(&self) -> Result<Vec<String>> {
        let out = self.exec.run_checked(
            &CommandSpec::query("flatpak").args(["remotes", "--system", "--columns=name"]),
        )?;
        Ok(parse_remote_names(&out.stdout))
    }

    fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.exec.run_checked(
            &CommandSpec::mutation("flatpak").args([
                "remote-add",
                "--system",
                "--if-not-exists",
                name,
                url,
            ]),
        )?;
        Ok(())
    }
}

/// One remote name per line; header-less because of `--columns`
pub fn parse_remote_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.split_whitespace().next().unwrap_or(l).to_string())
        .collect()
}
