//! Simulated host
//!
//! An in-memory package index, dpkg database, unit table, boot loader and
//! Flatpak remote list. It implements every system trait so the whole
//! engine can run without root, apt or systemd: the integration tests use
//! it directly and `nova-provision run --simulate` uses it to preview a plan.
//!
//! Failures and timeouts can be scripted per package.

use crate::error::{ProvisionError, Result};
use crate::plan::{Plan, StepAction};
use crate::preflight::SystemProbe;
use crate::system::{BootTools, Flatpak, PackageManager, ServiceManager, UnitState};
use crate::types::FilesystemKind;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

#[derive(Debug, Default)]
struct SimState {
    available: BTreeSet<String>,
    installed: BTreeSet<String>,
    units: BTreeMap<String, UnitState>,
    plymouth_theme: Option<String>,
    remotes: Vec<String>,
    failing: BTreeSet<String>,
    timeouts: HashMap<String, u32>,
    service_manager_down: bool,

    probe_log: Vec<String>,
    install_calls: Vec<Vec<String>>,
    enable_calls: Vec<String>,
    disable_calls: Vec<String>,
    regenerations: usize,
    failing_regenerations: u32,
    bootloader_stale: bool,
    theme_changes: usize,
    remote_adds: usize,
    index_refreshes: usize,
    full_upgrades: usize,
}

/// In-memory implementation of every system seam
#[derive(Debug, Default)]
pub struct SimSystem {
    state: RefCell<SimState>,
}

impl SimSystem {
    /// Empty index, nothing installed
    pub fn new() -> Self {
        Self::default()
    }

    /// A Debian Testing snapshot able to run `plan`.
    ///
    /// Every candidate of every request is available except the
    /// `android-tools-*` transitional names, which testing dropped. Every
    /// unit the plan touches exists and is disabled.
    pub fn debian_testing(plan: &Plan) -> Self {
        let sim = Self::new();
        {
            let mut state = sim.state.borrow_mut();
            for step in &plan.steps {
                match &step.action {
                    StepAction::InstallPackages { packages } => {
                        for req in packages {
                            for c in &req.candidates {
                                if !c.starts_with("android-tools-") {
                                    state.available.insert(c.clone());
                                }
                            }
                        }
                    }
                    StepAction::PlymouthTheme { .. } => {
                        state.available.insert("plymouth".to_string());
                    }
                    StepAction::EnableUnits { units } | StepAction::DisableUnits { units } => {
                        for unit in units {
                            state.units.insert(unit.clone(), UnitState::Disabled);
                        }
                    }
                    _ => {}
                }
            }
        }
        sim
    }

    pub fn with_available(self, packages: &[&str]) -> Self {
        self.state
            .borrow_mut()
            .available
            .extend(packages.iter().map(|p| p.to_string()));
        self
    }

    /// Installed packages are also available
    pub fn with_installed(self, packages: &[&str]) -> Self {
        {
            let mut state = self.state.borrow_mut();
            for p in packages {
                state.available.insert(p.to_string());
                state.installed.insert(p.to_string());
            }
        }
        self
    }

    pub fn with_unit(self, unit: &str, unit_state: UnitState) -> Self {
        self.state
            .borrow_mut()
            .units
            .insert(unit.to_string(), unit_state);
        self
    }

    pub fn with_plymouth_theme(self, theme: &str) -> Self {
        self.state.borrow_mut().plymouth_theme = Some(theme.to_string());
        self
    }

    pub fn with_remote(self, name: &str) -> Self {
        self.state.borrow_mut().remotes.push(name.to_string());
        self
    }

    /// Any transaction containing `package` exits non-zero
    pub fn failing_install(self, package: &str) -> Self {
        self.state.borrow_mut().failing.insert(package.to_string());
        self
    }

    /// The next `times` transactions containing `package` time out
    pub fn timing_out_install(self, package: &str, times: u32) -> Self {
        self.state
            .borrow_mut()
            .timeouts
            .insert(package.to_string(), times);
        self
    }

    /// The next `times` boot loader regenerations exit non-zero
    pub fn failing_regeneration(self, times: u32) -> Self {
        self.state.borrow_mut().failing_regenerations = times;
        self
    }

    /// Every service manager call fails as if D-Bus were unreachable
    pub fn with_service_manager_down(self) -> Self {
        self.state.borrow_mut().service_manager_down = true;
        self
    }

    pub fn has_installed(&self, package: &str) -> bool {
        self.state.borrow().installed.contains(package)
    }

    pub fn unit_state(&self, unit: &str) -> UnitState {
        self.state
            .borrow()
            .units
            .get(unit)
            .copied()
            .unwrap_or(UnitState::NotFound)
    }

    /// Candidates queried through `is_known`, in order
    pub fn probe_log(&self) -> Vec<String> {
        self.state.borrow().probe_log.clone()
    }

    pub fn install_calls(&self) -> Vec<Vec<String>> {
        self.state.borrow().install_calls.clone()
    }

    pub fn enable_calls(&self) -> Vec<String> {
        self.state.borrow().enable_calls.clone()
    }

    pub fn disable_calls(&self) -> Vec<String> {
        self.state.borrow().disable_calls.clone()
    }

    pub fn regenerations(&self) -> usize {
        self.state.borrow().regenerations
    }

    pub fn full_upgrades(&self) -> usize {
        self.state.borrow().full_upgrades
    }

    pub fn index_refreshes(&self) -> usize {
        self.state.borrow().index_refreshes
    }

    /// Total number of state-changing calls of any kind
    pub fn mutation_count(&self) -> usize {
        let s = self.state.borrow();
        s.install_calls.len()
            + s.enable_calls.len()
            + s.disable_calls.len()
            + s.regenerations
            + s.theme_changes
            + s.remote_adds
            + s.full_upgrades
    }

    fn service_manager(&self, op: &str, unit: &str) -> Result<()> {
        if self.state.borrow().service_manager_down {
            return Err(ProvisionError::execution(
                format!("systemctl {op} {unit}"),
                Some(1),
                "Failed to connect to bus: No such file or directory",
            ));
        }
        Ok(())
    }
}

impl PackageManager for SimSystem {
    fn is_known(&self, package: &str) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        state.probe_log.push(package.to_string());
        Ok(state.available.contains(package))
    }

    fn is_installed(&self, package: &str) -> Result<bool> {
        Ok(self.state.borrow().installed.contains(package))
    }

    fn install(&self, packages: &[String]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let command = format!("apt-get install -y {}", packages.join(" "));

        for p in packages {
            if let Some(left) = state.timeouts.get_mut(p) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ProvisionError::Timeout {
                        command,
                        after: Duration::from_secs(1800),
                    });
                }
            }
        }

        state.install_calls.push(packages.to_vec());

        if let Some(p) = packages.iter().find(|p| !state.available.contains(*p)) {
            return Err(ProvisionError::execution(
                command,
                Some(100),
                format!("E: Unable to locate package {p}"),
            ));
        }
        if let Some(p) = packages.iter().find(|p| state.failing.contains(*p)) {
            return Err(ProvisionError::execution(
                command,
                Some(100),
                format!("E: Sub-process /usr/bin/dpkg returned an error code (1) while configuring {p}"),
            ));
        }

        state.installed.extend(packages.iter().cloned());
        Ok(())
    }

    fn refresh_index(&self) -> Result<()> {
        self.state.borrow_mut().index_refreshes += 1;
        Ok(())
    }

    fn full_upgrade(&self) -> Result<()> {
        self.state.borrow_mut().full_upgrades += 1;
        Ok(())
    }
}

impl ServiceManager for SimSystem {
    fn state(&self, unit: &str) -> Result<UnitState> {
        self.service_manager("is-enabled", unit)?;
        Ok(self.unit_state(unit))
    }

    fn enable(&self, unit: &str) -> Result<()> {
        self.service_manager("enable", unit)?;
        let mut state = self.state.borrow_mut();
        match state.units.get(unit).copied() {
            None => Err(ProvisionError::execution(
                format!("systemctl enable {unit}"),
                Some(1),
                format!("Failed to enable unit: Unit file {unit} does not exist."),
            )),
            Some(UnitState::Masked) => Err(ProvisionError::execution(
                format!("systemctl enable {unit}"),
                Some(1),
                format!("Failed to enable unit: Unit file {unit} is masked."),
            )),
            Some(_) => {
                state.enable_calls.push(unit.to_string());
                state.units.insert(unit.to_string(), UnitState::Enabled);
                Ok(())
            }
        }
    }

    fn disable(&self, unit: &str) -> Result<()> {
        self.service_manager("disable", unit)?;
        let mut state = self.state.borrow_mut();
        state.disable_calls.push(unit.to_string());
        if let Some(s) = state.units.get_mut(unit) {
            if *s == UnitState::Enabled {
                *s = UnitState::Disabled;
            }
        }
        Ok(())
    }
}

impl BootTools for SimSystem {
    fn regenerate_bootloader(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.failing_regenerations > 0 {
            state.failing_regenerations -= 1;
            // Only ever called after the defaults changed
            state.bootloader_stale = true;
            return Err(ProvisionError::rewrite(
                "/boot/grub/grub.cfg",
                "regeneration failed: update-grub exited with status 1",
            ));
        }
        state.bootloader_stale = false;
        state.regenerations += 1;
        Ok(())
    }

    fn bootloader_in_sync(&self, _cmdline: &str) -> Result<bool> {
        Ok(!self.state.borrow().bootloader_stale)
    }

    fn plymouth_theme(&self) -> Result<Option<String>> {
        let state = self.state.borrow();
        if !state.installed.contains("plymouth") {
            return Ok(None);
        }
        Ok(Some(
            state
                .plymouth_theme
                .clone()
                .unwrap_or_else(|| "emerald".to_string()),
        ))
    }

    fn set_plymouth_theme(&self, theme: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.installed.contains("plymouth") {
            return Err(ProvisionError::execution(
                format!("plymouth-set-default-theme -R {theme}"),
                None,
                "failed to spawn: No such file or directory",
            ));
        }
        state.plymouth_theme = Some(theme.to_string());
        state.theme_changes += 1;
        Ok(())
    }
}

impl Flatpak for SimSystem {
    fn remotes(&self) -> Result<Vec<String>> {
        let state = self.state.borrow();
        if !state.installed.contains("flatpak") {
            return Err(ProvisionError::execution(
                "flatpak remotes --system --columns=name",
                None,
                "failed to spawn: No such file or directory",
            ));
        }
        Ok(state.remotes.clone())
    }

    fn add_remote(&self, name: &str, _url: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.remotes.iter().any(|r| r == name) {
            state.remotes.push(name.to_string());
        }
        state.remote_adds += 1;
        Ok(())
    }
}

/// Scripted answers for preflight checks
#[derive(Debug, Clone)]
pub struct SimHost {
    pub root: bool,
    pub os_release: String,
    pub reachable: bool,
    pub free_kib: u64,
    pub filesystem: FilesystemKind,
}

impl Default for SimHost {
    /// A healthy Debian Testing box running as root
    fn default() -> Self {
        Self {
            root: true,
            os_release: TESTING_OS_RELEASE.to_string(),
            reachable: true,
            free_kib: 20 * 1024 * 1024,
            filesystem: FilesystemKind::Ext4,
        }
    }
}

/// `/etc/os-release` of Debian Testing (no VERSION_ID)
pub const TESTING_OS_RELEASE: &str = r#"PRETTY_NAME="Debian GNU/Linux forky/sid"
NAME="Debian GNU/Linux"
VERSION_CODENAME=forky
ID=debian
HOME_URL="https://www.debian.org/"
"#;

/// `/etc/default/grub` as a fresh Debian install ships it
pub const STOCK_GRUB_DEFAULTS: &str = r#"GRUB_DEFAULT=0
GRUB_TIMEOUT=5
GRUB_DISTRIBUTOR=`( . /etc/os-release; echo ${NAME:-Debian} ) 2>/dev/null || echo Debian`
GRUB_CMDLINE_LINUX_DEFAULT="quiet"
GRUB_CMDLINE_LINUX=""
"#;

/// `/etc/os-release` of Debian 12 stable
pub const BOOKWORM_OS_RELEASE: &str = r#"PRETTY_NAME="Debian GNU/Linux 12 (bookworm)"
NAME="Debian GNU/Linux"
VERSION_ID="12"
VERSION="12 (bookworm)"
VERSION_CODENAME=bookworm
ID=debian
"#;

impl SystemProbe for SimHost {
    fn is_root(&self) -> bool {
        self.root
    }

    fn os_release(&self) -> Result<String> {
        Ok(self.os_release.clone())
    }

    fn check_reachable(&self, host: &str, port: u16, _timeout: Duration) -> std::result::Result<(), String> {
        if self.reachable {
            Ok(())
        } else {
            Err(format!("connect to {host}:{port} timed out"))
        }
    }

    fn free_space_bytes(&self) -> Result<u64> {
        Ok(self.free_kib * 1024)
    }

    fn root_filesystem(&self) -> Result<FilesystemKind> {
        Ok(self.filesystem)
    }
}
