//! Engine configuration
//!
//! Everything the old scripts kept in global variables (log path, mirror,
//! thresholds, colour switches) lives in [`EngineConfig`], which is loaded
//! from an optional JSON file, overridden by CLI flags and handed to the
//! engine at construction. Nothing reads configuration from globals.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::exec::MAX_STEP_BUDGET;
use crate::types::{FailurePolicy, FrontendKind, Question};

/// 5 GiB expressed in KiB
pub const DEFAULT_MIN_FREE_KIB: u64 = 5 * 1024 * 1024;

const MAX_CONNECT_TIMEOUT_SECS: u64 = 10 * 60;

/// Provisioning engine configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // Files
    pub log_file: PathBuf,
    pub lock_file: PathBuf,
    pub grub_defaults: PathBuf,
    pub grub_cfg: PathBuf,
    pub sources_list: PathBuf,
    /// JSON plan replacing the built-in Nova plan
    pub plan_file: Option<PathBuf>,

    // Preflight
    pub min_free_kib: u64,
    pub mirror_host: String,
    pub mirror_port: u16,
    pub connect_timeout_secs: u64,
    pub release_id: String,
    /// Pin a codename instead of accepting any testing/sid snapshot
    pub release_codename: Option<String>,
    /// Release mismatch is fatal unless the upgrade is confirmed
    pub strict_release: bool,

    // Release upgrade sources
    pub mirror_url: String,
    pub security_url: String,
    pub components: Vec<String>,

    // Runner
    pub failure_policy: FailurePolicy,
    pub step_timeout_secs: u64,
    pub dry_run: bool,
    /// ANSI colours in progress output
    pub color: bool,

    // Decisions
    pub frontend: FrontendKind,
    pub answers: BTreeMap<Question, bool>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("/var/log/nova-provision.log"),
            lock_file: PathBuf::from("/run/nova-provision.lock"),
            grub_defaults: PathBuf::from("/etc/default/grub"),
            grub_cfg: PathBuf::from("/boot/grub/grub.cfg"),
            sources_list: PathBuf::from("/etc/apt/sources.list"),
            plan_file: None,
            min_free_kib: DEFAULT_MIN_FREE_KIB,
            mirror_host: "deb.debian.org".to_string(),
            mirror_port: 80,
            connect_timeout_secs: 5,
            release_id: "debian".to_string(),
            release_codename: None,
            strict_release: false,
            mirror_url: "http://deb.debian.org/debian".to_string(),
            security_url: "http://security.debian.org/debian-security".to_string(),
            components: ["main", "contrib", "non-free", "non-free-firmware"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            failure_policy: FailurePolicy::FailFast,
            step_timeout_secs: 30 * 60,
            dry_run: false,
            color: true,
            frontend: FrontendKind::None,
            answers: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file; missing keys take defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.min_free_kib == 0 {
            anyhow::bail!("min_free_kib must be greater than zero");
        }
        if self.mirror_host.trim().is_empty() {
            anyhow::bail!("mirror_host must be specified");
        }
        if self.mirror_port == 0 {
            anyhow::bail!("mirror_port must be a valid TCP port");
        }
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be greater than zero");
        }
        if self.connect_timeout_secs > MAX_CONNECT_TIMEOUT_SECS {
            anyhow::bail!("connect_timeout_secs must be at most {}", MAX_CONNECT_TIMEOUT_SECS);
        }
        if self.step_timeout_secs == 0 {
            anyhow::bail!("step_timeout_secs must be greater than zero");
        }
        if self.step_timeout_secs > MAX_STEP_BUDGET.as_secs() {
            anyhow::bail!(
                "step_timeout_secs must be at most {} (one day)",
                MAX_STEP_BUDGET.as_secs()
            );
        }
        if self.release_id.trim().is_empty() {
            anyhow::bail!("release_id must be specified");
        }
        for url in [&self.mirror_url, &self.security_url] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("Mirror URL must start with http:// or https://: {}", url);
            }
        }
        if self.components.is_empty() {
            anyhow::bail!("At least one archive component is required");
        }
        if self.grub_defaults.as_os_str().is_empty() || self.sources_list.as_os_str().is_empty() {
            anyhow::bail!("grub_defaults and sources_list paths must be set");
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
