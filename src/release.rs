//! OS release detection and the upgrade to Debian Testing
//!
//! Debian Testing (and sid) ship an `/etc/os-release` without
//! `VERSION_ID`; stable releases carry one. That is the signal used to
//! tell whether the machine already tracks testing.

use crate::atomic::{backup, backup_path, write_atomic};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::system::PackageManager;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Fields of `/etc/os-release` the engine cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub version_id: Option<String>,
    pub codename: Option<String>,
    pub pretty_name: String,
}

impl OsRelease {
    /// Parse `KEY=value` lines, stripping optional quotes
    pub fn parse(text: &str) -> Self {
        let fields: HashMap<&str, String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim(), unquote(v.trim())))
            .collect();

        let get = |k: &str| fields.get(k).filter(|v| !v.is_empty()).cloned();

        Self {
            id: get("ID").unwrap_or_else(|| "linux".to_string()),
            version_id: get("VERSION_ID"),
            codename: get("VERSION_CODENAME"),
            pretty_name: get("PRETTY_NAME").unwrap_or_default(),
        }
    }

    /// Short description for messages
    pub fn describe(&self) -> String {
        if self.pretty_name.is_empty() {
            self.id.clone()
        } else {
            self.pretty_name.clone()
        }
    }
}

fn unquote(v: &str) -> String {
    let v = v
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(v);
    v.to_string()
}

/// Which release the Nova desktop targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTarget {
    pub id: String,
    /// When set, the codename must match exactly
    pub codename: Option<String>,
}

impl ReleaseTarget {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            id: config.release_id.clone(),
            codename: config.release_codename.clone(),
        }
    }

    pub fn matches(&self, release: &OsRelease) -> bool {
        if release.id != self.id {
            return false;
        }
        match &self.codename {
            Some(codename) => release.codename.as_deref() == Some(codename.as_str()),
            None => release.version_id.is_none(),
        }
    }

    pub fn describe(&self) -> String {
        match &self.codename {
            Some(c) => format!("{} {}", self.id, c),
            None => format!("{} testing", self.id),
        }
    }
}

/// One-line-style sources list tracking testing
pub fn render_testing_sources(config: &EngineConfig) -> String {
    let components = config.components.join(" ");
    let mirror = &config.mirror_url;
    let security = &config.security_url;
    format!(
        "# Generated by nova-provision: Debian Testing\n\
         deb {mirror} testing {components}\n\
         deb-src {mirror} testing {components}\n\
         \n\
         deb {security} testing-security {components}\n\
         deb-src {security} testing-security {components}\n\
         \n\
         deb {mirror} testing-updates {components}\n\
         deb-src {mirror} testing-updates {components}\n"
    )
}

/// Suffix of the sources list backup
pub const BACKUP_SUFFIX: &str = ".nova-backup";

/// Point apt at testing and run a full upgrade.
///
/// Irreversible: callers must have an explicit confirmation. The previous
/// sources list is copied to `<sources_list>.nova-backup` before it is
/// atomically replaced. An existing backup is never overwritten, and a list
/// that already points at testing is left alone, so resuming an interrupted
/// upgrade keeps the pre-upgrade copy. Returns the backup path, if any.
pub fn upgrade_to_testing(
    config: &EngineConfig,
    packages: &dyn PackageManager,
) -> Result<Option<PathBuf>> {
    let path = &config.sources_list;
    let rendered = render_testing_sources(config);
    let backup_at = backup_path(path, BACKUP_SUFFIX)?;
    let existing_backup = backup_at.exists().then(|| backup_at.clone());

    let saved = if config.dry_run {
        info!("[dry-run] would rewrite {} for testing", path.display());
        None
    } else if fs::read_to_string(path).is_ok_and(|current| current == rendered) {
        info!("{} already points at testing, resuming the upgrade", path.display());
        existing_backup
    } else {
        let saved = if let Some(kept) = existing_backup {
            warn!(
                "Keeping earlier backup {}; not overwriting it with the current list",
                kept.display()
            );
            Some(kept)
        } else if path.exists() {
            let saved = backup(path, BACKUP_SUFFIX)?;
            info!("Backed up {} to {}", path.display(), saved.display());
            Some(saved)
        } else {
            warn!("{} does not exist; creating it", path.display());
            None
        };
        write_atomic(path, &rendered)?;
        info!("Rewrote {} for Debian Testing", path.display());
        saved
    };

    packages.refresh_index()?;
    info!("Starting full upgrade to testing; this can take a long time");
    packages.full_upgrade()?;
    Ok(saved)
}
