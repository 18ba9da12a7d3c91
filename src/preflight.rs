//! Pre-flight checks
//!
//! Gates the run before any mutation happens. Checks run in order and the
//! first hard failure stops everything:
//!
//! 1. running as root
//! 2. OS release is Debian Testing (soft unless strict mode)
//! 3. package mirror reachable over TCP
//! 4. at least 5 GiB free on `/`
//!
//! The root filesystem type is recorded as well. A confirmed release
//! upgrade runs only after checks 3 and 4 have passed.

use crate::answers::Decider;
use crate::config::EngineConfig;
use crate::error::{ProvisionError, Result};
use crate::release::{OsRelease, ReleaseTarget, upgrade_to_testing};
use crate::system::PackageManager;
use crate::types::{FilesystemKind, Question};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Facts about the machine, computed once and read-only afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProfile {
    pub is_target_release: bool,
    pub free_space_bytes: u64,
    pub has_network: bool,
    pub filesystem_kind: FilesystemKind,
}

impl std::fmt::Display for SystemProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "target release: {}, free: {} MiB, network: {}, root fs: {}",
            if self.is_target_release { "yes" } else { "no" },
            self.free_space_bytes / (1024 * 1024),
            if self.has_network { "online" } else { "offline" },
            self.filesystem_kind
        )
    }
}

/// Read-only view of the host used by preflight
pub trait SystemProbe {
    fn is_root(&self) -> bool;
    fn os_release(&self) -> Result<String>;
    /// Ok if a TCP connection to `host:port` succeeds within `timeout`
    fn check_reachable(&self, host: &str, port: u16, timeout: Duration) -> std::result::Result<(), String>;
    fn free_space_bytes(&self) -> Result<u64>;
    fn root_filesystem(&self) -> Result<FilesystemKind>;
}

/// The machine we are running on
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalHost;

impl SystemProbe for LocalHost {
    fn is_root(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn os_release(&self) -> Result<String> {
        let primary = Path::new("/etc/os-release");
        let path = if primary.exists() {
            primary
        } else {
            Path::new("/usr/lib/os-release")
        };
        Ok(std::fs::read_to_string(path)?)
    }

    /// TCP instead of ICMP: ping is often filtered and needs a subprocess
    fn check_reachable(&self, host: &str, port: u16, timeout: Duration) -> std::result::Result<(), String> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|e| format!("DNS resolution failed: {e}"))?
            .collect();

        let mut last_err = format!("{host} resolved to no addresses");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => {
                    debug!("Connected to {} ({})", host, addr);
                    return Ok(());
                }
                Err(e) => last_err = format!("{addr}: {e}"),
            }
        }
        Err(last_err)
    }

    fn free_space_bytes(&self) -> Result<u64> {
        let stat = nix::sys::statvfs::statvfs("/").map_err(std::io::Error::from)?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }

    fn root_filesystem(&self) -> Result<FilesystemKind> {
        let mounts = std::fs::read_to_string("/proc/self/mounts")?;
        Ok(parse_root_fstype(&mounts)
            .map(FilesystemKind::from_fstype)
            .unwrap_or_default())
    }
}

/// Filesystem type of the last mount on `/` in `/proc/mounts` format.
///
/// The last entry wins because later mounts shadow earlier ones
/// (initramfs rootfs, then the real root).
pub fn parse_root_fstype(mounts: &str) -> Option<&str> {
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mountpoint = fields.next()?;
            let fstype = fields.next()?;
            (mountpoint == "/").then_some(fstype)
        })
        .last()
}

/// Check 4 in isolation: `free_bytes` must cover `min_free_kib`.
pub fn check_free_space(free_bytes: u64, min_free_kib: u64) -> Result<()> {
    let available_kib = free_bytes / 1024;
    if available_kib < min_free_kib {
        return Err(ProvisionError::InsufficientSpace {
            available_kib,
            required_kib: min_free_kib,
        });
    }
    Ok(())
}

/// Runs the checks against a probe
pub struct Preflight<'a> {
    config: &'a EngineConfig,
    probe: &'a dyn SystemProbe,
}

impl<'a> Preflight<'a> {
    pub fn new(config: &'a EngineConfig, probe: &'a dyn SystemProbe) -> Self {
        Self { config, probe }
    }

    /// Run every check and return the system profile.
    ///
    /// `decider` answers the upgrade question in strict mode; `packages`
    /// performs the upgrade when it is confirmed.
    pub fn run(&self, decider: &mut Decider, packages: &dyn PackageManager) -> Result<SystemProfile> {
        info!("Running pre-flight checks...");

        // 1. Privilege
        if !self.probe.is_root() {
            return Err(ProvisionError::permission(
                "nova-provision must run as root (try: sudo nova-provision run)",
            ));
        }
        debug!("Privilege check passed");

        // 2. Release
        let release = OsRelease::parse(&self.probe.os_release()?);
        let target = ReleaseTarget::from_config(self.config);
        let mut is_target_release = target.matches(&release);
        let mut upgrade_confirmed = false;

        if is_target_release {
            info!("Release check passed: {}", release.describe());
        } else if self.config.strict_release {
            warn!(
                "Release mismatch: running {}, expected {}",
                release.describe(),
                target.describe()
            );
            if !decider.decide(Question::UpgradeToTesting) {
                return Err(ProvisionError::ReleaseMismatch {
                    expected: target.describe(),
                    found: release.describe(),
                });
            }
            upgrade_confirmed = true;
        } else {
            warn!(
                "Running {} instead of {}; continuing (strict mode off)",
                release.describe(),
                target.describe()
            );
        }

        // 3. Connectivity
        let host = &self.config.mirror_host;
        let port = self.config.mirror_port;
        self.probe
            .check_reachable(host, port, self.config.connect_timeout())
            .map_err(|detail| ProvisionError::Connectivity {
                host: format!("{host}:{port}"),
                detail,
            })?;
        info!("Network check passed: {}:{} reachable", host, port);

        // 4. Disk space
        let free_space_bytes = self.probe.free_space_bytes()?;
        check_free_space(free_space_bytes, self.config.min_free_kib)?;
        info!("Disk space check passed: {} KiB free", free_space_bytes / 1024);

        let filesystem_kind = self.probe.root_filesystem().unwrap_or_else(|e| {
            warn!("Could not determine root filesystem: {}", e);
            FilesystemKind::Other
        });

        if upgrade_confirmed {
            upgrade_to_testing(self.config, packages)?;
            is_target_release = true;
        }

        let profile = SystemProfile {
            is_target_release,
            free_space_bytes,
            has_network: true,
            filesystem_kind,
        };
        info!("Pre-flight checks passed: {}", profile);
        Ok(profile)
    }
}
