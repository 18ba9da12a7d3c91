//! apt/dpkg backed package manager
//!
//! Only three facts are read from apt: whether a package has an install
//! candidate, whether it is installed, and whether a transaction exited
//! cleanly. Nothing depends on apt's internal state beyond that.

use super::PackageManager;
use crate::error::Result;
use crate::exec::{CommandSpec, Exec};
use tracing::debug;

const DPKG_OPTIONS: [&str; 4] = [
    "-o",
    "Dpkg::Options::=--force-confdef",
    "-o",
    "Dpkg::Options::=--force-confold",
];

/// Debian package manager via `apt-get`, `apt-cache` and `dpkg-query`
pub struct Apt<'a> {
    exec: &'a Exec,
}

impl<'a> Apt<'a> {
    pub fn new(exec: &'a Exec) -> Self {
        Self { exec }
    }

    fn apt_get(args: &[&str]) -> CommandSpec {
        CommandSpec::mutation("apt-get")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .args(args.iter().copied())
    }
}

impl PackageManager for Apt<'_> {
    fn is_known(&self, package: &str) -> Result<bool> {
        let out = self
            .exec
            .run_checked(&CommandSpec::query("apt-cache").args(["policy", package]))?;
        let candidate = parse_policy_candidate(&out.stdout);
        debug!("apt-cache policy {}: candidate={:?}", package, candidate);
        Ok(candidate.is_some())
    }

    fn is_installed(&self, package: &str) -> Result<bool> {
        // Exit status 1 just means dpkg has never heard of the package
        let out = self.exec.run(
            &CommandSpec::query("dpkg-query").args(["-W", "-f=${Status}", package]),
        )?;
        Ok(out.success && is_installed_status(&out.stdout))
    }

    fn install(&self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let spec = Self::apt_get(&["install", "-y"])
            .args(DPKG_OPTIONS)
            .args(packages.iter().cloned());
        self.exec.run_checked(&spec)?;
        Ok(())
    }

    fn refresh_index(&self) -> Result<()> {
        self.exec.run_checked(&Self::apt_get(&["update"]))?;
        Ok(())
    }

    fn full_upgrade(&self) -> Result<()> {
        let spec = Self::apt_get(&["full-upgrade", "-y"]).args(DPKG_OPTIONS);
        self.exec.run_checked(&spec)?;
        Ok(())
    }
}

/// Extract the `Candidate:` version from `apt-cache policy` output.
///
/// Unknown packages produce no output at all; purely virtual packages
/// report `(none)`. Both mean "not installable".
pub fn parse_policy_candidate(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Candidate:"))
        .map(str::trim)
        .find(|version| !version.is_empty() && *version != "(none)")
        .map(str::to_string)
}

/// `dpkg-query -W -f=${Status}` prints "want flag status", e.g.
/// `install ok installed`. Only the last word matters.
pub fn is_installed_status(status: &str) -> bool {
    let fields: Vec<&str> = status.split_whitespace().collect();
    fields.len() == 3 && fields[2] == "installed"
}
