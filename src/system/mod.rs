//! Seams to the host system
//!
//! The engine talks to the package manager, the service manager and the
//! boot/desktop tools only through these traits. [`apt`], [`systemctl`]
//! and [`tools`] are the real implementations; [`crate::sim`] is an
//! in-memory one used by tests and `--simulate`.

pub mod apt;
pub mod systemctl;
pub mod tools;

use crate::error::Result;
use strum::Display;

pub use apt::Apt;
pub use systemctl::Systemctl;
pub use tools::{FlatpakCli, HostBootTools};

/// Package index and installer
pub trait PackageManager {
    /// Is `package` known to the package index (installable)?
    fn is_known(&self, package: &str) -> Result<bool>;

    /// Is `package` currently installed?
    fn is_installed(&self, package: &str) -> Result<bool>;

    /// Install a set of packages in one transaction
    fn install(&self, packages: &[String]) -> Result<()>;

    /// Refresh the package index from the mirrors
    fn refresh_index(&self) -> Result<()>;

    /// Upgrade every installed package, allowing removals
    fn full_upgrade(&self) -> Result<()>;
}

/// Enablement state of a unit as reported by the service manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum UnitState {
    Enabled,
    Disabled,
    /// No install section; cannot be enabled or disabled
    Static,
    Masked,
    /// Pulled in through another unit's `Also=`; never started by itself
    Indirect,
    /// Unit file does not exist
    NotFound,
    /// generated, transient and friends; systemctl cannot change them
    Other,
}

impl UnitState {
    /// The unit will start at boot without us touching it
    pub fn counts_as_enabled(self) -> bool {
        matches!(self, Self::Enabled | Self::Static)
    }

    /// The unit will not start at boot without us touching it
    pub fn counts_as_disabled(self) -> bool {
        matches!(
            self,
            Self::Disabled | Self::Masked | Self::Indirect | Self::NotFound
        )
    }
}

/// Service manager operations
pub trait ServiceManager {
    fn state(&self, unit: &str) -> Result<UnitState>;
    fn enable(&self, unit: &str) -> Result<()>;
    fn disable(&self, unit: &str) -> Result<()>;
}

/// Boot splash and boot loader tools
pub trait BootTools {
    /// Regenerate the boot loader configuration after editing its defaults
    fn regenerate_bootloader(&self) -> Result<()>;

    /// Does the generated boot configuration already boot with `cmdline`?
    ///
    /// False when an earlier regeneration failed after the defaults were
    /// rewritten.
    fn bootloader_in_sync(&self, cmdline: &str) -> Result<bool>;

    /// Currently selected Plymouth theme, if Plymouth is installed
    fn plymouth_theme(&self) -> Result<Option<String>>;

    /// Select a Plymouth theme and rebuild the initramfs
    fn set_plymouth_theme(&self, theme: &str) -> Result<()>;
}

/// Flatpak remote management
pub trait Flatpak {
    fn remotes(&self) -> Result<Vec<String>>;
    fn add_remote(&self, name: &str, url: &str) -> Result<()>;
}

/// Everything a step may touch, bundled for the runner
pub struct SystemHandles<'a> {
    pub packages: &'a dyn PackageManager,
    pub services: &'a dyn ServiceManager,
    pub boot: &'a dyn BootTools,
    pub flatpak: &'a dyn Flatpak,
}
