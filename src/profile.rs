//! The Nova desktop
//!
//! Package lists are kept in Rust so typos show up in tests, and are fed to
//! the runner as the default [`Plan`]. A JSON plan file replaces all of it.
//!
//! | # | Step                    | Optional | Asks                   |
//! |---|-------------------------|----------|------------------------|
//! | 1 | Refresh package index   |          |                        |
//! | 2 | GNOME desktop           |          |                        |
//! | 3 | Audio stack             |          |                        |
//! | 4 | Flatpak and Flathub     | yes      |                        |
//! | 5 | Firmware                |          |                        |
//! | 6 | Connectivity            |          |                        |
//! | 7 | Android and iOS tools   | yes      | install_mobile_support |
//! | 8 | Boot splash             |          |                        |
//! | 9 | Developer tools         |          | install_dev_tools      |
//! | 10| System services         |          |                        |

use crate::plan::{Plan, StepAction, StepDef};
use crate::prober::PackageRequest;
use crate::types::Question;

/// GNOME shell, display manager and core apps.
pub const DESKTOP: &[&str] = &[
    "gnome-core",
    "gdm3",
    "gnome-tweaks",
    "gnome-shell-extension-manager",
    "nautilus",
    "gnome-terminal",
    "firefox-esr",
    "fonts-noto",
    "fonts-noto-color-emoji",
];

pub const AUDIO: &[&str] = &[
    "pipewire",
    "pipewire-pulse",
    "pipewire-alsa",
    "wireplumber",
    "pavucontrol",
];

pub const FIRMWARE: &[&str] = &["firmware-linux", "fwupd"];

/// Not every machine needs them; missing ones are skipped.
pub const FIRMWARE_OPTIONAL: &[&str] = &["firmware-misc-nonfree", "firmware-iwlwifi"];

pub const CONNECTIVITY: &[&str] = &["network-manager", "network-manager-gnome", "bluez"];

pub const IOS: &[&str] = &["libimobiledevice-utils", "ifuse", "usbmuxd"];

pub const BOOT_SPLASH: &[&str] = &["plymouth", "plymouth-themes"];

pub const DEV_TOOLS: &[&str] = &[
    "build-essential",
    "git",
    "curl",
    "vim",
    "python3-pip",
    "pkg-config",
];

pub const FLATHUB_NAME: &str = "flathub";
pub const FLATHUB_URL: &str = "https://dl.flathub.org/repo/flathub.flatpakrepo";

pub const PLYMOUTH_THEME: &str = "spinner";
pub const KERNEL_CMDLINE: &str = "quiet splash";

/// Started at boot
pub const ENABLED_UNITS: &[&str] = &["gdm.service", "NetworkManager.service", "bluetooth.service"];

/// Adds tens of seconds to boot on desktops
pub const DISABLED_UNITS: &[&str] = &["NetworkManager-wait-online.service"];

fn packages(names: &[&str]) -> Vec<PackageRequest> {
    names.iter().map(|n| PackageRequest::package(n)).collect()
}

fn units(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// The built-in Nova plan
pub fn nova_plan() -> Plan {
    let mut firmware = packages(FIRMWARE);
    firmware.extend(
        FIRMWARE_OPTIONAL
            .iter()
            .map(|n| PackageRequest::package(n).optional()),
    );

    // adb and fastboot were renamed in Debian; keep the old names first for
    // snapshots that still carry them
    let mut mobile = vec![
        PackageRequest::any_of("adb", &["android-tools-adb", "adb"]),
        PackageRequest::any_of("fastboot", &["android-tools-fastboot", "fastboot"]),
    ];
    mobile.extend(packages(IOS));

    Plan::new(vec![
        StepDef::new("Refresh package index", StepAction::RefreshIndex),
        StepDef::new(
            "GNOME desktop",
            StepAction::InstallPackages {
                packages: packages(DESKTOP),
            },
        ),
        StepDef::new(
            "Audio stack",
            StepAction::InstallPackages {
                packages: packages(AUDIO),
            },
        ),
        StepDef::new(
            "Flatpak",
            StepAction::InstallPackages {
                packages: packages(&["flatpak", "gnome-software-plugin-flatpak"]),
            },
        )
        .optional(),
        StepDef::new(
            "Flathub remote",
            StepAction::FlatpakRemote {
                name: FLATHUB_NAME.to_string(),
                url: FLATHUB_URL.to_string(),
            },
        )
        .optional(),
        StepDef::new(
            "Firmware",
            StepAction::InstallPackages { packages: firmware },
        ),
        StepDef::new(
            "Connectivity",
            StepAction::InstallPackages {
                packages: packages(CONNECTIVITY),
            },
        ),
        StepDef::new(
            "Android and iOS tools",
            StepAction::InstallPackages { packages: mobile },
        )
        .optional()
        .gated_by(Question::InstallMobileSupport),
        StepDef::new(
            "Boot splash packages",
            StepAction::InstallPackages {
                packages: packages(BOOT_SPLASH),
            },
        ),
        StepDef::new(
            "Boot splash theme",
            StepAction::PlymouthTheme {
                theme: PLYMOUTH_THEME.to_string(),
            },
        ),
        StepDef::new(
            "Kernel command line",
            StepAction::BootCmdline {
                value: KERNEL_CMDLINE.to_string(),
            },
        ),
        StepDef::new(
            "Developer tools",
            StepAction::InstallPackages {
                packages: packages(DEV_TOOLS),
            },
        )
        .gated_by(Question::InstallDevTools),
        StepDef::new(
            "Enable services",
            StepAction::EnableUnits {
                units: units(ENABLED_UNITS),
            },
        ),
        StepDef::new(
            "Disable boot delays",
            StepAction::DisableUnits {
                units: units(DISABLED_UNITS),
            },
        ),
    ])
}
