//! Type-safe enums shared across the engine
//!
//! Stringly-typed script flags become proper Rust enums so that config
//! files and CLI flags are validated once, at parse time.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[strum(serialize = "success")]
    Success,
    #[strum(serialize = "skipped")]
    Skipped,
    #[strum(serialize = "failed")]
    Failed,
}

/// What the runner does after a required step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort the remaining steps
    #[default]
    #[strum(serialize = "fail-fast")]
    FailFast,
    /// Record the failure and keep going
    #[strum(serialize = "continue-on-error")]
    ContinueOnError,
}

/// Filesystem type mounted on `/`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FilesystemKind {
    Ext4,
    Btrfs,
    Xfs,
    F2fs,
    #[default]
    Other,
}

impl FilesystemKind {
    /// Map a `/proc/mounts` fstype column to a kind.
    pub fn from_fstype(fstype: &str) -> Self {
        fstype.parse().unwrap_or(Self::Other)
    }
}

/// Yes/No questions the engine may need answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Question {
    InstallDevTools,
    InstallMobileSupport,
    UpgradeToTesting,
}

impl Question {
    /// Answer used when nobody is there to ask.
    ///
    /// | Question               | Default |
    /// |------------------------|---------|
    /// | install_dev_tools      | no      |
    /// | install_mobile_support | yes     |
    /// | upgrade_to_testing     | no      |
    pub const fn unattended_default(self) -> bool {
        match self {
            Self::InstallDevTools => false,
            Self::InstallMobileSupport => true,
            // Irreversible, so it must be confirmed explicitly
            Self::UpgradeToTesting => false,
        }
    }

    /// Prompt text shown by interactive front ends
    pub const fn prompt(self) -> &'static str {
        match self {
            Self::InstallDevTools => "Install developer tools?",
            Self::InstallMobileSupport => "Install Android and iOS connectivity tools?",
            Self::UpgradeToTesting => {
                "This system is not on Debian Testing. Rewrite the package sources and upgrade to testing now?"
            }
        }
    }
}

/// Interactive front end selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FrontendKind {
    /// Unattended: every open question gets its default
    #[default]
    None,
    /// y/N prompts on the controlling terminal
    Terminal,
    /// zenity dialogs
    Zenity,
}

/// Binary toggle for CLI answer flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Toggle {
    Yes,
    No,
}

impl From<Toggle> for bool {
    fn from(t: Toggle) -> bool {
        matches!(t, Toggle::Yes)
    }
}
