//! Error handling module for nova-provision
//!
//! Provides the engine's error type using thiserror. Every failure the
//! engine can surface maps to exactly one variant, so callers can decide
//! whether it is fatal (preflight), downgradable (optional step) or
//! retryable (timeout).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the provisioning engine
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Not running with administrative privilege
    #[error("Permission error: {0}")]
    Permission(String),

    /// Package mirror unreachable
    #[error("Connectivity error: cannot reach {host}: {detail}")]
    Connectivity { host: String, detail: String },

    /// Root filesystem below the free space threshold
    #[error(
        "Insufficient space: {available_kib} KiB available on /, {required_kib} KiB required"
    )]
    InsufficientSpace { available_kib: u64, required_kib: u64 },

    /// OS release does not match and the upgrade was not confirmed
    #[error("Release mismatch: expected {expected}, found {found}")]
    ReleaseMismatch { expected: String, found: String },

    /// None of the candidate packages exist in the package index
    #[error("No candidate available for {capability} (tried: {})", candidates.join(", "))]
    NoCandidateAvailable {
        capability: String,
        candidates: Vec<String>,
    },

    /// Package or service manager command failed
    #[error("Command `{command}` failed (exit code {}): {output}", exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    StepExecution {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// Command exceeded the step time budget
    #[error("Command `{command}` timed out after {}s", after.as_secs())]
    Timeout { command: String, after: Duration },

    /// Another provisioning run holds the lock
    #[error("Another provisioning run is active (lock held: {})", lock_path.display())]
    ConcurrentRun { lock_path: PathBuf },

    /// Configuration file rewrite failed or left inconsistent
    #[error("Failed to rewrite {}: {reason}", path.display())]
    ConfigRewrite { path: PathBuf, reason: String },

    /// Engine or plan configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Create a permission error
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a command failure with captured output
    pub fn execution(command: impl Into<String>, exit_code: Option<i32>, output: impl Into<String>) -> Self {
        Self::StepExecution {
            command: command.into(),
            exit_code,
            output: output.into(),
        }
    }

    /// Create a config rewrite error
    pub fn rewrite(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigRewrite {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Timeouts are the only failures the runner retries.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Errors raised by preflight checks.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::Permission(_)
                | Self::Connectivity { .. }
                | Self::InsufficientSpace { .. }
                | Self::ReleaseMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProvisionError::permission("must run as root");
        assert_eq!(err.to_string(), "Permission error: must run as root");

        let err = ProvisionError::InsufficientSpace {
            available_kib: 10,
            required_kib: 20,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient space: 10 KiB available on /, 20 KiB required"
        );
    }

    #[test]
    fn test_no_candidate_lists_candidates() {
        let err = ProvisionError::NoCandidateAvailable {
            capability: "ADB tool".to_string(),
            candidates: vec!["android-tools-adb".to_string(), "adb".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "No candidate available for ADB tool (tried: android-tools-adb, adb)"
        );
    }

    #[test]
    fn test_execution_error_without_exit_code() {
        let err = ProvisionError::execution("apt-get install -y foo", None, "killed");
        assert!(err.to_string().contains("exit code none"));
        assert!(err.to_string().contains("killed"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProvisionError = io_err.into();
        assert!(matches!(err, ProvisionError::Io(_)));
    }

    #[test]
    fn test_classification() {
        let timeout = ProvisionError::Timeout {
            command: "apt-get update".to_string(),
            after: Duration::from_secs(5),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_preflight());
        assert!(ProvisionError::permission("x").is_preflight());
        assert!(!ProvisionError::config("x").is_timeout());
    }
}
