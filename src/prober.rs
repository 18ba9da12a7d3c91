//! Capability Prober
//!
//! Resolves a logical requirement ("ADB tool") to the concrete package that
//! the current distribution snapshot actually carries. Package names drift
//! across Debian releases (`android-tools-adb` became `adb`), so a request
//! lists candidates in preference order and the first one the package
//! index knows wins.

use crate::error::{ProvisionError, Result};
use crate::system::PackageManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A logical package requirement with ordered fallbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequest {
    /// Human-readable capability name
    pub logical_name: String,
    /// Concrete package names in preference order; never empty
    pub candidates: Vec<String>,
    /// Missing optional capabilities are skipped with a warning
    #[serde(default)]
    pub optional: bool,
}

impl PackageRequest {
    /// A required package with a single name
    pub fn package(name: &str) -> Self {
        Self {
            logical_name: name.to_string(),
            candidates: vec![name.to_string()],
            optional: false,
        }
    }

    /// A required capability with fallback names
    pub fn any_of(logical_name: &str, candidates: &[&str]) -> Self {
        Self {
            logical_name: logical_name.to_string(),
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
            optional: false,
        }
    }

    /// Mark the request optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.candidates.is_empty() {
            return Err(ProvisionError::config(format!(
                "package request '{}' has no candidates",
                self.logical_name
            )));
        }
        if self.candidates.iter().any(|c| c.trim().is_empty()) {
            return Err(ProvisionError::config(format!(
                "package request '{}' has an empty candidate name",
                self.logical_name
            )));
        }
        Ok(())
    }
}

/// Result of probing one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// This concrete package should be installed
    Package(String),
    /// Optional capability with no available candidate
    Skip,
}

/// Resolve a request against the package index.
///
/// Candidates are queried in listed order and probing stops at the first
/// hit. When nothing matches, optional requests yield [`Resolution::Skip`]
/// and required ones fail with `NoCandidateAvailable`.
pub fn resolve(packages: &dyn PackageManager, request: &PackageRequest) -> Result<Resolution> {
    request.validate()?;

    for candidate in &request.candidates {
        if packages.is_known(candidate)? {
            debug!("{} resolved to {}", request.logical_name, candidate);
            return Ok(Resolution::Package(candidate.clone()));
        }
        debug!("{}: candidate {} not in package index", request.logical_name, candidate);
    }

    if request.optional {
        warn!(
            "Optional capability {} unavailable (tried: {}); continuing without it",
            request.logical_name,
            request.candidates.join(", ")
        );
        Ok(Resolution::Skip)
    } else {
        Err(ProvisionError::NoCandidateAvailable {
            capability: request.logical_name.clone(),
            candidates: request.candidates.clone(),
        })
    }
}

/// Resolve a batch of requests.
///
/// Returns the concrete packages (deduplicated, request order preserved)
/// and the logical names of skipped optional capabilities.
pub fn resolve_all(
    packages: &dyn PackageManager,
    requests: &[PackageRequest],
) -> Result<(Vec<String>, Vec<String>)> {
    let mut resolved: Vec<String> = Vec::new();
    let mut skipped = Vec::new();

    for request in requests {
        match resolve(packages, request)? {
            Resolution::Package(name) => {
                if !resolved.contains(&name) {
                    resolved.push(name);
                }
            }
            Resolution::Skip => skipped.push(request.logical_name.clone()),
        }
    }

    Ok((resolved, skipped))
}
