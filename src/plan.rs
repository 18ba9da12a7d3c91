//! Provisioning plans
//!
//! A plan is the ordered list of steps the runner executes. The built-in
//! Nova plan lives in [`crate::profile`]; a JSON file with the same shape
//! can replace it:
//!
//! ```json
//! { "steps": [
//!     { "name": "Refresh package index", "kind": "refresh_index" },
//!     { "name": "Developer tools", "kind": "install_packages", "ask": "install_dev_tools",
//!       "packages": [ { "logical_name": "git", "candidates": ["git"] } ] }
//! ] }
//! ```

use crate::error::{ProvisionError, Result};
use crate::prober::PackageRequest;
use crate::types::Question;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

/// What a step does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// `apt-get update`
    RefreshIndex,
    /// Resolve each request and install the missing packages in one transaction
    InstallPackages { packages: Vec<PackageRequest> },
    /// Add a system-wide Flatpak remote
    FlatpakRemote { name: String, url: String },
    /// Set `GRUB_CMDLINE_LINUX_DEFAULT` and regenerate the boot loader config
    BootCmdline { value: String },
    /// Select the default Plymouth theme
    PlymouthTheme { theme: String },
    EnableUnits { units: Vec<String> },
    DisableUnits { units: Vec<String> },
}

impl StepAction {
    /// Short label for listings
    pub fn label(&self) -> &'static str {
        match self {
            Self::RefreshIndex => "refresh_index",
            Self::InstallPackages { .. } => "install_packages",
            Self::FlatpakRemote { .. } => "flatpak_remote",
            Self::BootCmdline { .. } => "boot_cmdline",
            Self::PlymouthTheme { .. } => "plymouth_theme",
            Self::EnableUnits { .. } => "enable_units",
            Self::DisableUnits { .. } => "disable_units",
        }
    }
}

/// One named step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDef {
    pub name: String,
    /// Failure is downgraded to a warning and never aborts the run
    #[serde(default)]
    pub optional: bool,
    /// Run only when this question is answered yes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<Question>,
    #[serde(flatten)]
    pub action: StepAction,
}

impl StepDef {
    pub fn new(name: &str, action: StepAction) -> Self {
        Self {
            name: name.to_string(),
            optional: false,
            ask: None,
            action,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn gated_by(mut self, question: Question) -> Self {
        self.ask = Some(question);
        self
    }
}

/// Ordered steps of one provisioning run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<StepDef>,
}

impl Plan {
    pub fn new(steps: Vec<StepDef>) -> Self {
        Self { steps }
    }

    /// Load and validate a JSON plan
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| {
            ProvisionError::config(format!(
                "cannot read plan {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let plan: Self = serde_json::from_str(&content)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural checks: unique non-empty names, non-empty payloads,
    /// valid package requests
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(ProvisionError::config("plan has no steps"));
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(ProvisionError::config("step with an empty name"));
            }
            if !names.insert(step.name.as_str()) {
                return Err(ProvisionError::config(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }

            let empty = |what: &str| {
                ProvisionError::config(format!("step '{}' has no {what}", step.name))
            };
            match &step.action {
                StepAction::RefreshIndex => {}
                StepAction::InstallPackages { packages } => {
                    if packages.is_empty() {
                        return Err(empty("packages"));
                    }
                    for request in packages {
                        request.validate()?;
                    }
                }
                StepAction::FlatpakRemote { name, url } => {
                    if name.trim().is_empty() || url.trim().is_empty() {
                        return Err(empty("remote name or URL"));
                    }
                }
                StepAction::BootCmdline { .. } => {}
                StepAction::PlymouthTheme { theme } => {
                    if theme.trim().is_empty() {
                        return Err(empty("theme"));
                    }
                }
                StepAction::EnableUnits { units } | StepAction::DisableUnits { units } => {
                    if units.is_empty() {
                        return Err(empty("units"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Every question some step is gated on
    pub fn questions(&self) -> BTreeSet<Question> {
        self.steps.iter().filter_map(|s| s.ask).collect()
    }

    /// Every package request across the plan, in order
    pub fn package_requests(&self) -> impl Iterator<Item = (&StepDef, &PackageRequest)> {
        self.steps.iter().flat_map(|step| {
            let requests: &[PackageRequest] = match &step.action {
                StepAction::InstallPackages { packages } => packages,
                _ => &[],
            };
            requests.iter().map(move |r| (step, r))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Plan {
        Plan::new(vec![
            StepDef::new("Refresh", StepAction::RefreshIndex),
            StepDef::new(
                "Dev tools",
                StepAction::InstallPackages {
                    packages: vec![PackageRequest::package("git")],
                },
            )
            .gated_by(Question::InstallDevTools),
            StepDef::new(
                "Services",
                StepAction::EnableUnits {
                    units: vec!["gdm.service".into()],
                },
            )
            .optional(),
        ])
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        let step = &json["steps"][1];
        assert_eq!(step["kind"], "install_packages");
        assert_eq!(step["ask"], "install_dev_tools");
        assert_eq!(step["packages"][0]["candidates"][0], "git");
        assert!(json["steps"][0].get("ask").is_none());
    }

    #[test]
    fn test_label_matches_kind_tag() {
        let json = serde_json::to_value(sample()).unwrap();
        for (i, step) in sample().steps.iter().enumerate() {
            assert_eq!(json["steps"][i]["kind"], step.action.label());
        }
    }

    #[test]
    fn test_parse_minimal_step() {
        let plan: Plan = serde_json::from_str(
            r#"{ "steps": [ { "name": "Splash", "kind": "plymouth_theme", "theme": "spinner" } ] }"#,
        )
        .unwrap();
        assert_eq!(plan.steps[0].action, StepAction::PlymouthTheme { theme: "spinner".into() });
        assert!(!plan.steps[0].optional);
        assert_eq!(plan.steps[0].ask, None);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result: std::result::Result<Plan, _> =
            serde_json::from_str(r#"{ "steps": [ { "name": "x", "kind": "reboot" } ] }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empties() {
        let mut plan = sample();
        assert!(plan.validate().is_ok());

        plan.steps.push(StepDef::new("Refresh", StepAction::RefreshIndex));
        assert!(plan.validate().is_err());

        let plan = Plan::new(vec![StepDef::new(
            "Nothing",
            StepAction::InstallPackages { packages: vec![] },
        )]);
        assert!(plan.validate().is_err());

        assert!(Plan::default().validate().is_err());
    }

    #[test]
    fn test_questions_collected() {
        let questions: Vec<_> = sample().questions().into_iter().collect();
        assert_eq!(questions, vec![Question::InstallDevTools]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        fs::write(&path, sample().to_json().unwrap()).unwrap();
        assert_eq!(Plan::load_from_file(&path).unwrap(), sample());

        assert!(Plan::load_from_file(dir.path().join("missing.json")).is_err());
    }
}
