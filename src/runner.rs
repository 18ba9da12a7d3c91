//! Step Runner
//!
//! Executes a [`Plan`] strictly in order, one step at a time. Every step
//! looks at current state before touching anything, so re-running a plan
//! on a provisioned machine changes nothing and reports `Skipped`.
//!
//! Failure handling:
//! - optional steps never abort the run; their failure is a warning
//! - required steps abort the rest under [`FailurePolicy::FailFast`]
//! - a step that runs out of time gets exactly one more attempt

use crate::answers::Answers;
use crate::bootcfg::{self, CMDLINE_KEY, Rewrite};
use crate::config::EngineConfig;
use crate::error::{ProvisionError, Result};
use crate::exec::StepBudget;
use crate::plan::{Plan, StepAction, StepDef};
use crate::prober::{PackageRequest, resolve_all};
use crate::services::{Reconciled, ensure_disabled, ensure_enabled};
use crate::system::SystemHandles;
use crate::types::{FailurePolicy, StepStatus};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Record of one attempted step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionResult {
    pub step_name: String,
    pub status: StepStatus,
    pub detail: String,
    pub optional: bool,
}

impl ProvisionResult {
    /// Failed and not optional
    pub fn is_fatal(&self) -> bool {
        self.status == StepStatus::Failed && !self.optional
    }
}

/// Progress notifications for front ends and logs
#[derive(Debug, Clone, Copy)]
pub enum ProgressEvent<'e> {
    StepStarted {
        index: usize,
        total: usize,
        name: &'e str,
    },
    StepRetrying {
        name: &'e str,
        reason: &'e str,
    },
    StepFinished {
        index: usize,
        total: usize,
        result: &'e ProvisionResult,
    },
}

/// Receives progress events
pub trait ProgressSink {
    fn on_event(&mut self, event: &ProgressEvent<'_>);
}

/// Discards every event
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_event(&mut self, _event: &ProgressEvent<'_>) {}
}

/// What a successful step did
#[derive(Debug, Clone, PartialEq, Eq)]
enum StepOutcome {
    Applied(String),
    AlreadySatisfied(String),
}

/// Runner settings taken from the engine configuration
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub policy: FailurePolicy,
    pub step_timeout: Duration,
    pub dry_run: bool,
    pub grub_defaults: PathBuf,
}

impl RunnerOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            policy: config.failure_policy,
            step_timeout: config.step_timeout(),
            dry_run: config.dry_run,
            grub_defaults: config.grub_defaults.clone(),
        }
    }
}

/// Sequential executor for one plan
pub struct StepRunner<'a> {
    system: SystemHandles<'a>,
    answers: &'a Answers,
    options: RunnerOptions,
    budget: StepBudget,
}

impl<'a> StepRunner<'a> {
    /// `budget` must be the handle shared with the command executor so the
    /// per-step timeout reaches running commands.
    pub fn new(
        system: SystemHandles<'a>,
        answers: &'a Answers,
        options: RunnerOptions,
        budget: StepBudget,
    ) -> Self {
        Self {
            system,
            answers,
            options,
            budget,
        }
    }

    /// Run every step and return one result per attempted step.
    ///
    /// Under fail-fast the returned list stops at the first failed
    /// required step.
    pub fn run(&self, plan: &Plan, sink: &mut dyn ProgressSink) -> Vec<ProvisionResult> {
        let total = plan.steps.len();
        let mut results = Vec::with_capacity(total);

        for (i, step) in plan.steps.iter().enumerate() {
            let index = i + 1;
            sink.on_event(&ProgressEvent::StepStarted {
                index,
                total,
                name: &step.name,
            });
            info!("[{}/{}] {} ({})", index, total, step.name, step.action.label());

            let result = self.run_step(step, sink);
            log_result(&result);
            sink.on_event(&ProgressEvent::StepFinished {
                index,
                total,
                result: &result,
            });

            let abort = result.is_fatal() && self.options.policy == FailurePolicy::FailFast;
            results.push(result);
            if abort {
                error!(
                    "Aborting: required step '{}' failed ({} of {} steps not run)",
                    step.name,
                    total - index,
                    total
                );
                break;
            }
        }

        results
    }

    fn run_step(&self, step: &StepDef, sink: &mut dyn ProgressSink) -> ProvisionResult {
        let finish = |status, detail: String| ProvisionResult {
            step_name: step.name.clone(),
            status,
            detail,
            optional: step.optional,
        };

        if let Some(question) = step.ask {
            if !self.answers.answer(question) {
                return finish(StepStatus::Skipped, format!("not selected ({question} = no)"));
            }
        }

        let mut outcome = self.attempt(step);
        if let Err(e @ ProvisionError::Timeout { .. }) = &outcome {
            let reason = e.to_string();
            warn!("{}: {}; retrying once", step.name, reason);
            sink.on_event(&ProgressEvent::StepRetrying {
                name: &step.name,
                reason: &reason,
            });
            outcome = self.attempt(step);
        }

        match outcome {
            Ok(StepOutcome::Applied(detail)) => finish(StepStatus::Success, detail),
            Ok(StepOutcome::AlreadySatisfied(detail)) => finish(StepStatus::Skipped, detail),
            Err(e) => finish(StepStatus::Failed, e.to_string()),
        }
    }

    /// One attempt under a fresh time budget
    fn attempt(&self, step: &StepDef) -> Result<StepOutcome> {
        self.budget.start(self.options.step_timeout);
        let outcome = self.apply(&step.action);
        self.budget.clear();
        outcome
    }

    fn apply(&self, action: &StepAction) -> Result<StepOutcome> {
        match action {
            StepAction::RefreshIndex => {
                self.system.packages.refresh_index()?;
                Ok(StepOutcome::Applied("package index refreshed".to_string()))
            }
            StepAction::InstallPackages { packages } => self.install(packages),
            StepAction::FlatpakRemote { name, url } => {
                if self.system.flatpak.remotes()?.iter().any(|r| r == name) {
                    return Ok(StepOutcome::AlreadySatisfied(format!(
                        "remote {name} already configured"
                    )));
                }
                self.system.flatpak.add_remote(name, url)?;
                Ok(StepOutcome::Applied(format!("added remote {name}")))
            }
            StepAction::BootCmdline { value } => self.boot_cmdline(value),
            StepAction::PlymouthTheme { theme } => {
                if self.system.boot.plymouth_theme()?.as_deref() == Some(theme.as_str()) {
                    return Ok(StepOutcome::AlreadySatisfied(format!(
                        "theme {theme} already selected"
                    )));
                }
                self.system.boot.set_plymouth_theme(theme)?;
                Ok(StepOutcome::Applied(format!("selected theme {theme}")))
            }
            StepAction::EnableUnits { units } => self.reconcile_units(units, true),
            StepAction::DisableUnits { units } => self.reconcile_units(units, false),
        }
    }

    fn install(&self, requests: &[PackageRequest]) -> Result<StepOutcome> {
        let packages = self.system.packages;
        let (resolved, skipped) = resolve_all(packages, requests)?;

        let mut missing = Vec::new();
        for name in &resolved {
            if !packages.is_installed(name)? {
                missing.push(name.clone());
            }
        }

        let mut detail = if missing.is_empty() {
            format!("{} package(s) already installed", resolved.len())
        } else {
            packages.install(&missing)?;
            format!("installed {}", missing.join(", "))
        };
        if !skipped.is_empty() {
            detail.push_str(&format!("; unavailable optional: {}", skipped.join(", ")));
        }

        Ok(if missing.is_empty() {
            StepOutcome::AlreadySatisfied(detail)
        } else {
            StepOutcome::Applied(detail)
        })
    }

    fn boot_cmdline(&self, value: &str) -> Result<StepOutcome> {
        let path = &self.options.grub_defaults;

        let boot = self.system.boot;

        if self.options.dry_run {
            let current = std::fs::read_to_string(path)
                .map_err(|e| ProvisionError::rewrite(path, format!("cannot read: {e}")))?;
            if bootcfg::set_key(&current, CMDLINE_KEY, value)? != current {
                info!("[dry-run] would set {}=\"{}\" in {}", CMDLINE_KEY, value, path.display());
                return Ok(StepOutcome::Applied(format!("would set {CMDLINE_KEY}")));
            }
            if !boot.bootloader_in_sync(value)? {
                info!("[dry-run] would regenerate the boot config");
                return Ok(StepOutcome::Applied("would regenerate boot config".to_string()));
            }
            return Ok(StepOutcome::AlreadySatisfied(format!("{CMDLINE_KEY} already set")));
        }

        match bootcfg::set_cmdline_default(path, value)? {
            // A failed regeneration on an earlier attempt leaves the
            // defaults updated but the generated config stale
            Rewrite::Unchanged if !boot.bootloader_in_sync(value)? => {
                info!("{} already set but the boot config predates it, regenerating", CMDLINE_KEY);
                boot.regenerate_bootloader()?;
                Ok(StepOutcome::Applied("regenerated boot config".to_string()))
            }
            Rewrite::Unchanged => Ok(StepOutcome::AlreadySatisfied(format!(
                "{CMDLINE_KEY} already set"
            ))),
            Rewrite::Changed => {
                boot.regenerate_bootloader()?;
                Ok(StepOutcome::Applied(format!(
                    "set {CMDLINE_KEY}=\"{value}\" and regenerated boot config"
                )))
            }
        }
    }

    fn reconcile_units(&self, units: &[String], enable: bool) -> Result<StepOutcome> {
        let services = self.system.services;
        let mut changed = Vec::new();
        for unit in units {
            let r = if enable {
                ensure_enabled(services, unit)?
            } else {
                ensure_disabled(services, unit)?
            };
            if r == Reconciled::Changed {
                changed.push(unit.as_str());
            }
        }

        let verb = if enable { "enabled" } else { "disabled" };
        Ok(if changed.is_empty() {
            StepOutcome::AlreadySatisfied(format!("all units already {verb}"))
        } else {
            StepOutcome::Applied(format!("{verb} {}", changed.join(", ")))
        })
    }
}

fn log_result(result: &ProvisionResult) {
    match result.status {
        StepStatus::Success => info!("{}: {}", result.step_name, result.detail),
        StepStatus::Skipped => info!("{}: skipped, {}", result.step_name, result.detail),
        StepStatus::Failed if result.optional => warn!(
            "Optional step '{}' failed, continuing: {}",
            result.step_name, result.detail
        ),
        StepStatus::Failed => error!("Step '{}' failed: {}", result.step_name, result.detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimSystem;
    use crate::system::UnitState;
    use crate::types::Question;
    use std::fs;

    fn handles(sim: &SimSystem) -> SystemHandles<'_> {
        SystemHandles {
            packages: sim,
            services: sim,
            boot: sim,
            flatpak: sim,
        }
    }

    fn options(grub: PathBuf) -> RunnerOptions {
        RunnerOptions {
            policy: FailurePolicy::FailFast,
            step_timeout: Duration::from_secs(60),
            dry_run: false,
            grub_defaults: grub,
        }
    }

    struct Recorder(Vec<String>);

    impl ProgressSink for Recorder {
        fn on_event(&mut self, event: &ProgressEvent<'_>) {
            self.0.push(match event {
                ProgressEvent::StepStarted { name, .. } => format!("start {name}"),
                ProgressEvent::StepRetrying { name, .. } => format!("retry {name}"),
                ProgressEvent::StepFinished { result, .. } => {
                    format!("finish {} {}", result.step_name, result.status)
                }
            });
        }
    }

    fn install(name: &str, pkgs: &[&str]) -> StepDef {
        StepDef::new(
            name,
            StepAction::InstallPackages {
                packages: pkgs.iter().map(|p| PackageRequest::package(p)).collect(),
            },
        )
    }

    #[test]
    fn test_install_skips_installed_packages() {
        let sim = SimSystem::new()
            .with_installed(&["git"])
            .with_available(&["curl"]);
        let answers = Answers::new();
        let runner = StepRunner::new(handles(&sim), &answers, options(PathBuf::new()), StepBudget::new());

        let results = runner.run(&Plan::new(vec![install("tools", &["git", "curl"])]), &mut NullSink);
        assert_eq!(results[0].status, StepStatus::Success);
        assert_eq!(sim.install_calls(), vec![vec!["curl".to_string()]]);

        let results = runner.run(&Plan::new(vec![install("tools", &["git", "curl"])]), &mut NullSink);
        assert_eq!(results[0].status, StepStatus::Skipped);
        assert_eq!(sim.install_calls().len(), 1);
    }

    #[test]
    fn test_declined_question_skips_step() {
        let sim = SimSystem::new().with_available(&["git"]);
        let answers = Answers::new().with(Question::InstallDevTools, false);
        let runner = StepRunner::new(handles(&sim), &answers, options(PathBuf::new()), StepBudget::new());

        let plan = Plan::new(vec![install("dev", &["git"]).gated_by(Question::InstallDevTools)]);
        let results = runner.run(&plan, &mut NullSink);
        assert_eq!(results[0].status, StepStatus::Skipped);
        assert!(results[0].detail.contains("install_dev_tools"));
        assert_eq!(sim.mutation_count(), 0);
    }

    #[test]
    fn test_fail_fast_stops_at_first_required_failure() {
        let sim = SimSystem::new().with_available(&["a", "c"]).failing_install("a");
        let answers = Answers::new();
        let runner = StepRunner::new(handles(&sim), &answers, options(PathBuf::new()), StepBudget::new());

        let plan = Plan::new(vec![install("one", &["a"]), install("two", &["c"])]);
        let results = runner.run(&plan, &mut NullSink);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, StepStatus::Failed);
        assert!(results[0].detail.contains("dpkg returned an error"));
        assert!(!sim.has_installed("c"));
    }

    #[test]
    fn test_continue_on_error_runs_everything() {
        let sim = SimSystem::new().with_available(&["a", "c"]).failing_install("a");
        let answers = Answers::new();
        let mut opts = options(PathBuf::new());
        opts.policy = FailurePolicy::ContinueOnError;
        let runner = StepRunner::new(handles(&sim), &answers, opts, StepBudget::new());

        let plan = Plan::new(vec![install("one", &["a"]), install("two", &["c"])]);
        let results = runner.run(&plan, &mut NullSink);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].status, StepStatus::Success);
    }

    #[test]
    fn test_optional_failure_does_not_abort() {
        let sim = SimSystem::new().with_available(&["a", "c"]).failing_install("a");
        let answers = Answers::new();
        let runner = StepRunner::new(handles(&sim), &answers, options(PathBuf::new()), StepBudget::new());

        let plan = Plan::new(vec![install("one", &["a"]).optional(), install("two", &["c"])]);
        let results = runner.run(&plan, &mut NullSink);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, StepStatus::Failed);
        assert!(!results[0].is_fatal());
        assert_eq!(results[1].status, StepStatus::Success);
    }

    #[test]
    fn test_timeout_retried_once() {
        let sim = SimSystem::new()
            .with_available(&["gnome-core"])
            .timing_out_install("gnome-core", 1);
        let answers = Answers::new();
        let runner = StepRunner::new(handles(&sim), &answers, options(PathBuf::new()), StepBudget::new());
        let mut recorder = Recorder(Vec::new());

        let results = runner.run(&Plan::new(vec![install("desktop", &["gnome-core"])]), &mut recorder);
        assert_eq!(results[0].status, StepStatus::Success);
        assert_eq!(
            recorder.0,
            vec!["start desktop", "retry desktop", "finish desktop success"]
        );
    }

    #[test]
    fn test_second_timeout_fails() {
        let sim = SimSystem::new()
            .with_available(&["gnome-core"])
            .timing_out_install("gnome-core", 2);
        let answers = Answers::new();
        let runner = StepRunner::new(handles(&sim), &answers, options(PathBuf::new()), StepBudget::new());

        let results = runner.run(&Plan::new(vec![install("desktop", &["gnome-core"])]), &mut NullSink);
        assert_eq!(results[0].status, StepStatus::Failed);
        assert!(results[0].detail.contains("timed out"));
        assert!(!sim.has_installed("gnome-core"));
    }

    #[test]
    fn test_boot_cmdline_regenerates_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let grub = dir.path().join("grub");
        fs::write(&grub, "GRUB_DEFAULT=0\nGRUB_CMDLINE_LINUX_DEFAULT=\"quiet\"\n").unwrap();

        let sim = SimSystem::new();
        let answers = Answers::new();
        let runner = StepRunner::new(handles(&sim), &answers, options(grub.clone()), StepBudget::new());
        let plan = Plan::new(vec![StepDef::new(
            "cmdline",
            StepAction::BootCmdline {
                value: "quiet splash".into(),
            },
        )]);

        assert_eq!(runner.run(&plan, &mut NullSink)[0].status, StepStatus::Success);
        assert_eq!(sim.regenerations(), 1);
        assert_eq!(runner.run(&plan, &mut NullSink)[0].status, StepStatus::Skipped);
        assert_eq!(sim.regenerations(), 1);
    }

    #[test]
    fn test_boot_cmdline_resumes_failed_regeneration() {
        let dir = tempfile::tempdir().unwrap();
        let grub = dir.path().join("grub");
        fs::write(&grub, "GRUB_DEFAULT=0\nGRUB_CMDLINE_LINUX_DEFAULT=\"quiet\"\n").unwrap();

        let sim = SimSystem::new().failing_regeneration(1);
        let answers = Answers::new();
        let runner = StepRunner::new(handles(&sim), &answers, options(grub.clone()), StepBudget::new());
        let plan = Plan::new(vec![StepDef::new(
            "cmdline",
            StepAction::BootCmdline {
                value: "quiet splash".into(),
            },
        )]);

        let first = runner.run(&plan, &mut NullSink);
        assert_eq!(first[0].status, StepStatus::Failed);
        assert!(first[0].detail.contains("update-grub"));
        assert!(fs::read_to_string(&grub).unwrap().contains("\"quiet splash\""));
        assert_eq!(sim.regenerations(), 0);

        let second = runner.run(&plan, &mut NullSink);
        assert_eq!(second[0].status, StepStatus::Success, "{}", second[0].detail);
        assert_eq!(second[0].detail, "regenerated boot config");
        assert_eq!(sim.regenerations(), 1);

        let third = runner.run(&plan, &mut NullSink);
        assert_eq!(third[0].status, StepStatus::Skipped);
        assert_eq!(sim.regenerations(), 1);
    }

    #[test]
    fn test_boot_cmdline_dry_run_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        let grub = dir.path().join("grub");
        fs::write(&grub, "GRUB_DEFAULT=0\n").unwrap();

        let sim = SimSystem::new();
        let answers = Answers::new();
        let mut opts = options(grub.clone());
        opts.dry_run = true;
        let runner = StepRunner::new(handles(&sim), &answers, opts, StepBudget::new());
        let plan = Plan::new(vec![StepDef::new(
            "cmdline",
            StepAction::BootCmdline {
                value: "quiet splash".into(),
            },
        )]);

        let results = runner.run(&plan, &mut NullSink);
        assert_eq!(results[0].status, StepStatus::Success);
        assert!(results[0].detail.starts_with("would set"));
        assert_eq!(fs::read_to_string(&grub).unwrap(), "GRUB_DEFAULT=0\n");
        assert_eq!(sim.regenerations(), 0);
    }

    #[test]
    fn test_units_reconciled() {
        let sim = SimSystem::new()
            .with_unit("gdm.service", UnitState::Disabled)
            .with_unit("bluetooth.service", UnitState::Enabled)
            .with_unit("NetworkManager-wait-online.service", UnitState::Enabled);
        let answers = Answers::new();
        let runner = StepRunner::new(handles(&sim), &answers, options(PathBuf::new()), StepBudget::new());
        let plan = Plan::new(vec![
            StepDef::new(
                "enable",
                StepAction::EnableUnits {
                    units: vec!["gdm.service".into(), "bluetooth.service".into()],
                },
            ),
            StepDef::new(
                "disable",
                StepAction::DisableUnits {
                    units: vec!["NetworkManager-wait-online.service".into()],
                },
            ),
        ]);

        let results = runner.run(&plan, &mut NullSink);
        assert_eq!(results[0].detail, "enabled gdm.service");
        assert_eq!(results[1].status, StepStatus::Success);
        assert_eq!(sim.enable_calls(), vec!["gdm.service".to_string()]);

        let results = runner.run(&plan, &mut NullSink);
        assert!(results.iter().all(|r| r.status == StepStatus::Skipped));
    }

    #[test]
    fn test_plymouth_and_flatpak_idempotent() {
        let sim = SimSystem::new()
            .with_installed(&["plymouth", "flatpak"])
            .with_plymouth_theme("emerald");
        let answers = Answers::new();
        let runner = StepRunner::new(handles(&sim), &answers, options(PathBuf::new()), StepBudget::new());
        let plan = Plan::new(vec![
            StepDef::new("theme", StepAction::PlymouthTheme { theme: "spinner".into() }),
            StepDef::new(
                "flathub",
                StepAction::FlatpakRemote {
                    name: "flathub".into(),
                    url: "https://dl.flathub.org/repo/flathub.flatpakrepo".into(),
                },
            ),
        ]);

        let first = runner.run(&plan, &mut NullSink);
        assert!(first.iter().all(|r| r.status == StepStatus::Success));
        let before = sim.mutation_count();

        let second = runner.run(&plan, &mut NullSink);
        assert!(second.iter().all(|r| r.status == StepStatus::Skipped));
        assert_eq!(sim.mutation_count(), before);
    }

    #[test]
    fn test_existing_flatpak_remote_left_alone() {
        let sim = SimSystem::new()
            .with_installed(&["flatpak"])
            .with_remote("flathub");
        let answers = Answers::new();
        let runner = StepRunner::new(handles(&sim), &answers, options(PathBuf::new()), StepBudget::new());
        let plan = Plan::new(vec![StepDef::new(
            "flathub",
            StepAction::FlatpakRemote {
                name: "flathub".into(),
                url: "https://dl.flathub.org/repo/flathub.flatpakrepo".into(),
            },
        )]);

        let results = runner.run(&plan, &mut NullSink);
        assert_eq!(results[0].status, StepStatus::Skipped);
        assert_eq!(sim.mutation_count(), 0);
    }
}
