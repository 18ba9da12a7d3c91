//! End-to-end engine tests against the simulated system
//!
//! These tests drive the whole engine (lock, preflight, decisions, runner)
//! with `SimSystem` and `SimHost`, and verify:
//! - a fresh machine is provisioned and a second run changes nothing
//! - the adb fallback resolves on a snapshot without the legacy names
//! - fail-fast stops at the first failing required step
//! - optional failures and timeouts are handled per step

use std::fs;
use std::path::Path;

use nova_provision::answers::{Answers, Decider};
use nova_provision::config::EngineConfig;
use nova_provision::engine::{Engine, RunOutcome};
use nova_provision::error::{ProvisionError, Result};
use nova_provision::exec::StepBudget;
use nova_provision::plan::{Plan, StepAction, StepDef};
use nova_provision::prober::PackageRequest;
use nova_provision::profile::nova_plan;
use nova_provision::runner::{NullSink, ProgressEvent, ProgressSink};
use nova_provision::sim::{STOCK_GRUB_DEFAULTS, SimHost, SimSystem};
use nova_provision::system::{SystemHandles, UnitState};
use nova_provision::types::{FailurePolicy, Question, StepStatus};
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

/// Config pointing every file the engine touches into `dir`
fn config_in(dir: &Path) -> EngineConfig {
    let grub = dir.join("grub");
    fs::write(&grub, STOCK_GRUB_DEFAULTS).unwrap();
    EngineConfig {
        lock_file: dir.join("nova.lock"),
        grub_defaults: grub,
        sources_list: dir.join("sources.list"),
        ..Default::default()
    }
}

fn handles(sim: &SimSystem) -> SystemHandles<'_> {
    SystemHandles {
        packages: sim,
        services: sim,
        boot: sim,
        flatpak: sim,
    }
}

fn execute(
    config: &EngineConfig,
    plan: &Plan,
    sim: &SimSystem,
    host: &SimHost,
    answers: Answers,
) -> Result<RunOutcome> {
    let mut decider = Decider::unattended(answers);
    Engine::new(config, plan).execute(host, handles(sim), StepBudget::new(), &mut decider, &mut NullSink)
}

fn status_of(outcome: &RunOutcome, step: &str) -> StepStatus {
    outcome
        .report
        .results
        .iter()
        .find(|r| r.step_name == step)
        .unwrap_or_else(|| panic!("no result for {step}"))
        .status
}

// =============================================================================
// Full plan
// =============================================================================

#[test]
fn test_nova_plan_provisions_fresh_machine() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let plan = nova_plan();
    let sim = SimSystem::debian_testing(&plan);

    let outcome = execute(&config, &plan, &sim, &SimHost::default(), Answers::new()).unwrap();

    assert!(outcome.report.succeeded(), "{}", outcome.report.summary());
    assert_eq!(outcome.report.results.len(), plan.steps.len());
    assert!(sim.has_installed("gnome-core"));
    assert!(sim.has_installed("pipewire"));
    assert!(!sim.has_installed("build-essential"), "dev tools default to no");
    assert_eq!(sim.unit_state("gdm.service"), UnitState::Enabled);
    assert_eq!(sim.regenerations(), 1);

    let grub = fs::read_to_string(&config.grub_defaults).unwrap();
    assert!(grub.contains("GRUB_CMDLINE_LINUX_DEFAULT=\"quiet splash\"\n"));
    assert_eq!(grub.matches("GRUB_CMDLINE_LINUX_DEFAULT=").count(), 1);
}

#[test]
fn test_second_run_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let plan = nova_plan();
    let sim = SimSystem::debian_testing(&plan);
    let answers = Answers::new().with(Question::InstallDevTools, true);

    let first = execute(&config, &plan, &sim, &SimHost::default(), answers.clone()).unwrap();
    assert!(first.report.succeeded(), "{}", first.report.summary());
    let mutations = sim.mutation_count();
    let grub_before = fs::read_to_string(&config.grub_defaults).unwrap();

    let second = execute(&config, &plan, &sim, &SimHost::default(), answers).unwrap();

    assert_eq!(sim.mutation_count(), mutations, "second run must not mutate");
    assert_eq!(fs::read_to_string(&config.grub_defaults).unwrap(), grub_before);
    for result in &second.report.results {
        // Refreshing the index is the only step with no state to compare
        if result.step_name == "Refresh package index" {
            assert_eq!(result.status, StepStatus::Success);
        } else {
            assert_eq!(result.status, StepStatus::Skipped, "{}: {}", result.step_name, result.detail);
        }
    }
}

#[test]
fn test_adb_fallback_reports_success() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let plan = nova_plan();
    let sim = SimSystem::debian_testing(&plan);

    let outcome = execute(&config, &plan, &sim, &SimHost::default(), Answers::new()).unwrap();

    assert_eq!(status_of(&outcome, "Android and iOS tools"), StepStatus::Success);
    assert!(sim.has_installed("adb"));
    assert!(sim.has_installed("fastboot"));
    assert!(!sim.has_installed("android-tools-adb"));
    let log = sim.probe_log();
    let legacy = log.iter().position(|p| p == "android-tools-adb").unwrap();
    let current = log.iter().position(|p| p == "adb").unwrap();
    assert!(legacy < current, "legacy name must be probed first");
}

#[test]
fn test_mobile_bundle_failure_is_a_warning() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let plan = nova_plan();
    let sim = SimSystem::debian_testing(&plan).failing_install("ifuse");

    let outcome = execute(&config, &plan, &sim, &SimHost::default(), Answers::new()).unwrap();

    assert_eq!(status_of(&outcome, "Android and iOS tools"), StepStatus::Failed);
    assert!(outcome.report.succeeded());
    assert_eq!(outcome.report.results.len(), plan.steps.len());
    assert!(outcome.report.summary().contains("warning: optional step 'Android and iOS tools'"));
}

#[test]
fn test_declining_mobile_skips_bundle() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let plan = nova_plan();
    let sim = SimSystem::debian_testing(&plan);

    let outcome = execute(
        &config,
        &plan,
        &sim,
        &SimHost::default(),
        Answers::new().with(Question::InstallMobileSupport, false),
    )
    .unwrap();

    assert_eq!(status_of(&outcome, "Android and iOS tools"), StepStatus::Skipped);
    assert!(!sim.has_installed("adb"));
    assert_eq!(outcome.answers.get(Question::InstallMobileSupport), Some(false));
}

// =============================================================================
// Failure policy
// =============================================================================

#[test]
fn test_fail_fast_result_length_is_steps_attempted() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let plan = nova_plan();
    let sim = SimSystem::debian_testing(&plan).failing_install("pipewire");

    let outcome = execute(&config, &plan, &sim, &SimHost::default(), Answers::new()).unwrap();

    // refresh, desktop, audio
    assert_eq!(outcome.report.results.len(), 3);
    let failed = outcome.report.fatal_failure().unwrap();
    assert_eq!(failed.step_name, "Audio stack");
    assert!(failed.detail.contains("dpkg"));
    assert!(!sim.has_installed("flatpak"));
    assert_eq!(outcome.report.not_run(), plan.steps.len() - 3);
}

#[test]
fn test_continue_on_error_attempts_every_step() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        failure_policy: FailurePolicy::ContinueOnError,
        ..config_in(dir.path())
    };
    let plan = nova_plan();
    let sim = SimSystem::debian_testing(&plan).failing_install("pipewire");

    let outcome = execute(&config, &plan, &sim, &SimHost::default(), Answers::new()).unwrap();

    assert_eq!(outcome.report.results.len(), plan.steps.len());
    assert!(!outcome.report.succeeded());
    assert!(sim.has_installed("flatpak"));
}

#[test]
fn test_required_capability_without_candidate_fails_step() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let plan = Plan::new(vec![StepDef::new(
        "Phone tools",
        StepAction::InstallPackages {
            packages: vec![PackageRequest::any_of("adb", &["android-tools-adb", "adb"])],
        },
    )]);
    let sim = SimSystem::new();

    let outcome = execute(&config, &plan, &sim, &SimHost::default(), Answers::new()).unwrap();

    let result = &outcome.report.results[0];
    assert_eq!(result.status, StepStatus::Failed);
    assert!(result.detail.contains("No candidate available for adb"));
}

// =============================================================================
// Timeouts
// =============================================================================

struct EventLog(Vec<String>);

impl ProgressSink for EventLog {
    fn on_event(&mut self, event: &ProgressEvent<'_>) {
        if let ProgressEvent::StepRetrying { name, .. } = event {
            self.0.push(name.to_string());
        }
    }
}

#[test]
fn test_timeout_then_success_is_success() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let plan = nova_plan();
    let sim = SimSystem::debian_testing(&plan).timing_out_install("gnome-core", 1);
    let mut decider = Decider::unattended(Answers::new());
    let mut events = EventLog(Vec::new());

    let outcome = Engine::new(&config, &plan)
        .execute(&SimHost::default(), handles(&sim), StepBudget::new(), &mut decider, &mut events)
        .unwrap();

    assert_eq!(status_of(&outcome, "GNOME desktop"), StepStatus::Success);
    assert_eq!(events.0, vec!["GNOME desktop".to_string()]);
}

#[test]
fn test_two_timeouts_fail_the_step() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let plan = nova_plan();
    let sim = SimSystem::debian_testing(&plan).timing_out_install("gnome-core", 2);

    let outcome = execute(&config, &plan, &sim, &SimHost::default(), Answers::new()).unwrap();

    assert_eq!(status_of(&outcome, "GNOME desktop"), StepStatus::Failed);
    assert_eq!(outcome.report.results.len(), 2);
}

// =============================================================================
// Preflight gating and locking
// =============================================================================

#[test]
fn test_preflight_failure_mutates_nothing() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let plan = nova_plan();
    let sim = SimSystem::debian_testing(&plan);
    let host = SimHost {
        free_kib: 1024,
        ..Default::default()
    };

    let err = execute(&config, &plan, &sim, &host, Answers::new()).unwrap_err();

    assert!(matches!(err, ProvisionError::InsufficientSpace { .. }));
    assert_eq!(sim.mutation_count(), 0);
    assert_eq!(sim.index_refreshes(), 0);
}

#[test]
fn test_concurrent_run_rejected() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let plan = nova_plan();
    let sim = SimSystem::debian_testing(&plan);

    let _held = nova_provision::lock::RunLock::acquire(&config.lock_file).unwrap();
    let err = execute(&config, &plan, &sim, &SimHost::default(), Answers::new()).unwrap_err();

    assert!(matches!(err, ProvisionError::ConcurrentRun { .. }));
    assert_eq!(sim.mutation_count(), 0);
}

#[test]
fn test_invalid_plan_rejected_before_lock() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let sim = SimSystem::new();

    let err = execute(&config, &Plan::default(), &sim, &SimHost::default(), Answers::new()).unwrap_err();

    assert!(matches!(err, ProvisionError::Config(_)));
    assert!(!config.lock_file.exists());
}
