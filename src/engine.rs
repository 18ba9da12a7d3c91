//! Provisioning Engine
//!
//! Ties the pieces together for one run:
//!
//! 1. take the run lock
//! 2. preflight (may confirm and perform the release upgrade)
//! 3. resolve every question the plan asks
//! 4. run the steps
//!
//! [`Engine::execute`] works against any [`SystemProbe`] and
//! [`SystemHandles`]; [`run_on_host`] and [`run_simulated`] wire it to the
//! real machine or to [`SimSystem`].

use crate::answers::{Answers, Decider};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::exec::{Exec, StepBudget};
use crate::lock::RunLock;
use crate::plan::Plan;
use crate::preflight::{LocalHost, Preflight, SystemProbe, SystemProfile};
use crate::process_guard::{SharedRegistry, TrackedTempDir};
use crate::prober::{Resolution, resolve};
use crate::report::RunReport;
use crate::runner::{ProgressSink, RunnerOptions, StepRunner};
use crate::sim::{STOCK_GRUB_DEFAULTS, SimHost, SimSystem};
use crate::system::{Apt, FlatpakCli, HostBootTools, PackageManager, Systemctl, SystemHandles};
use crate::types::Question;
use std::fs;
use tracing::{info, warn};

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub profile: SystemProfile,
    pub answers: Answers,
    pub report: RunReport,
}

/// One configured provisioning run
pub struct Engine<'a> {
    config: &'a EngineConfig,
    plan: &'a Plan,
}

impl<'a> Engine<'a> {
    pub fn new(config: &'a EngineConfig, plan: &'a Plan) -> Self {
        Self { config, plan }
    }

    /// Lock, preflight, decide, run.
    ///
    /// Preflight errors are returned before anything is changed. Step
    /// failures do not make this an `Err`; they are in the report.
    pub fn execute(
        &self,
        probe: &dyn SystemProbe,
        system: SystemHandles<'_>,
        budget: StepBudget,
        decider: &mut Decider,
        sink: &mut dyn ProgressSink,
    ) -> Result<RunOutcome> {
        self.plan.validate()?;

        let _lock = RunLock::acquire(&self.config.lock_file)?;

        let profile = Preflight::new(self.config, probe).run(decider, system.packages)?;

        let answers = decider.resolve_all(self.plan.questions());

        if self.config.dry_run {
            info!("Dry run: mutating commands are logged, not executed");
        }

        let runner = StepRunner::new(system, &answers, RunnerOptions::from_config(self.config), budget);
        let results = runner.run(self.plan, sink);
        let report = RunReport::new(self.plan.steps.len(), results);

        if report.succeeded() {
            info!("Provisioning finished: {}", report.summary());
        } else {
            warn!("Provisioning incomplete: {}", report.summary());
        }

        Ok(RunOutcome {
            profile,
            answers,
            report,
        })
    }
}

/// Run `plan` against this machine
pub fn run_on_host(
    config: &EngineConfig,
    plan: &Plan,
    registry: SharedRegistry,
    decider: &mut Decider,
    sink: &mut dyn ProgressSink,
) -> Result<RunOutcome> {
    let budget = StepBudget::new();
    let exec = Exec::new(registry, budget.clone(), config.dry_run)?;

    let apt = Apt::new(&exec);
    let systemctl = Systemctl::new(&exec);
    let boot = HostBootTools::new(&exec, config.grub_cfg.clone());
    let flatpak = FlatpakCli::new(&exec);
    let system = SystemHandles {
        packages: &apt,
        services: &systemctl,
        boot: &boot,
        flatpak: &flatpak,
    };

    Engine::new(config, plan).execute(&LocalHost, system, budget, decider, sink)
}

/// Run `plan` against an in-memory Debian Testing machine.
///
/// Files the run would rewrite are copied into a scratch directory first,
/// so nothing on the host changes. The scratch directory is registered
/// with `registry` for the length of the run.
pub fn run_simulated(
    config: &EngineConfig,
    plan: &Plan,
    registry: SharedRegistry,
    decider: &mut Decider,
    sink: &mut dyn ProgressSink,
) -> Result<RunOutcome> {
    let scratch = TrackedTempDir::new("nova-simulate-", registry)?;

    let grub = fs::read_to_string(&config.grub_defaults).unwrap_or_else(|_| STOCK_GRUB_DEFAULTS.to_string());
    let grub_defaults = scratch.path().join("grub");
    fs::write(&grub_defaults, grub)?;

    let config = EngineConfig {
        lock_file: scratch.path().join("nova-provision.lock"),
        sources_list: scratch.path().join("sources.list"),
        grub_defaults,
        ..config.clone()
    };

    let sim = SimSystem::debian_testing(plan);
    let system = SystemHandles {
        packages: &sim,
        services: &sim,
        boot: &sim,
        flatpak: &sim,
    };

    info!("Simulating against an in-memory Debian Testing system");
    Engine::new(&config, plan).execute(&SimHost::default(), system, StepBudget::new(), decider, sink)
}

/// Run preflight only. Never upgrades, never installs.
pub fn check_host(config: &EngineConfig, registry: SharedRegistry) -> Result<SystemProfile> {
    let exec = Exec::new(registry, StepBudget::new(), true)?;
    let apt = Apt::new(&exec);
    let mut decider = Decider::unattended(Answers::new().with(Question::UpgradeToTesting, false));
    Preflight::new(config, &LocalHost).run(&mut decider, &apt)
}

/// How each package request of `plan` resolves right now
pub fn resolve_plan(
    packages: &dyn PackageManager,
    plan: &Plan,
) -> Vec<(String, String, Result<Resolution>)> {
    plan.package_requests()
        .map(|(step, request)| {
            (
                step.name.clone(),
                request.logical_name.clone(),
                resolve(packages, request),
            )
        })
        .collect()
}

/// [`resolve_plan`] against the host's apt, read-only
pub fn resolve_on_host(
    plan: &Plan,
    registry: SharedRegistry,
) -> Result<Vec<(String, String, Result<Resolution>)>> {
    let exec = Exec::new(registry, StepBudget::new(), true)?;
    let apt = Apt::new(&exec);
    Ok(resolve_plan(&apt, plan))
}
