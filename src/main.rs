//! nova-provision - main entry point

use anyhow::{Context, Result};
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

use nova_provision::answers::{Answers, Decider, Frontend, TerminalFrontend, ZenityFrontend};
use nova_provision::cli::{Cli, Commands, RunArgs};
use nova_provision::config::EngineConfig;
use nova_provision::engine;
use nova_provision::error::ProvisionError;
use nova_provision::logging::init_logging;
use nova_provision::plan::Plan;
use nova_provision::process_guard::{self, ChildRegistry};
use nova_provision::profile::nova_plan;
use nova_provision::prober::Resolution;
use nova_provision::report::ConsoleReporter;
use nova_provision::runner::ProgressSink;
use nova_provision::types::FrontendKind;

/// Exit status when a pre-flight check fails
const EXIT_PREFLIGHT: u8 = 2;
/// Exit status when another run holds the lock
const EXIT_CONCURRENT: u8 = 3;

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    };
    cli.apply_to(&mut config);
    Ok(config)
}

fn load_plan(config: &EngineConfig) -> Result<Plan> {
    match &config.plan_file {
        Some(path) => Plan::load_from_file(path)
            .with_context(|| format!("Failed to load plan from {:?}", path)),
        None => Ok(nova_plan()),
    }
}

fn frontend(kind: FrontendKind) -> Option<Box<dyn Frontend>> {
    match kind {
        FrontendKind::None => None,
        FrontendKind::Terminal => Some(Box::new(TerminalFrontend::stdio())),
        FrontendKind::Zenity => Some(Box::new(ZenityFrontend::new("Nova setup"))),
    }
}

/// Map an engine error to an exit status
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<ProvisionError>() {
        Some(e) if e.is_preflight() => ExitCode::from(EXIT_PREFLIGHT),
        Some(ProvisionError::ConcurrentRun { .. }) => ExitCode::from(EXIT_CONCURRENT),
        _ => ExitCode::FAILURE,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            let fallback = cli.transcript_path(&EngineConfig::default());
            init_logging(fallback.as_deref(), cli.verbose);
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let transcript = cli.transcript_path(&config);
    init_logging(transcript.as_deref(), cli.verbose);
    debug!("CLI arguments parsed");

    let result = match &cli.command {
        Commands::Run(args) => {
            args.apply_to(&mut config);
            run(&config, args)
        }
        Commands::Check => check(&config),
        Commands::Resolve => resolve(&config),
        Commands::Plan => print_plan(&config),
        Commands::Validate { file } => validate(file),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            exit_code_for(&e)
        }
    }
}

fn run(config: &EngineConfig, args: &RunArgs) -> Result<ExitCode> {
    config.validate()?;
    let plan = load_plan(config)?;

    let explicit = Answers::from_map(config.answers.clone()).merged_with(&args.answers());
    let mut decider = Decider::new(explicit, frontend(config.frontend));
    let mut reporter = ConsoleReporter::stdout(config.color);
    let sink: &mut dyn ProgressSink = &mut reporter;

    let registry = ChildRegistry::shared();
    if let Err(e) = process_guard::init_signal_handlers(registry.clone()) {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let outcome = if args.simulate {
        engine::run_simulated(config, &plan, registry, &mut decider, sink)?
    } else {
        info!("nova-provision {} starting", env!("CARGO_PKG_VERSION"));
        engine::run_on_host(config, &plan, registry, &mut decider, sink)?
    };

    println!();
    println!("{}", outcome.report.summary());

    if outcome.report.succeeded() {
        println!("✓ Nova desktop provisioned. Reboot to start GNOME.");
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("✗ Provisioning did not complete; re-run after fixing the error above.");
        Ok(ExitCode::FAILURE)
    }
}

fn check(config: &EngineConfig) -> Result<ExitCode> {
    config.validate()?;
    let profile = engine::check_host(config, ChildRegistry::shared())?;
    println!("✓ Pre-flight checks passed");
    println!("  {}", profile);
    Ok(ExitCode::SUCCESS)
}

fn resolve(config: &EngineConfig) -> Result<ExitCode> {
    let plan = load_plan(config)?;
    let rows = engine::resolve_on_host(&plan, ChildRegistry::shared())?;

    let mut missing = false;
    for (step, capability, resolution) in rows {
        match resolution {
            Ok(Resolution::Package(name)) => println!("{step}: {capability} -> {name}"),
            Ok(Resolution::Skip) => println!("{step}: {capability} -> (skipped, optional)"),
            Err(e) => {
                missing = true;
                println!("{step}: {capability} -> ✗ {e}");
            }
        }
    }

    Ok(if missing { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn print_plan(config: &EngineConfig) -> Result<ExitCode> {
    let plan = load_plan(config)?;
    println!("{}", plan.to_json()?);
    Ok(ExitCode::SUCCESS)
}

fn validate(file: &std::path::Path) -> Result<ExitCode> {
    info!("Validating configuration file: {:?}", file);
    let config = EngineConfig::load_from_file(file)?;
    config
        .validate()
        .context("Configuration validation failed")?;
    let plan = load_plan(&config)?;
    println!(
        "✓ Configuration file is valid ({} steps, {} on failure)",
        plan.steps.len(),
        config.failure_policy
    );
    Ok(ExitCode::SUCCESS)
}
