//! Command line interface

use crate::answers::Answers;
use crate::config::EngineConfig;
use crate::types::{FailurePolicy, FrontendKind, Question, Toggle};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// nova-provision - turn Debian Testing into the Nova GNOME desktop
#[derive(Parser)]
#[command(name = "nova-provision")]
#[command(about = "Idempotent provisioning of the Nova GNOME desktop on Debian Testing")]
#[command(version)]
pub struct Cli {
    /// JSON engine configuration; CLI flags override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// JSON plan replacing the built-in Nova plan
    #[arg(long, global = true)]
    pub plan: Option<PathBuf>,

    /// Transcript file (default: /var/log/nova-provision.log)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Debug output on stderr and in the transcript
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision this machine
    Run(RunArgs),
    /// Run the pre-flight checks only
    Check,
    /// Show which concrete package each requirement resolves to
    Resolve,
    /// Print the plan as JSON
    Plan,
    /// Validate a configuration file and the plan
    Validate {
        /// Configuration file to validate
        #[arg(value_name = "CONFIG")]
        file: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Log mutating commands instead of running them.
    ///
    /// Queries (apt-cache, dpkg-query, systemctl is-enabled) still run so
    /// the preview reflects the real machine.
    #[arg(long)]
    pub dry_run: bool,

    /// Run against an in-memory Debian Testing system instead of this machine
    #[arg(long)]
    pub simulate: bool,

    /// Where to ask questions that have no explicit answer
    #[arg(long, value_name = "none|terminal|zenity")]
    pub frontend: Option<FrontendKind>,

    /// Install developer tools
    #[arg(long, value_name = "yes|no")]
    pub dev_tools: Option<Toggle>,

    /// Install Android and iOS connectivity tools
    #[arg(long, value_name = "yes|no")]
    pub mobile: Option<Toggle>,

    /// Upgrade to Debian Testing if this system is on another release
    #[arg(long, value_name = "yes|no")]
    pub upgrade_to_testing: Option<Toggle>,

    /// Treat a release mismatch as fatal unless the upgrade is confirmed
    #[arg(long)]
    pub strict_release: bool,

    /// Keep going after a required step fails
    #[arg(long)]
    pub continue_on_error: bool,

    /// Per-step time limit in seconds
    #[arg(long, value_name = "SECS")]
    pub step_timeout: Option<u64>,

    /// Disable colours in progress output
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Where this invocation appends its transcript.
    ///
    /// Only real runs write one. `--log-file` wins over `config`, which
    /// may be the defaults when the configuration file failed to load.
    pub fn transcript_path(&self, config: &EngineConfig) -> Option<PathBuf> {
        match &self.command {
            Commands::Run(args) if !args.simulate => {
                Some(self.log_file.clone().unwrap_or_else(|| config.log_file.clone()))
            }
            _ => None,
        }
    }

    /// Apply global flags on top of a loaded configuration
    pub fn apply_to(&self, config: &mut EngineConfig) {
        if let Some(plan) = &self.plan {
            config.plan_file = Some(plan.clone());
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = log_file.clone();
        }
    }
}

impl RunArgs {
    /// Apply run flags on top of a loaded configuration
    pub fn apply_to(&self, config: &mut EngineConfig) {
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(frontend) = self.frontend {
            config.frontend = frontend;
        }
        if self.strict_release {
            config.strict_release = true;
        }
        if self.continue_on_error {
            config.failure_policy = FailurePolicy::ContinueOnError;
        }
        if let Some(secs) = self.step_timeout {
            config.step_timeout_secs = secs;
        }
        if self.no_color {
            config.color = false;
        }
    }

    /// Answers given on the command line
    pub fn answers(&self) -> Answers {
        let mut answers = Answers::new();
        for (question, toggle) in [
            (Question::InstallDevTools, self.dev_tools),
            (Question::InstallMobileSupport, self.mobile),
            (Question::UpgradeToTesting, self.upgrade_to_testing),
        ] {
            if let Some(toggle) = toggle {
                answers.set(question, toggle.into());
            }
        }
        answers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["nova-provision"]).is_err());
    }

    #[test]
    fn test_cli_run_defaults() {
        let cli = Cli::try_parse_from(["nova-provision", "run"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert!(!args.dry_run);
                assert!(!args.simulate);
                assert!(args.answers().get(Question::InstallDevTools).is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_run_answers() {
        let cli = Cli::try_parse_from([
            "nova-provision",
            "run",
            "--dev-tools",
            "yes",
            "--mobile",
            "no",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        let answers = args.answers();
        assert_eq!(answers.get(Question::InstallDevTools), Some(true));
        assert_eq!(answers.get(Question::InstallMobileSupport), Some(false));
        assert_eq!(answers.get(Question::UpgradeToTesting), None);
    }

    #[test]
    fn test_cli_rejects_bad_toggle() {
        assert!(Cli::try_parse_from(["nova-provision", "run", "--dev-tools", "maybe"]).is_err());
    }

    #[test]
    fn test_cli_flags_override_config() {
        let cli = Cli::try_parse_from([
            "nova-provision",
            "--log-file",
            "/tmp/nova.log",
            "run",
            "--dry-run",
            "--continue-on-error",
            "--frontend",
            "zenity",
            "--step-timeout",
            "60",
        ])
        .unwrap();

        let mut config = EngineConfig::default();
        cli.apply_to(&mut config);
        let Commands::Run(args) = &cli.command else {
            panic!("Expected Run command");
        };
        args.apply_to(&mut config);

        assert_eq!(config.log_file, PathBuf::from("/tmp/nova.log"));
        assert!(config.dry_run);
        assert_eq!(config.failure_policy, FailurePolicy::ContinueOnError);
        assert_eq!(config.frontend, FrontendKind::Zenity);
        assert_eq!(config.step_timeout_secs, 60);
    }

    #[test]
    fn test_transcript_only_for_real_runs() {
        let defaults = EngineConfig::default();

        let cli = Cli::try_parse_from(["nova-provision", "run"]).unwrap();
        assert_eq!(cli.transcript_path(&defaults), Some(defaults.log_file.clone()));

        let cli = Cli::try_parse_from(["nova-provision", "--log-file", "/tmp/nova.log", "run"]).unwrap();
        assert_eq!(cli.transcript_path(&defaults), Some(PathBuf::from("/tmp/nova.log")));

        let cli = Cli::try_parse_from(["nova-provision", "run", "--simulate"]).unwrap();
        assert_eq!(cli.transcript_path(&defaults), None);

        let cli = Cli::try_parse_from(["nova-provision", "check"]).unwrap();
        assert_eq!(cli.transcript_path(&defaults), None);
    }

    #[test]
    fn test_cli_validate_command() {
        let cli = Cli::try_parse_from(["nova-provision", "validate", "nova.json"]).unwrap();
        match cli.command {
            Commands::Validate { file } => assert_eq!(file, PathBuf::from("nova.json")),
            _ => panic!("Expected Validate command"),
        }
    }
}
