//! nova-provision library
//!
//! Idempotent, fallback-aware provisioning of the Nova GNOME desktop on
//! Debian Testing: preflight checks, capability probing, a sequential step
//! runner and service reconciliation, behind trait seams for apt,
//! systemctl and the boot tools.

pub mod answers;
pub mod atomic;
pub mod bootcfg;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod lock;
pub mod logging;
pub mod plan;
pub mod preflight;
pub mod prober;
pub mod process_guard;
pub mod profile;
pub mod release;
pub mod report;
pub mod runner;
pub mod services;
pub mod sim;
pub mod system;
pub mod types;

// Re-export main types for convenience
pub use answers::{Answers, Decider, Frontend, TerminalFrontend, ZenityFrontend};
pub use config::EngineConfig;
pub use engine::{Engine, RunOutcome, check_host, resolve_on_host, run_on_host, run_simulated};
pub use error::{ProvisionError, Result};
pub use lock::RunLock;
pub use plan::{Plan, StepAction, StepDef};
pub use preflight::{LocalHost, Preflight, SystemProbe, SystemProfile};
pub use prober::{PackageRequest, Resolution, resolve};
pub use process_guard::{ChildRegistry, SharedRegistry};
pub use profile::nova_plan;
pub use report::{ConsoleReporter, RunReport};
pub use runner::{ProgressEvent, ProgressSink, ProvisionResult, StepRunner};
pub use services::{ensure_disabled, ensure_enabled};
pub use sim::{SimHost, SimSystem};
pub use system::{BootTools, Flatpak, PackageManager, ServiceManager, SystemHandles, UnitState};
pub use types::{FailurePolicy, FilesystemKind, FrontendKind, Question, StepStatus};
