//! Progress output and the final run report

use crate::runner::{ProgressEvent, ProgressSink, ProvisionResult};
use crate::types::StepStatus;
use serde::Serialize;
use std::io::Write;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Human-readable progress lines
pub struct ConsoleReporter<W: Write> {
    out: W,
    color: bool,
}

impl ConsoleReporter<std::io::Stdout> {
    pub fn stdout(color: bool) -> Self {
        Self::new(std::io::stdout(), color)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    fn paint(&self, code: &'static str, text: &str) -> String {
        if self.color {
            format!("{code}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ProgressSink for ConsoleReporter<W> {
    fn on_event(&mut self, event: &ProgressEvent<'_>) {
        let line = match event {
            ProgressEvent::StepStarted { index, total, name } => {
                format!("{} {}", self.paint(BOLD, &format!("[{index}/{total}]")), name)
            }
            ProgressEvent::StepRetrying { name, reason } => {
                format!("  {} {}: {}", self.paint(YELLOW, "↻"), name, reason)
            }
            ProgressEvent::StepFinished { result, .. } => {
                let mark = match result.status {
                    StepStatus::Success => self.paint(GREEN, "✓"),
                    StepStatus::Skipped => self.paint(YELLOW, "–"),
                    StepStatus::Failed if result.optional => self.paint(YELLOW, "!"),
                    StepStatus::Failed => self.paint(RED, "✗"),
                };
                format!("  {} {}", mark, result.detail)
            }
        };
        // Progress output is best effort; a closed stdout must not fail the run
        let _ = writeln!(self.out, "{line}");
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub total_steps: usize,
    pub results: Vec<ProvisionResult>,
}

impl RunReport {
    pub fn new(total_steps: usize, results: Vec<ProvisionResult>) -> Self {
        Self {
            total_steps,
            results,
        }
    }

    fn count(&self, status: StepStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// No required step failed
    pub fn succeeded(&self) -> bool {
        !self.results.iter().any(ProvisionResult::is_fatal)
    }

    /// The required step that ended the run, if any
    pub fn fatal_failure(&self) -> Option<&ProvisionResult> {
        self.results.iter().find(|r| r.is_fatal())
    }

    pub fn not_run(&self) -> usize {
        self.total_steps.saturating_sub(self.results.len())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ProvisionResult> {
        self.results
            .iter()
            .filter(|r| r.status == StepStatus::Failed && r.optional)
    }

    /// Multi-line summary for the end of a run
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} succeeded, {} skipped, {} failed, {} not run",
            self.count(StepStatus::Success),
            self.count(StepStatus::Skipped),
            self.count(StepStatus::Failed),
            self.not_run()
        );
        for w in self.warnings() {
            out.push_str(&format!("\nwarning: optional step '{}' failed: {}", w.step_name, w.detail));
        }
        if let Some(f) = self.fatal_failure() {
            out.push_str(&format!("\nerror: step '{}' failed: {}", f.step_name, f.detail));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: StepStatus, optional: bool) -> ProvisionResult {
        ProvisionResult {
            step_name: name.to_string(),
            status,
            detail: format!("{name} detail"),
            optional,
        }
    }

    #[test]
    fn test_summary_names_failing_step() {
        let report = RunReport::new(
            4,
            vec![
                result("a", StepStatus::Success, false),
                result("b", StepStatus::Failed, true),
                result("c", StepStatus::Failed, false),
            ],
        );
        assert!(!report.succeeded());
        let summary = report.summary();
        assert!(summary.starts_with("1 succeeded, 0 skipped, 2 failed, 1 not run"));
        assert!(summary.contains("warning: optional step 'b' failed: b detail"));
        assert!(summary.contains("error: step 'c' failed: c detail"));
    }

    #[test]
    fn test_optional_failure_still_succeeds() {
        let report = RunReport::new(2, vec![
            result("a", StepStatus::Failed, true),
            result("b", StepStatus::Skipped, false),
        ]);
        assert!(report.succeeded());
        assert!(report.fatal_failure().is_none());
    }

    #[test]
    fn test_console_reporter_plain() {
        let mut reporter = ConsoleReporter::new(Vec::new(), false);
        reporter.on_event(&ProgressEvent::StepStarted {
            index: 1,
            total: 2,
            name: "GNOME desktop",
        });
        let done = result("GNOME desktop", StepStatus::Success, false);
        reporter.on_event(&ProgressEvent::StepFinished {
            index: 1,
            total: 2,
            result: &done,
        });
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(text, "[1/2] GNOME desktop\n  ✓ GNOME desktop detail\n");
    }

    #[test]
    fn test_report_serializes() {
        let report = RunReport::new(1, vec![result("a", StepStatus::Skipped, false)]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["status"], "skipped");
    }
}
