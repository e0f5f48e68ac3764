//! Human-readable rendering of an [`ExecutionReport`].

use colored::Colorize;
use std::fmt::Write;

use handeye_types::{ExecutionReport, SandboxState};

/// Render `report` as the multi-line summary printed after a run.
pub fn render(report: &ExecutionReport) -> String {
    let mut out = String::new();

    if !report.log.is_empty() {
        let _ = writeln!(out, "  {}", "Steps".bold());
        for line in &report.log {
            let mark = if line.ends_with(": true") {
                "✓".green().bold()
            } else {
                "✗".red().bold()
            };
            let _ = writeln!(out, "    {mark} {line}");
        }
    }

    if !report.output.is_empty() {
        let _ = writeln!(out, "  {}", "Output".bold());
        for line in &report.output {
            let _ = writeln!(out, "    {}", line.dimmed());
        }
    }

    let stats = &report.statistics;
    let _ = writeln!(
        out,
        "  {} steps={} attempts={} retries={} failures={}",
        "Statistics".bold(),
        stats.total_steps,
        stats.total_attempts,
        stats.total_retries,
        stats.total_failures
    );

    let verdict = match &report.state {
        SandboxState::Completed if report.succeeded => "completed".green().bold(),
        SandboxState::Completed => "completed".yellow().bold(),
        SandboxState::Aborted(_) => "aborted".red().bold(),
        SandboxState::Idle | SandboxState::Running => "incomplete".yellow().bold(),
    };
    let _ = writeln!(out, "  {} {verdict}", "Result".bold());
    if let Some(err) = &report.error {
        let _ = writeln!(out, "  {} {err}", "Error".red().bold());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use handeye_types::{ErrorKind, RunStatistics};

    fn report(succeeded: bool, error: Option<ErrorKind>, state: SandboxState) -> ExecutionReport {
        ExecutionReport {
            succeeded,
            log: vec!["open app: true".into(), "like post: false".into()],
            output: vec!["done".into()],
            error,
            statistics: RunStatistics {
                total_steps: 2,
                total_attempts: 3,
                total_retries: 1,
                total_failures: 1,
            },
            state,
        }
    }

    #[test]
    fn successful_run_lists_steps_and_statistics() {
        colored::control::set_override(false);
        let text = render(&report(true, None, SandboxState::Completed));
        assert!(text.contains("✓ open app: true"));
        assert!(text.contains("✗ like post: false"));
        assert!(text.contains("done"));
        assert!(text.contains("steps=2 attempts=3 retries=1 failures=1"));
        assert!(text.contains("Result completed"));
        assert!(!text.contains("Error"));
    }

    #[test]
    fn aborted_run_shows_the_error() {
        colored::control::set_override(false);
        let err = ErrorKind::SandboxViolation {
            line: 2,
            message: "call to 'open' is not permitted".into(),
        };
        let text = render(&report(
            false,
            Some(err),
            SandboxState::Aborted("violation".into()),
        ));
        assert!(text.contains("Result aborted"));
        assert!(text.contains("SandboxViolation at line 2"));
    }
}
