//! Reporting for remote runs.
//!
//! Console output per method and a coloured summary, plus JUnit XML for
//! CI systems (see [`junit`]).

pub mod junit;

use std::time::Duration;

pub use junit::write_junit;

use crate::client::RemoteOutcome;

/// Outcome of one remote test method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodReport {
    pub fullname: String,
    pub outcome: RemoteOutcome,
}

/// Every method outcome of a remote run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub results: Vec<MethodReport>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.count(|outcome| matches!(outcome, RemoteOutcome::Pass { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, RemoteOutcome::Fail { .. }))
    }

    pub fn errors(&self) -> usize {
        self.count(|outcome| matches!(outcome, RemoteOutcome::Error { .. }))
    }

    fn count(&self, pred: impl Fn(&RemoteOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    /// True if at least one test ran and all of them passed.
    pub fn success(&self) -> bool {
        self.total() > 0 && self.passed() == self.total()
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Prints one method result, unittest style.
///
/// With `show_output`, the remote output of passing tests is echoed too,
/// since it is otherwise lost.
pub fn print_result(report: &MethodReport, show_output: bool) {
    let label = match &report.outcome {
        RemoteOutcome::Pass { .. } => console::style(report.outcome.label()).green(),
        RemoteOutcome::Fail { .. } => console::style(report.outcome.label()).red(),
        RemoteOutcome::Error { .. } => console::style(report.outcome.label()).red().bold(),
    };
    println!("{} ... {}", report.fullname, label);
    if show_output
        && let RemoteOutcome::Pass { output } = &report.outcome
        && !output.is_empty()
    {
        print!("{}", console::style(output).dim());
    }
}

/// Prints the tracebacks of every failed method and the totals.
pub fn print_summary(summary: &RunSummary) {
    for report in &summary.results {
        let (kind, traceback) = match &report.outcome {
            RemoteOutcome::Pass { .. } => continue,
            RemoteOutcome::Fail { traceback } => ("FAIL", traceback),
            RemoteOutcome::Error { traceback } => ("ERROR", traceback),
        };
        println!();
        println!("{}", "=".repeat(70));
        println!("{}: {}", console::style(kind).red().bold(), report.fullname);
        println!("{}", "-".repeat(70));
        println!("{}", traceback.trim_end());
    }

    println!();
    println!("Test Results:");
    println!("  Total:   {}", summary.total());
    println!("  Passed:  {}", console::style(summary.passed()).green());
    println!("  Failed:  {}", console::style(summary.failed()).red());
    println!("  Errors:  {}", console::style(summary.errors()).red());
    println!("  Duration: {:?}", summary.duration);

    println!();
    if summary.total() == 0 {
        println!("{}", console::style("No tests were run.").red().bold());
    } else if summary.success() {
        println!("{}", console::style("All tests passed!").green().bold());
    } else {
        println!("{}", console::style("Some tests failed.").red().bold());
    }
}
