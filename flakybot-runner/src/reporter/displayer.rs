// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-readable output.

use crate::{
    errors::WriteReportError,
    helpers::plural,
    model::{Attempt, Outcome},
    reporter::{
        ReportSink, RunOutcome, RunReport, TestDecision,
        events::{RerunEvent, RerunEventKind},
    },
    runner::{ExhaustedReason, RerunState},
    verdict::{FinalOutcome, Verdict},
};
use owo_colors::{OwoColorize, Style};
use std::io::{self, Write};

const REPORT_HEADER: &str = "===FlakyBot Test Report===";
const REPORT_FOOTER: &str = "===End FlakyBot Test Report===";

/// Writes live progress and the final report as text.
///
/// Live lines are written with [`write_event`](Self::write_event) as the run progresses. The
/// final report is written through the [`ReportSink`] implementation.
#[derive(Debug)]
pub struct DisplayReporter<W> {
    writer: W,
    styles: Box<Styles>,
    verbose: bool,
}

impl<W: Write> DisplayReporter<W> {
    /// Creates a new reporter writing to `writer`, without colors.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            styles: Box::default(),
            verbose: false,
        }
    }

    /// Uses ANSI colors in the output.
    pub fn colorize(&mut self) -> &mut Self {
        self.styles.colorize();
        self
    }

    /// If set, also writes out the policy resolved for each test.
    pub fn set_verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Writes the live lines for an event.
    pub fn write_event(&mut self, event: &RerunEvent) -> Result<(), WriteReportError> {
        self.write_event_impl(event)
            .map_err(|error| WriteReportError::Io {
                kind: "text",
                error,
            })
    }

    fn write_event_impl(&mut self, event: &RerunEvent) -> io::Result<()> {
        let styles = &*self.styles;
        let writer = &mut self.writer;

        match &event.kind {
            RerunEventKind::RunStarted {
                test_count,
                failing_count,
            } => {
                if *failing_count == 0 {
                    writeln!(
                        writer,
                        "{:>12} no failing tests (out of {} {})",
                        "Checked".style(styles.pass),
                        test_count.style(styles.count),
                        plural::tests_str(*test_count),
                    )?;
                } else {
                    writeln!(
                        writer,
                        "{:>12} {} failing {} (out of {} {})",
                        "Rerunning".style(styles.retry),
                        failing_count.style(styles.count),
                        plural::tests_str(*failing_count),
                        test_count.style(styles.count),
                        plural::tests_str(*test_count),
                    )?;
                }
            }
            RerunEventKind::PolicyResolved {
                test_id,
                resolution,
            } => {
                if self.verbose {
                    writeln!(
                        writer,
                        "{:>12} {test_id}: {}",
                        "Policy".style(styles.count),
                        resolution.policy,
                    )?;
                }
            }
            RerunEventKind::AttemptFinished {
                attempt,
                policy,
                pass_count,
                runs_remaining,
                state,
                ..
            } => {
                let min_passes = policy.min_passes();
                match attempt.outcome {
                    Outcome::Passed => {
                        write!(
                            writer,
                            "{} passed {pass_count} out of the required {min_passes} times.",
                            attempt.test_id.style(styles.pass),
                        )?;
                        if state.is_retry_pending() {
                            write!(
                                writer,
                                " Running test again until it passes {min_passes} times.",
                            )?;
                        }
                        writeln!(writer)?;
                    }
                    Outcome::Failed | Outcome::Errored => {
                        writeln!(
                            writer,
                            "{} failed ({runs_remaining} {} remaining out of {}).",
                            attempt.test_id.style(styles.fail),
                            plural::runs_str(*runs_remaining),
                            policy.max_runs(),
                        )?;
                        write_attempt_detail(writer, attempt, "\t")?;
                    }
                    Outcome::Skipped => {
                        writeln!(
                            writer,
                            "{} was skipped ({runs_remaining} {} remaining out of {}).",
                            attempt.test_id.style(styles.skip),
                            plural::runs_str(*runs_remaining),
                            policy.max_runs(),
                        )?;
                    }
                }
            }
            RerunEventKind::TestFinished { verdict, state } => {
                let status = match verdict.final_outcome() {
                    FinalOutcome::Passed => "PASSED".style(styles.pass),
                    FinalOutcome::Failed => "FAILED".style(styles.fail),
                    FinalOutcome::Skipped => "SKIPPED".style(styles.skip),
                };
                writeln!(
                    writer,
                    "{status:>12} [{:>9}] {} ({state})",
                    format_elapsed(event.elapsed),
                    verdict.test_id(),
                )?;
            }
            RerunEventKind::RunBeginCancel { reason, running } => {
                writeln!(
                    writer,
                    "{:>12} due to {}: {} {} still rerunning",
                    "Cancelling".style(styles.fail),
                    reason.to_static_str().style(styles.count),
                    running.style(styles.count),
                    plural::tests_str(*running),
                )?;
            }
            RerunEventKind::RunFinished { .. } => {}
        }

        Ok(())
    }

    fn write_report_impl(&mut self, report: &RunReport) -> io::Result<()> {
        let styles = &*self.styles;
        let writer = &mut self.writer;

        writeln!(writer, "{}", REPORT_HEADER.style(styles.header))?;

        for decision in report.rerun_decisions() {
            write_decision(writer, styles, decision)?;
        }

        let mut notable = report.notable_warnings().peekable();
        if notable.peek().is_some() {
            let warnings: Vec<_> = notable.collect();
            writeln!(
                writer,
                "{} {}:",
                warnings.len().style(styles.count),
                plural::warnings_str(warnings.len()).style(styles.skip),
            )?;
            for warning in warnings {
                writeln!(writer, "  - {warning}")?;
            }
        }

        if let Some(reason) = report.cancel_reason {
            writeln!(
                writer,
                "Run cancelled ({}): tests that still needed reruns were marked failed.",
                reason.to_static_str(),
            )?;
        }

        let counts = &report.counts;
        let outcome = match report.overall_outcome {
            RunOutcome::Passed => "PASSED".style(styles.pass),
            RunOutcome::Failed => "FAILED".style(styles.fail),
        };
        let failed = report.failed_verdicts().count();
        writeln!(
            writer,
            "{outcome} [{}] {} {}: {} failed, {} skipped, {} rerun ({} recovered, {} exhausted)",
            format_elapsed(report.elapsed),
            counts.tests.style(styles.count),
            plural::tests_str(counts.tests),
            failed.style(styles.count),
            counts.skipped.style(styles.count),
            counts.rerun.style(styles.count),
            counts.recovered.style(styles.count),
            counts.exhausted.style(styles.count),
        )?;

        writeln!(writer, "{}", REPORT_FOOTER.style(styles.header))?;
        writer.flush()
    }
}

impl<W: Write> ReportSink for DisplayReporter<W> {
    fn write_report(&mut self, report: &RunReport) -> Result<(), WriteReportError> {
        self.write_report_impl(report)
            .map_err(|error| WriteReportError::Io {
                kind: "text",
                error,
            })
    }
}

fn write_decision(writer: &mut dyn Write, styles: &Styles, decision: &TestDecision) -> io::Result<()> {
    let verdict = &decision.verdict;
    writeln!(writer, "{}", verdict.test_id().style(verdict_style(styles, verdict)))?;
    for attempt in verdict.history().attempts() {
        let outcome_style = match attempt.outcome {
            Outcome::Passed => styles.pass,
            Outcome::Failed | Outcome::Errored => styles.fail,
            Outcome::Skipped => styles.skip,
        };
        writeln!(
            writer,
            "\tattempt {}: {}",
            attempt.attempt_number,
            attempt.outcome.style(outcome_style),
        )?;
        write_attempt_detail(writer, attempt, "\t\t")?;
    }
    if let Some(RerunState::Exhausted(ExhaustedReason::Cancelled(reason))) = decision.final_state
    {
        writeln!(writer, "\treruns cancelled ({})", reason.to_static_str())?;
    }
    writeln!(writer, "{}", verdict.explanation())?;
    writeln!(writer)
}

fn write_attempt_detail(writer: &mut dyn Write, attempt: &Attempt, indent: &str) -> io::Result<()> {
    match (&attempt.error_type, &attempt.error_message) {
        (Some(error_type), Some(message)) => {
            let mut lines = message.lines();
            let first = lines.next().unwrap_or_default();
            writeln!(writer, "{indent}{error_type}: {first}")?;
            for line in lines {
                writeln!(writer, "{indent}{line}")?;
            }
        }
        (Some(error_type), None) => writeln!(writer, "{indent}{error_type}")?,
        (None, Some(message)) => {
            for line in message.lines() {
                writeln!(writer, "{indent}{line}")?;
            }
        }
        (None, None) => {}
    }
    if let Some(location) = &attempt.location {
        writeln!(writer, "{indent}at {location}")?;
    }
    Ok(())
}

fn verdict_style(styles: &Styles, verdict: &Verdict) -> Style {
    match verdict.final_outcome() {
        FinalOutcome::Passed => styles.pass,
        FinalOutcome::Failed => styles.fail,
        FinalOutcome::Skipped => styles.skip,
    }
}

fn format_elapsed(elapsed: std::time::Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

#[derive(Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    retry: Style,
    fail: Style,
    skip: Style,
    header: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.retry = Style::new().magenta().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.header = Style::new().bold();
    }
}
