// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::WriteReportError,
    initial_results::InitialResults,
    model::{Outcome, RerunPolicy, TestHistory, TestId},
    policy::PolicyWarning,
    reporter::events::CancelReason,
    runner::RerunState,
    verdict::{FinalOutcome, Verdict},
};
use chrono::{DateTime, FixedOffset, Local};
use flakybot_metadata::{
    AttemptOutcomeSummary, AttemptSummary, FlakybotExitCode, PolicyWarningSummary,
    RunCountsSummary, RunOutcomeSummary, RunSummary, TestSummary, VerdictOutcomeSummary,
};
use indexmap::IndexMap;
use std::{fmt, time::Duration};

/// A sink that consumes a finished [`RunReport`].
pub trait ReportSink {
    /// Writes out the report.
    fn write_report(&mut self, report: &RunReport) -> Result<(), WriteReportError>;
}

/// The overall outcome of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    /// No test failed.
    Passed,

    /// At least one test failed.
    Failed,
}

impl RunOutcome {
    /// Returns a short upper-case name for this outcome.
    pub fn to_static_str(self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_static_str())
    }
}

/// The verdict for one test, along with how it got there.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestDecision {
    /// The verdict.
    pub verdict: Verdict,

    /// The final rerun state, if the test went through the rerun process.
    ///
    /// This is `None` for tests whose first attempt passed or was skipped.
    pub final_state: Option<RerunState>,
}

impl TestDecision {
    /// Returns true if the test went through the rerun process.
    pub fn entered_rerun(&self) -> bool {
        self.final_state.is_some()
    }

    /// Returns true if the test was exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.final_state, Some(RerunState::Exhausted(_)))
    }
}

/// Counts of tests in a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunCounts {
    /// The total number of tests.
    pub tests: usize,

    /// The number of tests whose first attempt failed, so that they entered the rerun process.
    ///
    /// This includes tests whose policy allowed no further attempts.
    pub rerun: usize,

    /// The number of rerun tests whose first attempt failed but went on to pass.
    pub recovered: usize,

    /// The number of rerun tests that couldn't reach their required number of passes.
    pub exhausted: usize,

    /// The number of skipped tests.
    pub skipped: usize,
}

/// The aggregated result of a run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// `Failed` if any verdict failed.
    pub overall_outcome: RunOutcome,

    /// One decision per test, in the order of the initial results.
    pub decisions: Vec<TestDecision>,

    /// Counts of tests.
    pub counts: RunCounts,

    /// Warnings recorded while resolving policies.
    pub warnings: Vec<PolicyWarning>,

    /// The reason the run was cancelled, if it was.
    pub cancel_reason: Option<CancelReason>,

    /// The time at which the run started.
    pub start_time: DateTime<FixedOffset>,

    /// The amount of time the run took.
    pub elapsed: Duration,
}

impl RunReport {
    /// Returns the decisions for tests that went through the rerun process.
    pub fn rerun_decisions(&self) -> impl Iterator<Item = &TestDecision> + '_ {
        self.decisions.iter().filter(|d| d.entered_rerun())
    }

    /// Returns the verdicts that failed.
    pub fn failed_verdicts(&self) -> impl Iterator<Item = &Verdict> + '_ {
        self.decisions
            .iter()
            .map(|d| &d.verdict)
            .filter(|v| v.final_outcome().is_failure())
    }

    /// Returns the warnings worth showing to users.
    pub fn notable_warnings(&self) -> impl Iterator<Item = &PolicyWarning> + '_ {
        self.warnings.iter().filter(|w| w.is_notable())
    }

    /// Returns the process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        match self.overall_outcome {
            RunOutcome::Passed => FlakybotExitCode::OK,
            RunOutcome::Failed => FlakybotExitCode::TEST_RUN_FAILED,
        }
    }

    /// Converts this report into its machine-readable form.
    pub fn to_summary(&self) -> RunSummary {
        let outcome = match self.overall_outcome {
            RunOutcome::Passed => RunOutcomeSummary::Passed,
            RunOutcome::Failed => RunOutcomeSummary::Failed,
        };
        let counts = RunCountsSummary {
            tests: self.counts.tests,
            rerun: self.counts.rerun,
            recovered: self.counts.recovered,
            exhausted: self.counts.exhausted,
            skipped: self.counts.skipped,
        };
        let tests = self
            .decisions
            .iter()
            .map(|decision| test_summary(&decision.verdict))
            .collect();
        let warnings = self
            .warnings
            .iter()
            .map(|warning| PolicyWarningSummary {
                test_id: warning.test_id.to_smol_str(),
                message: warning.to_string(),
            })
            .collect();

        RunSummary::new(
            outcome,
            self.cancel_reason
                .map(|reason| reason.to_static_str().to_owned()),
            counts,
            tests,
            warnings,
        )
    }
}

fn test_summary(verdict: &Verdict) -> TestSummary {
    let outcome = match verdict.final_outcome() {
        FinalOutcome::Passed => VerdictOutcomeSummary::Passed,
        FinalOutcome::Failed => VerdictOutcomeSummary::Failed,
        FinalOutcome::Skipped => VerdictOutcomeSummary::Skipped,
    };
    let attempts = verdict
        .history()
        .attempts()
        .iter()
        .map(|attempt| AttemptSummary {
            attempt: attempt.attempt_number,
            outcome: match attempt.outcome {
                Outcome::Passed => AttemptOutcomeSummary::Passed,
                Outcome::Failed => AttemptOutcomeSummary::Failed,
                Outcome::Errored => AttemptOutcomeSummary::Errored,
                Outcome::Skipped => AttemptOutcomeSummary::Skipped,
            },
            error_type: attempt.error_type.clone(),
            error_message: attempt.error_message.clone(),
            location: attempt.location.clone(),
        })
        .collect();

    TestSummary {
        test_id: verdict.test_id().to_smol_str(),
        outcome,
        pass_count: verdict.pass_count(),
        total_runs: verdict.total_runs(),
        min_passes: verdict.policy().min_passes(),
        max_runs: verdict.policy().max_runs(),
        attempts,
    }
}

/// Assembles a [`RunReport`] out of the initial results and the verdicts of rerun tests.
///
/// Every test in the initial results gets a decision. Tests that never went through the rerun
/// process are decided on their first attempt alone.
#[derive(Debug)]
pub struct ReportBuilder {
    decisions: IndexMap<TestId, TestDecision>,
    warnings: Vec<PolicyWarning>,
    cancel_reason: Option<CancelReason>,
    start_time: Option<DateTime<FixedOffset>>,
    elapsed: Duration,
}

impl ReportBuilder {
    /// Creates a new builder, seeded with the initial results.
    pub fn new(initial: &InitialResults) -> Self {
        let decisions = initial
            .attempts()
            .iter()
            .map(|attempt| {
                let history = TestHistory::new(
                    attempt.clone(),
                    RerunPolicy::fallback(attempt.test_id.clone()),
                );
                let decision = TestDecision {
                    verdict: Verdict::from_history(history),
                    final_state: None,
                };
                (attempt.test_id.clone(), decision)
            })
            .collect();

        Self {
            decisions,
            warnings: Vec::new(),
            cancel_reason: None,
            start_time: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Records the verdict of a test that went through the rerun process.
    ///
    /// This replaces the decision made from the test's first attempt, keeping its position.
    pub fn add_decision(&mut self, verdict: Verdict, final_state: RerunState) -> &mut Self {
        self.decisions.insert(
            verdict.test_id().clone(),
            TestDecision {
                verdict,
                final_state: Some(final_state),
            },
        );
        self
    }

    /// Records a warning from policy resolution.
    pub fn add_warning(&mut self, warning: PolicyWarning) -> &mut Self {
        self.warnings.push(warning);
        self
    }

    /// Records the reason the run was cancelled.
    pub fn set_cancel_reason(&mut self, reason: CancelReason) -> &mut Self {
        self.cancel_reason = Some(reason);
        self
    }

    /// Sets the start time and duration of the run.
    pub fn set_timing(&mut self, start_time: DateTime<FixedOffset>, elapsed: Duration) -> &mut Self {
        self.start_time = Some(start_time);
        self.elapsed = elapsed;
        self
    }

    /// Builds the report.
    pub fn build(self) -> RunReport {
        let decisions: Vec<_> = self.decisions.into_values().collect();

        let mut counts = RunCounts {
            tests: decisions.len(),
            ..RunCounts::default()
        };
        for decision in &decisions {
            let verdict = &decision.verdict;
            if decision.entered_rerun() {
                counts.rerun += 1;
            }
            if verdict.is_recovered() {
                counts.recovered += 1;
            }
            if decision.is_exhausted() {
                counts.exhausted += 1;
            }
            if verdict.final_outcome() == FinalOutcome::Skipped {
                counts.skipped += 1;
            }
        }

        let overall_outcome = if decisions
            .iter()
            .any(|d| d.verdict.final_outcome().is_failure())
        {
            RunOutcome::Failed
        } else {
            RunOutcome::Passed
        };

        RunReport {
            overall_outcome,
            decisions,
            counts,
            warnings: self.warnings,
            cancel_reason: self.cancel_reason,
            start_time: self
                .start_time
                .unwrap_or_else(|| Local::now().fixed_offset()),
            elapsed: self.elapsed,
        }
    }
}
