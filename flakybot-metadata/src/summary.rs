// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::FlakybotExitCode;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// The version of the summary format produced by this crate.
pub const SUMMARY_FORMAT_VERSION: u32 = 1;

/// A machine-readable summary of a flakybot run.
///
/// Produced by `flakybot run --json-out <path>`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct RunSummary {
    /// The format version, currently [`SUMMARY_FORMAT_VERSION`].
    pub format_version: u32,

    /// The outcome of the run as a whole.
    pub outcome: RunOutcomeSummary,

    /// If the run was cancelled, a description of why.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,

    /// Summary counts.
    pub counts: RunCountsSummary,

    /// Per-test verdicts, in the order tests were first seen in the initial results.
    pub tests: Vec<TestSummary>,

    /// Non-fatal warnings produced while resolving rerun policies.
    #[serde(default)]
    pub warnings: Vec<PolicyWarningSummary>,
}

impl RunSummary {
    /// Creates a new summary with the current format version.
    pub fn new(
        outcome: RunOutcomeSummary,
        cancel_reason: Option<String>,
        counts: RunCountsSummary,
        tests: Vec<TestSummary>,
        warnings: Vec<PolicyWarningSummary>,
    ) -> Self {
        Self {
            format_version: SUMMARY_FORMAT_VERSION,
            outcome,
            cancel_reason,
            counts,
            tests,
            warnings,
        }
    }

    /// Returns the process exit code corresponding to this summary.
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcomeSummary::Passed => FlakybotExitCode::OK,
            RunOutcomeSummary::Failed => FlakybotExitCode::TEST_RUN_FAILED,
        }
    }
}

/// The outcome of a run as a whole.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcomeSummary {
    /// Every verdict passed (or was skipped).
    Passed,

    /// At least one verdict failed.
    Failed,
}

/// Counts over the tests in a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunCountsSummary {
    /// The number of tests in the initial results.
    pub tests: usize,

    /// The number of tests that failed their first attempt and entered the rerun process.
    pub rerun: usize,

    /// The number of rerun tests that went on to meet their required pass count.
    pub recovered: usize,

    /// The number of rerun tests that did not meet their required pass count.
    pub exhausted: usize,

    /// The number of tests that were skipped in the initial results.
    pub skipped: usize,
}

/// The final verdict for a single test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestSummary {
    /// The test identifier.
    pub test_id: SmolStr,

    /// The final outcome.
    pub outcome: VerdictOutcomeSummary,

    /// The number of attempts that passed.
    pub pass_count: u32,

    /// The total number of attempts.
    pub total_runs: u32,

    /// The minimum number of passes the policy required.
    pub min_passes: u32,

    /// The maximum number of runs the policy allowed.
    pub max_runs: u32,

    /// The attempts, in order.
    pub attempts: Vec<AttemptSummary>,
}

/// The final outcome of a single test.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerdictOutcomeSummary {
    /// The test met its required pass count.
    Passed,

    /// The test did not meet its required pass count.
    Failed,

    /// The test was skipped and never run.
    Skipped,
}

/// A single attempt at running a test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AttemptSummary {
    /// The 1-based attempt number.
    pub attempt: u32,

    /// The outcome of this attempt.
    pub outcome: AttemptOutcomeSummary,

    /// The type of error (for example an exception class), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// The error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// The location of the failure in `file:line` form, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// The outcome of a single attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptOutcomeSummary {
    /// The attempt passed.
    Passed,

    /// The attempt failed an assertion.
    Failed,

    /// The attempt hit an error in setup, collection or execution.
    Errored,

    /// The attempt was skipped.
    Skipped,
}

/// A policy-resolution warning.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PolicyWarningSummary {
    /// The test the warning applies to.
    pub test_id: SmolStr,

    /// A human-readable description of the warning.
    pub message: String,
}
