// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The result model: test identifiers, attempts, rerun policies and test histories.

use crate::errors::ExecutionError;
use smol_str::SmolStr;
use std::{borrow::Borrow, fmt, time::Duration};

/// A stable, opaque identifier for a test, for example `tests/test_api.py::test_timeout`.
///
/// Identifiers are compared by exact string match.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TestId(SmolStr);

impl TestId {
    /// Creates a new test identifier.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns true if the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn to_smol_str(&self) -> SmolStr {
        self.0.clone()
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Borrow<str> for TestId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for TestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TestId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// The outcome of a single attempt at running a test.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Outcome {
    /// The test passed.
    Passed,

    /// The test failed an assertion.
    Failed,

    /// The test hit an error during setup, collection or execution.
    Errored,

    /// The test was skipped.
    Skipped,
}

impl Outcome {
    /// Returns true if this outcome counts as a pass.
    #[inline]
    pub fn is_success(self) -> bool {
        self == Self::Passed
    }

    /// Returns true if this outcome counts as a failure for rerun purposes.
    ///
    /// Both [`Self::Failed`] and [`Self::Errored`] are failures.
    #[inline]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Errored)
    }

    /// Returns a short upper-case name for this outcome.
    pub fn to_static_str(self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Errored => "ERRORED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_static_str())
    }
}

/// One execution of a test and its recorded outcome.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attempt {
    /// The test that was run.
    pub test_id: TestId,

    /// The 1-based attempt number.
    pub attempt_number: u32,

    /// The outcome of the attempt.
    pub outcome: Outcome,

    /// The type of error, for example an exception class name.
    pub error_type: Option<String>,

    /// The error message.
    pub error_message: Option<String>,

    /// The location of the failure, in `file:line` form.
    pub location: Option<String>,

    /// The time the attempt took, if known.
    pub time_taken: Option<Duration>,
}

impl Attempt {
    /// Creates a new attempt with no error details.
    pub fn new(test_id: impl Into<TestId>, attempt_number: u32, outcome: Outcome) -> Self {
        Self {
            test_id: test_id.into(),
            attempt_number,
            outcome,
            error_type: None,
            error_message: None,
            location: None,
            time_taken: None,
        }
    }

    /// Sets the error type.
    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Sets the error message.
    pub fn with_error_message(mut self, error_message: impl Into<String>) -> Self {
        self.error_message = Some(error_message.into());
        self
    }

    /// Sets the failure location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the time taken.
    pub fn with_time_taken(mut self, time_taken: Duration) -> Self {
        self.time_taken = Some(time_taken);
        self
    }

    /// Creates an errored attempt out of a failure to execute the test at all.
    pub fn from_execution_error(
        test_id: impl Into<TestId>,
        attempt_number: u32,
        error: &ExecutionError,
    ) -> Self {
        Self::new(test_id, attempt_number, Outcome::Errored)
            .with_error_type(error.kind_str())
            .with_error_message(crate::errors::DisplayErrorChain::new(error).to_string())
    }

    /// Returns true if any of the error details are set.
    pub fn has_error_details(&self) -> bool {
        self.error_type.is_some() || self.error_message.is_some() || self.location.is_some()
    }
}

/// The rerun policy for a single test: how many passes it needs, and how many runs it may use.
///
/// The invariant `1 <= min_passes <= max_runs` always holds.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RerunPolicy {
    test_id: TestId,
    min_passes: u32,
    max_runs: u32,
}

impl RerunPolicy {
    /// Creates a new policy, clamping `min_passes` to at least 1 and `max_runs` to at least
    /// `min_passes`.
    pub fn new(test_id: impl Into<TestId>, min_passes: u32, max_runs: u32) -> Self {
        let min_passes = min_passes.max(1);
        let max_runs = max_runs.max(min_passes);
        Self {
            test_id: test_id.into(),
            min_passes,
            max_runs,
        }
    }

    /// The policy for a test with no flakiness data: one run, which must pass.
    ///
    /// This is also the policy recorded for tests that never entered the rerun process.
    pub fn fallback(test_id: impl Into<TestId>) -> Self {
        Self::new(test_id, 1, 1)
    }

    /// The test this policy applies to.
    pub fn test_id(&self) -> &TestId {
        &self.test_id
    }

    /// The minimum number of passes required.
    pub fn min_passes(&self) -> u32 {
        self.min_passes
    }

    /// The maximum number of runs allowed, including the first attempt.
    pub fn max_runs(&self) -> u32 {
        self.max_runs
    }

    /// Returns true if this policy never allows a rerun.
    pub fn is_single_run(&self) -> bool {
        self.max_runs == 1
    }
}

impl fmt::Display for RerunPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min-passes = {}, max-runs = {}",
            self.min_passes, self.max_runs
        )
    }
}

/// The ordered attempts of one test, together with its rerun policy.
///
/// Attempts are only ever appended, with strictly increasing attempt numbers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestHistory {
    test_id: TestId,
    policy: RerunPolicy,
    /// This is guaranteed to be non-empty.
    attempts: Vec<Attempt>,
}

#[allow(clippy::len_without_is_empty)] // TestHistory is never empty
impl TestHistory {
    /// Creates a new history from the first attempt of a test.
    ///
    /// The first attempt is renumbered to 1 if necessary.
    pub fn new(mut first: Attempt, policy: RerunPolicy) -> Self {
        first.attempt_number = 1;
        Self {
            test_id: first.test_id.clone(),
            policy,
            attempts: vec![first],
        }
    }

    /// The test this history is for.
    pub fn test_id(&self) -> &TestId {
        &self.test_id
    }

    /// The rerun policy in effect for this test.
    pub fn policy(&self) -> &RerunPolicy {
        &self.policy
    }

    /// The attempts, in order.
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// The first attempt.
    pub fn first(&self) -> &Attempt {
        self.attempts.first().expect("test history is non-empty")
    }

    /// The most recent attempt.
    pub fn last(&self) -> &Attempt {
        self.attempts.last().expect("test history is non-empty")
    }

    /// The number of attempts that passed.
    pub fn pass_count(&self) -> u32 {
        self.attempts
            .iter()
            .filter(|attempt| attempt.outcome.is_success())
            .count() as u32
    }

    /// The total number of attempts.
    pub fn total_runs(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Returns the number of attempts, as a `usize`.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// The attempt number the next attempt will get.
    pub fn next_attempt_number(&self) -> u32 {
        self.total_runs() + 1
    }

    /// Appends an attempt, overwriting its test ID and attempt number so that they stay
    /// consistent with this history.
    pub(crate) fn push(&mut self, mut attempt: Attempt) -> &Attempt {
        attempt.test_id = self.test_id.clone();
        attempt.attempt_number = self.next_attempt_number();
        self.attempts.push(attempt);
        self.last()
    }
}
