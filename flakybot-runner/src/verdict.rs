// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reduction of a test's history into a final verdict.

use crate::model::{Outcome, RerunPolicy, TestHistory, TestId};
use std::fmt;

/// The final outcome of a test.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FinalOutcome {
    /// The test passed at least `min_passes` times.
    Passed,

    /// The test passed fewer than `min_passes` times.
    Failed,

    /// The test was skipped, and never entered the rerun process.
    ///
    /// Skipped tests do not cause the run to fail.
    Skipped,
}

impl FinalOutcome {
    /// Returns true if this outcome fails the run.
    pub fn is_failure(self) -> bool {
        self == Self::Failed
    }

    /// Returns a short upper-case name for this outcome.
    pub fn to_static_str(self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for FinalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_static_str())
    }
}

/// The final verdict for a test. Computed once from a policy and a history.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Verdict {
    test_id: TestId,
    final_outcome: FinalOutcome,
    pass_count: u32,
    total_runs: u32,
    policy: RerunPolicy,
    history: TestHistory,
}

impl Verdict {
    /// Computes the verdict for a finalized history, using the policy recorded in it.
    pub fn from_history(history: TestHistory) -> Self {
        let test_id = history.test_id().clone();
        let policy = history.policy().clone();
        aggregate(test_id, policy, history)
    }

    /// The test this verdict is for.
    pub fn test_id(&self) -> &TestId {
        &self.test_id
    }

    /// The final outcome.
    pub fn final_outcome(&self) -> FinalOutcome {
        self.final_outcome
    }

    /// The number of attempts that passed.
    pub fn pass_count(&self) -> u32 {
        self.pass_count
    }

    /// The total number of attempts.
    pub fn total_runs(&self) -> u32 {
        self.total_runs
    }

    /// The policy the verdict was computed under.
    pub fn policy(&self) -> &RerunPolicy {
        &self.policy
    }

    /// The full history of attempts.
    pub fn history(&self) -> &TestHistory {
        &self.history
    }

    /// Returns true if the first attempt failed but the test went on to pass.
    pub fn is_recovered(&self) -> bool {
        self.final_outcome == FinalOutcome::Passed && self.history.first().outcome.is_failure()
    }

    /// Returns a one-line summary, for example `t passed 1 out of the required 2 times.`
    pub fn explanation(&self) -> String {
        format!(
            "{} passed {} out of the required {} times.",
            self.test_id,
            self.pass_count,
            self.policy.min_passes(),
        )
    }
}

/// Aggregates a test's history into a verdict.
///
/// This is a pure function: the final outcome is `Passed` if and only if the number of passing
/// attempts is at least `policy.min_passes()`. A test whose only attempt was skipped is
/// `Skipped`.
pub fn aggregate(test_id: TestId, policy: RerunPolicy, history: TestHistory) -> Verdict {
    let pass_count = history.pass_count();
    let total_runs = history.total_runs();

    let final_outcome = if pass_count >= policy.min_passes() {
        FinalOutcome::Passed
    } else if total_runs == 1 && history.first().outcome == Outcome::Skipped {
        FinalOutcome::Skipped
    } else {
        FinalOutcome::Failed
    };

    Verdict {
        test_id,
        final_outcome,
        pass_count,
        total_runs,
        policy,
        history,
    }
}
