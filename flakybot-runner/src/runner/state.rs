// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-test rerun state machine.

use crate::{model::RerunPolicy, reporter::events::CancelReason};
use std::fmt;

/// The state of a single test in the rerun process.
///
/// Tests move from [`InitialResultReceived`](Self::InitialResultReceived) to
/// [`RetryPending`](Self::RetryPending), and from there to either
/// [`Satisfied`](Self::Satisfied) or [`Exhausted`](Self::Exhausted). The latter two are final.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RerunState {
    /// The first attempt has been recorded but not yet evaluated.
    InitialResultReceived,

    /// The test needs another attempt.
    RetryPending,

    /// The test reached its required number of passes.
    Satisfied,

    /// The test can no longer reach its required number of passes.
    Exhausted(ExhaustedReason),
}

/// Why a test was exhausted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExhaustedReason {
    /// All allowed runs were used up.
    MaxRunsReached,

    /// Too few runs remain to reach the required number of passes.
    CannotSatisfy,

    /// The run was cancelled before the test finished.
    Cancelled(CancelReason),
}

impl RerunState {
    /// Evaluates the state of a test after an attempt has been recorded.
    ///
    /// The rules are applied in order:
    ///
    /// 1. `pass_count >= min_passes` is satisfied, even if runs remain.
    /// 2. `total_runs >= max_runs` is exhausted.
    /// 3. If fewer runs remain than passes are still needed, the test is exhausted early.
    /// 4. Otherwise another attempt is needed.
    pub fn evaluate(policy: &RerunPolicy, pass_count: u32, total_runs: u32) -> Self {
        if pass_count >= policy.min_passes() {
            Self::Satisfied
        } else if total_runs >= policy.max_runs() {
            Self::Exhausted(ExhaustedReason::MaxRunsReached)
        } else if policy.max_runs() - total_runs < policy.min_passes() - pass_count {
            Self::Exhausted(ExhaustedReason::CannotSatisfy)
        } else {
            Self::RetryPending
        }
    }

    /// Transitions a non-final state to exhausted because of cancellation.
    ///
    /// Final states are returned unchanged.
    pub fn cancel(self, reason: CancelReason) -> Self {
        if self.is_final() {
            self
        } else {
            Self::Exhausted(ExhaustedReason::Cancelled(reason))
        }
    }

    /// Returns true if this is a final state.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Satisfied | Self::Exhausted(_))
    }

    /// Returns true if another attempt should be issued.
    pub fn is_retry_pending(self) -> bool {
        self == Self::RetryPending
    }
}

impl fmt::Display for RerunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitialResultReceived => write!(f, "initial result received"),
            Self::RetryPending => write!(f, "retry pending"),
            Self::Satisfied => write!(f, "satisfied"),
            Self::Exhausted(ExhaustedReason::MaxRunsReached) => {
                write!(f, "exhausted (max runs reached)")
            }
            Self::Exhausted(ExhaustedReason::CannotSatisfy) => {
                write!(f, "exhausted (cannot reach required passes)")
            }
            Self::Exhausted(ExhaustedReason::Cancelled(reason)) => {
                write!(f, "exhausted (cancelled: {})", reason.to_static_str())
            }
        }
    }
}

/// Returns the number of runs left under `policy` after `total_runs` runs.
pub fn runs_remaining(policy: &RerunPolicy, total_runs: u32) -> u32 {
    policy.max_runs().saturating_sub(total_runs)
}
