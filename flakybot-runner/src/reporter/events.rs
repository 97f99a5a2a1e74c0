// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events emitted by the rerun runner.
//!
//! These events are consumed by reporters as the run progresses.

use crate::{
    model::{Attempt, RerunPolicy, TestId},
    policy::PolicyResolution,
    reporter::RunOutcome,
    runner::RerunState,
    verdict::Verdict,
};
use chrono::{DateTime, FixedOffset};
use std::time::Duration;

/// An event that occurred during a flakybot run.
#[derive(Clone, Debug)]
pub struct RerunEvent {
    /// The time at which the event was generated, including the offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The amount of time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of event this is.
    pub kind: RerunEventKind,
}

/// The kind of rerun event this is.
#[derive(Clone, Debug)]
pub enum RerunEventKind {
    /// The run started.
    RunStarted {
        /// The number of tests in the initial results.
        test_count: usize,

        /// The number of tests whose first attempt failed.
        failing_count: usize,
    },

    /// A rerun policy was resolved for a test whose first attempt failed.
    PolicyResolved {
        /// The test the policy is for.
        test_id: TestId,

        /// The resolved policy and where it came from.
        resolution: PolicyResolution,
    },

    /// An attempt of a failing test was recorded and evaluated.
    ///
    /// This is emitted for the initial attempt as well as every rerun.
    AttemptFinished {
        /// The attempt that was recorded.
        attempt: Attempt,

        /// The policy in effect.
        policy: RerunPolicy,

        /// The number of passes so far.
        pass_count: u32,

        /// The number of runs so far.
        total_runs: u32,

        /// The number of runs left under the policy.
        runs_remaining: u32,

        /// The state of the test after evaluating this attempt.
        state: RerunState,
    },

    /// A test that entered the rerun process reached a final state.
    TestFinished {
        /// The verdict for the test.
        verdict: Verdict,

        /// The final state of the test.
        state: RerunState,
    },

    /// A cancellation notice was received.
    RunBeginCancel {
        /// The reason the run is being cancelled.
        reason: CancelReason,

        /// The number of tests still being rerun.
        running: usize,
    },

    /// The run finished.
    RunFinished {
        /// The overall outcome.
        outcome: RunOutcome,

        /// The reason the run was cancelled, if it was.
        cancel_reason: Option<CancelReason>,
    },
}

// Note: the order here matters -- it indicates severity of cancellation
/// The reason why a run is being cancelled.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CancelReason {
    /// Cancellation was requested through a [`CancelHandle`](crate::runner::CancelHandle).
    Requested,

    /// The profile's global timeout was reached.
    GlobalTimeout,

    /// A termination signal (on Unix, SIGTERM or SIGHUP) was received.
    Signal,

    /// An interrupt (on Unix, Ctrl-C) was received.
    Interrupt,
}

impl CancelReason {
    /// Returns a short description of the reason.
    pub fn to_static_str(self) -> &'static str {
        match self {
            CancelReason::Requested => "requested",
            CancelReason::GlobalTimeout => "global timeout",
            CancelReason::Signal => "signal",
            CancelReason::Interrupt => "interrupt",
        }
    }
}
