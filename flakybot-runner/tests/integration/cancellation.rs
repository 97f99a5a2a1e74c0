// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use flakybot_runner::{
    model::{Outcome, RerunPolicy},
    reporter::{RunOutcome, events::{CancelReason, RerunEventKind}},
    runner::{CancelHandle, ExhaustedReason, RerunRunnerBuilder, RerunState},
    stats::{StaticStatsClient, SuggestedPolicy},
    verdict::FinalOutcome,
};
use pretty_assertions::assert_eq;
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

#[test]
fn cancel_handle_stops_reruns() {
    let initial = initial(&[
        ("ok", Outcome::Passed),
        ("first", Outcome::Failed),
        ("second", Outcome::Failed),
    ]);
    let mut stats = StaticStatsClient::new();
    stats
        .insert("first", SuggestedPolicy::new(3, 5))
        .insert("second", SuggestedPolicy::new(1, 3));

    let handle: Arc<OnceLock<CancelHandle>> = Arc::new(OnceLock::new());
    let mut executor = ScriptedExecutor::new();
    executor.script("first", [Scripted::Hang]);
    {
        let handle = handle.clone();
        executor.set_on_call(move |_, _| {
            if let Some(handle) = handle.get() {
                handle.cancel();
            }
        });
    }
    let executor = Arc::new(executor);

    // With a single thread, "second" is only started once "first" has finished.
    let runner = build_runner(RerunRunnerBuilder::default(), stats, executor.clone());
    handle
        .set(runner.cancel_handle())
        .expect("handle set only once");
    let (report, events) = execute(runner, &initial);

    assert_eq!(executor.calls_for("first"), vec![2]);
    assert_eq!(executor.calls_for("second"), Vec::<u32>::new());
    assert_eq!(report.cancel_reason, Some(CancelReason::Requested));
    assert_eq!(report.overall_outcome, RunOutcome::Failed);

    let cancelled = RerunState::Exhausted(ExhaustedReason::Cancelled(CancelReason::Requested));
    let first = &report.decisions[1];
    assert_eq!(first.final_state, Some(cancelled));
    assert_eq!(first.verdict.final_outcome(), FinalOutcome::Failed);
    assert_eq!(
        first.verdict.total_runs(),
        1,
        "the abandoned attempt isn't recorded"
    );
    assert_eq!(first.verdict.policy(), &RerunPolicy::new("first", 3, 5));

    let second = &report.decisions[2];
    assert_eq!(second.final_state, Some(cancelled));
    assert_eq!(second.verdict.policy(), &RerunPolicy::fallback("second"));

    assert_eq!(
        report.decisions[0].verdict.final_outcome(),
        FinalOutcome::Passed
    );
    assert_eq!(report.counts.exhausted, 2);

    let cancels: Vec<_> = events
        .iter()
        .filter_map(|event| match &event.kind {
            RerunEventKind::RunBeginCancel { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect();
    assert_eq!(cancels, vec![CancelReason::Requested]);
}

#[test]
fn global_timeout_stops_reruns() {
    let initial = initial(&[("hangs", Outcome::Failed), ("ok", Outcome::Passed)]);
    let mut stats = StaticStatsClient::new();
    stats.insert("hangs", SuggestedPolicy::new(1, 3));
    let mut executor = ScriptedExecutor::new();
    executor.script("hangs", [Scripted::Hang]);
    let executor = Arc::new(executor);

    let mut builder = RerunRunnerBuilder::default();
    builder.set_global_timeout(Duration::from_millis(50));
    let runner = build_runner(builder, stats, executor.clone());
    let (report, events) = execute(runner, &initial);

    assert_eq!(executor.calls_for("hangs"), vec![2]);
    assert_eq!(report.cancel_reason, Some(CancelReason::GlobalTimeout));
    assert_eq!(report.overall_outcome, RunOutcome::Failed);
    assert_eq!(
        report.decisions[0].final_state,
        Some(RerunState::Exhausted(ExhaustedReason::Cancelled(
            CancelReason::GlobalTimeout
        )))
    );
    assert!(
        events.iter().any(|event| matches!(
            event.kind,
            RerunEventKind::RunBeginCancel {
                reason: CancelReason::GlobalTimeout,
                ..
            }
        )),
        "cancellation was reported"
    );
}

#[test]
fn cancelled_before_start() {
    let initial = initial(&[("a", Outcome::Failed), ("b", Outcome::Passed)]);
    let mut stats = StaticStatsClient::new();
    stats.insert("a", SuggestedPolicy::new(1, 3));
    let executor = Arc::new(ScriptedExecutor::new());

    let runner = build_runner(RerunRunnerBuilder::default(), stats, executor.clone());
    let handle = runner.cancel_handle();
    handle.cancel();
    assert!(handle.is_cancelled());
    let (report, events) = execute(runner, &initial);

    assert!(executor.calls().is_empty());
    assert_eq!(report.cancel_reason, Some(CancelReason::Requested));
    assert_eq!(
        report.decisions[0].verdict.final_outcome(),
        FinalOutcome::Failed
    );
    assert_eq!(
        report.decisions[1].verdict.final_outcome(),
        FinalOutcome::Passed
    );
    assert!(
        events.iter().any(|event| matches!(
            event.kind,
            RerunEventKind::RunBeginCancel { running: 0, .. }
        )),
        "cancellation was reported with nothing running"
    );
}

#[test]
fn cancelled_with_nothing_to_rerun_still_passes() {
    let initial = initial(&[("a", Outcome::Passed)]);
    let executor = Arc::new(ScriptedExecutor::new());

    let runner = build_runner(
        RerunRunnerBuilder::default(),
        StaticStatsClient::new(),
        executor,
    );
    runner.cancel_handle().cancel();
    let (report, _) = execute(runner, &initial);

    assert_eq!(report.cancel_reason, Some(CancelReason::Requested));
    assert_eq!(report.overall_outcome, RunOutcome::Passed);
}

#[test]
fn global_timeout_interrupts_policy_lookup() {
    let initial = initial(&[("slow-lookup", Outcome::Failed), ("ok", Outcome::Passed)]);
    let executor = Arc::new(ScriptedExecutor::new());

    let mut builder = RerunRunnerBuilder::default();
    builder.set_global_timeout(Duration::from_millis(50));
    let runner = build_runner(builder, UnresponsiveStats, executor.clone());
    let (report, events) = execute(runner, &initial);

    assert!(executor.calls().is_empty());
    assert_eq!(report.cancel_reason, Some(CancelReason::GlobalTimeout));
    assert_eq!(report.overall_outcome, RunOutcome::Failed);

    let decision = &report.decisions[0];
    assert_eq!(
        decision.final_state,
        Some(RerunState::Exhausted(ExhaustedReason::Cancelled(
            CancelReason::GlobalTimeout
        )))
    );
    assert_eq!(
        decision.verdict.policy(),
        &RerunPolicy::fallback("slow-lookup")
    );
    assert_eq!(decision.verdict.total_runs(), 1);
    assert!(report.warnings.is_empty(), "no policy was resolved");
    assert!(
        !events
            .iter()
            .any(|event| matches!(event.kind, RerunEventKind::PolicyResolved { .. })),
        "no policy was resolved"
    );
}
