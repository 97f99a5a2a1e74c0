// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use flakybot_runner::{
    config::RerunConcurrency,
    errors::ExecutionError,
    model::{Outcome, RerunPolicy},
    policy::PolicyWarningKind,
    reporter::{RunOutcome, events::RerunEventKind},
    runner::{ExhaustedReason, RerunRunnerBuilder, RerunState},
    stats::{StaticStatsClient, SuggestedPolicy},
    verdict::FinalOutcome,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn stats(policies: &[(&str, i64, i64)]) -> StaticStatsClient {
    let mut stats = StaticStatsClient::new();
    for (test_id, min_passes, max_runs) in policies {
        stats.insert(*test_id, SuggestedPolicy::new(*min_passes, *max_runs));
    }
    stats
}

#[test]
fn recovers_after_one_rerun() -> Result<()> {
    let initial = initial(&[("flaky", Outcome::Failed)]);
    let mut executor = ScriptedExecutor::new();
    executor.outcomes("flaky", [Outcome::Passed]);
    let executor = Arc::new(executor);

    let runner = build_runner(
        RerunRunnerBuilder::default(),
        stats(&[("flaky", 1, 5)]),
        executor.clone(),
    );
    let (report, events) = execute(runner, &initial);

    assert_eq!(executor.calls_for("flaky"), vec![2]);
    assert_eq!(report.overall_outcome, RunOutcome::Passed);
    let decision = &report.decisions[0];
    assert_eq!(decision.verdict.final_outcome(), FinalOutcome::Passed);
    assert_eq!(decision.verdict.pass_count(), 1);
    assert_eq!(decision.verdict.total_runs(), 2);
    assert_eq!(decision.final_state, Some(RerunState::Satisfied));
    assert_eq!(report.counts.recovered, 1);

    let remaining: Vec<_> = events
        .iter()
        .filter_map(|event| match &event.kind {
            RerunEventKind::AttemptFinished {
                attempt,
                runs_remaining,
                ..
            } => Some((attempt.attempt_number, *runs_remaining)),
            _ => None,
        })
        .collect();
    assert_eq!(remaining, vec![(1, 4), (2, 3)]);

    ensure!(
        matches!(
            events.last().map(|e| &e.kind),
            Some(RerunEventKind::RunFinished {
                outcome: RunOutcome::Passed,
                cancel_reason: None,
            })
        ),
        "run finished is the last event"
    );
    Ok(())
}

#[test]
fn exhausts_max_runs() {
    let initial = initial(&[("flaky", Outcome::Failed)]);
    let mut executor = ScriptedExecutor::new();
    executor.outcomes("flaky", [Outcome::Passed, Outcome::Failed]);
    let executor = Arc::new(executor);

    let runner = build_runner(
        RerunRunnerBuilder::default(),
        stats(&[("flaky", 2, 3)]),
        executor.clone(),
    );
    let (report, _) = execute(runner, &initial);

    assert_eq!(executor.calls_for("flaky"), vec![2, 3]);
    let verdict = &report.decisions[0].verdict;
    assert_eq!(verdict.final_outcome(), FinalOutcome::Failed);
    assert_eq!((verdict.pass_count(), verdict.total_runs()), (1, 3));
    assert_eq!(
        report.decisions[0].final_state,
        Some(RerunState::Exhausted(ExhaustedReason::MaxRunsReached))
    );
    assert_eq!(
        verdict.explanation(),
        "flaky passed 1 out of the required 2 times."
    );
    assert_eq!(report.overall_outcome, RunOutcome::Failed);
}

#[test]
fn exits_early_when_passes_are_out_of_reach() {
    let initial = initial(&[("flaky", Outcome::Failed)]);
    let executor = Arc::new(ScriptedExecutor::new());

    let runner = build_runner(
        RerunRunnerBuilder::default(),
        stats(&[("flaky", 2, 2)]),
        executor.clone(),
    );
    let (report, _) = execute(runner, &initial);

    assert!(executor.calls().is_empty(), "no second attempt");
    let decision = &report.decisions[0];
    assert_eq!(decision.verdict.final_outcome(), FinalOutcome::Failed);
    assert_eq!(decision.verdict.total_runs(), 1);
    assert_eq!(
        decision.final_state,
        Some(RerunState::Exhausted(ExhaustedReason::CannotSatisfy))
    );
}

#[test]
fn one_exhausted_test_fails_the_run() {
    let initial = initial(&[
        ("a", Outcome::Passed),
        ("b", Outcome::Passed),
        ("flaky", Outcome::Failed),
        ("c", Outcome::Passed),
        ("d", Outcome::Passed),
        ("e", Outcome::Passed),
    ]);
    let mut executor = ScriptedExecutor::new();
    executor.outcomes("flaky", [Outcome::Failed, Outcome::Failed]);
    let executor = Arc::new(executor);

    let runner = build_runner(
        RerunRunnerBuilder::default(),
        stats(&[("flaky", 1, 3), ("a", 5, 10)]),
        executor.clone(),
    );
    let (report, events) = execute(runner, &initial);

    assert_eq!(report.overall_outcome, RunOutcome::Failed);
    assert_eq!(report.exit_code(), 100);
    let failed: Vec<_> = report
        .failed_verdicts()
        .map(|v| v.test_id().as_str())
        .collect();
    assert_eq!(failed, vec!["flaky"]);
    for decision in &report.decisions {
        if decision.verdict.test_id().as_str() != "flaky" {
            assert_eq!(decision.verdict.final_outcome(), FinalOutcome::Passed);
            assert_eq!(decision.verdict.total_runs(), 1);
        }
    }

    // Tests that passed the first time never get a policy.
    let resolved: Vec<_> = events
        .iter()
        .filter_map(|event| match &event.kind {
            RerunEventKind::PolicyResolved { test_id, .. } => Some(test_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(resolved, vec!["flaky"]);
    assert_eq!(executor.calls_for("a"), Vec::<u32>::new());
}

#[test]
fn skipped_tests_are_not_rerun() {
    let initial = initial(&[("skipped", Outcome::Skipped), ("ok", Outcome::Passed)]);
    let executor = Arc::new(ScriptedExecutor::new());

    let runner = build_runner(
        RerunRunnerBuilder::default(),
        stats(&[("skipped", 2, 4)]),
        executor.clone(),
    );
    let (report, _) = execute(runner, &initial);

    assert!(executor.calls().is_empty());
    assert_eq!(report.overall_outcome, RunOutcome::Passed);
    assert_eq!(
        report.decisions[0].verdict.final_outcome(),
        FinalOutcome::Skipped
    );
    assert_eq!(report.decisions[0].verdict.total_runs(), 1);
    assert_eq!(report.counts.skipped, 1);
}

#[test]
fn execution_errors_become_errored_attempts() {
    let initial = initial(&[("flaky", Outcome::Failed)]);
    let mut executor = ScriptedExecutor::new();
    executor.script(
        "flaky",
        [
            Scripted::Error(ExecutionError::Other {
                message: "worker crashed".to_owned(),
            }),
            Scripted::Outcome(Outcome::Passed),
        ],
    );
    let executor = Arc::new(executor);

    let runner = build_runner(
        RerunRunnerBuilder::default(),
        stats(&[("flaky", 1, 3)]),
        executor.clone(),
    );
    let (report, _) = execute(runner, &initial);

    let verdict = &report.decisions[0].verdict;
    assert_eq!(verdict.final_outcome(), FinalOutcome::Passed);
    assert_eq!(verdict.total_runs(), 3, "the errored attempt counts as a run");
    let errored = &verdict.history().attempts()[1];
    assert_eq!(errored.outcome, Outcome::Errored);
    assert_eq!(errored.error_type.as_deref(), Some("ExecutionError"));
    assert_eq!(errored.error_message.as_deref(), Some("worker crashed"));
}

#[test]
fn unknown_tests_use_the_fallback_policy() {
    let initial = initial(&[("unknown", Outcome::Failed)]);
    let executor = Arc::new(ScriptedExecutor::new());

    let runner = build_runner(
        RerunRunnerBuilder::default(),
        StaticStatsClient::new(),
        executor.clone(),
    );
    let (report, _) = execute(runner, &initial);

    assert!(executor.calls().is_empty());
    let verdict = &report.decisions[0].verdict;
    assert_eq!(verdict.policy(), &RerunPolicy::fallback("unknown"));
    assert_eq!(verdict.final_outcome(), FinalOutcome::Failed);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].kind, PolicyWarningKind::NotFound);
    assert_eq!(report.notable_warnings().count(), 0);
}

#[test]
fn unreachable_stats_use_the_fallback_policy() {
    let initial = initial(&[("a", Outcome::Failed), ("b", Outcome::Errored)]);
    let executor = Arc::new(ScriptedExecutor::new());

    let runner = build_runner(RerunRunnerBuilder::default(), UnreachableStats, executor.clone());
    let (report, _) = execute(runner, &initial);

    assert!(executor.calls().is_empty());
    for decision in &report.decisions {
        assert_eq!(decision.verdict.policy().min_passes(), 1);
        assert_eq!(decision.verdict.policy().max_runs(), 1);
        assert_eq!(decision.verdict.final_outcome(), FinalOutcome::Failed);
    }
    let warnings: Vec<_> = report
        .notable_warnings()
        .map(|w| w.test_id.as_str())
        .collect();
    assert_eq!(warnings, vec!["a", "b"]);
    assert!(matches!(
        report.warnings[0].kind,
        PolicyWarningKind::Transport { .. }
    ));
}

#[test]
fn concurrent_tests_keep_attempts_in_order() {
    let ids = ["t0", "t1", "t2", "t3", "t4", "t5"];
    let outcomes: Vec<_> = ids.iter().map(|id| (*id, Outcome::Failed)).collect();
    let initial = initial(&outcomes);
    let mut executor = ScriptedExecutor::new();
    let mut stats = StaticStatsClient::new();
    for id in ids {
        executor.outcomes(id, [Outcome::Failed, Outcome::Passed, Outcome::Passed]);
        stats.insert(id, SuggestedPolicy::new(2, 4));
    }
    let executor = Arc::new(executor);

    let mut builder = RerunRunnerBuilder::default();
    builder.set_test_threads("4".parse::<RerunConcurrency>().expect("valid concurrency"));
    let runner = build_runner(builder, stats, executor.clone());
    let (report, _) = execute(runner, &initial);

    assert_eq!(report.overall_outcome, RunOutcome::Passed);
    for id in ids {
        assert_eq!(executor.calls_for(id), vec![2, 3, 4], "attempts for {id}");
    }
    let order: Vec<_> = report
        .decisions
        .iter()
        .map(|d| d.verdict.test_id().as_str())
        .collect();
    assert_eq!(order, ids, "report follows the initial results");
}
