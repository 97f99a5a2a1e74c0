// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    ExhaustedReason, RerunState, TestExecutor,
    dispatcher::{DispatcherContext, request_cancel},
    runs_remaining,
};
use crate::{
    config::RerunConcurrency,
    errors::{DisplayErrorChain, RerunRunnerBuildError},
    initial_results::InitialResults,
    model::{Attempt, RerunPolicy, TestHistory},
    policy::{PolicyCache, PolicyResolver, PolicyWarning},
    reporter::{
        ReportBuilder, RunReport,
        events::{CancelReason, RerunEvent, RerunEventKind},
    },
    signal::{SignalHandler, SignalHandlerKind},
    stats::StatsClient,
    verdict::Verdict,
};
use chrono::Local;
use future_queue::{FutureQueueContext, StreamExt as _};
use futures::prelude::*;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    runtime::Runtime,
    sync::{
        mpsc::{UnboundedSender, unbounded_channel},
        watch,
    },
};
use tracing::{debug, warn};

/// Rerun runner options.
#[derive(Debug, Default)]
pub struct RerunRunnerBuilder {
    test_threads: Option<RerunConcurrency>,
    global_timeout: Option<Duration>,
}

impl RerunRunnerBuilder {
    /// Sets the number of tests to rerun simultaneously.
    ///
    /// Attempts of a single test are always run one after the other. Defaults to 1.
    pub fn set_test_threads(&mut self, test_threads: RerunConcurrency) -> &mut Self {
        self.test_threads = Some(test_threads);
        self
    }

    /// Sets the maximum amount of time the whole run may take.
    ///
    /// Once this is reached the run is cancelled with [`CancelReason::GlobalTimeout`].
    pub fn set_global_timeout(&mut self, global_timeout: Duration) -> &mut Self {
        self.global_timeout = Some(global_timeout);
        self
    }

    /// Creates a new rerun runner.
    pub fn build(
        self,
        stats: Arc<dyn StatsClient>,
        executor: Arc<dyn TestExecutor>,
        signal_handler: SignalHandlerKind,
    ) -> Result<RerunRunner, RerunRunnerBuildError> {
        let test_threads = self.test_threads.unwrap_or_default().get();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("flakybot-runner-worker")
            .build()
            .map_err(RerunRunnerBuildError::TokioRuntimeCreate)?;
        let _guard = runtime.enter();

        // signal_handler.build() must be called from within the guard.
        let signal_handler = signal_handler.build()?;

        let (cancel_tx, _) = watch::channel(None);

        Ok(RerunRunner {
            inner: RerunRunnerInner {
                test_threads,
                global_timeout: self.global_timeout,
                stats,
                executor,
                runtime,
            },
            signal_handler,
            cancel_tx: Arc::new(cancel_tx),
        })
    }
}

/// Context for rerunning failed tests.
///
/// Created using [`RerunRunnerBuilder::build`].
#[derive(Debug)]
pub struct RerunRunner {
    inner: RerunRunnerInner,
    signal_handler: SignalHandler,
    cancel_tx: Arc<watch::Sender<Option<CancelReason>>>,
}

impl RerunRunner {
    /// Returns a handle that can be used to cancel the run from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            sender: self.cancel_tx.clone(),
        }
    }

    /// Reruns the failing tests in `initial`, and builds a report covering every test in it.
    ///
    /// The callback is called with each event as the run progresses. This always returns a
    /// complete report, including when the run is cancelled.
    pub fn execute<F>(mut self, initial: &InitialResults, callback: F) -> RunReport
    where
        F: FnMut(RerunEvent) + Send,
    {
        let report = self
            .inner
            .execute(initial, &mut self.signal_handler, &self.cancel_tx, callback);

        // Attempts that were abandoned on cancellation may still be winding down. Don't wait for
        // them.
        self.inner.runtime.shutdown_background();

        report
    }
}

/// A handle used to cancel a [`RerunRunner`].
///
/// Obtained through [`RerunRunner::cancel_handle`]. Once cancelled, no further reruns are
/// started, attempts in flight are abandoned, and tests that still needed reruns are finalized
/// as exhausted.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<Option<CancelReason>>>,
}

impl CancelHandle {
    /// Requests cancellation with [`CancelReason::Requested`].
    ///
    /// If the run has already been cancelled for another reason, that reason is kept.
    pub fn cancel(&self) {
        request_cancel(&self.sender, CancelReason::Requested);
    }

    /// Returns true if the run has been cancelled, for any reason.
    pub fn is_cancelled(&self) -> bool {
        self.sender.borrow().is_some()
    }
}

#[derive(Debug)]
struct RerunRunnerInner {
    test_threads: usize,
    global_timeout: Option<Duration>,
    stats: Arc<dyn StatsClient>,
    executor: Arc<dyn TestExecutor>,
    runtime: Runtime,
}

impl RerunRunnerInner {
    fn execute<F>(
        &self,
        initial: &InitialResults,
        signal_handler: &mut SignalHandler,
        cancel_tx: &watch::Sender<Option<CancelReason>>,
        callback: F,
    ) -> RunReport
    where
        F: FnMut(RerunEvent) + Send,
    {
        let start_time = Local::now().fixed_offset();
        let stopwatch = Instant::now();

        let failing: Vec<_> = initial.failing().collect();
        debug!(
            tests = initial.len(),
            failing = failing.len(),
            test_threads = self.test_threads,
            "starting rerun"
        );

        let mut dispatcher_cx = DispatcherContext::new(callback);
        dispatcher_cx.emit(RerunEventKind::RunStarted {
            test_count: initial.len(),
            failing_count: failing.len(),
        });

        // The cache is scoped to this run.
        let cache = PolicyCache::new();
        let resolver = PolicyResolver::new(&*self.stats, &cache);
        let executor = &*self.executor;

        let (event_tx, event_rx) = unbounded_channel();
        let cancel_rx = cancel_tx.subscribe();

        // The map closure owns event_tx, so the channel closes once every test has finished.
        let run_fut = futures::stream::iter(failing)
            .map(move |(index, first)| {
                let event_tx = event_tx.clone();
                let cancel_rx = cancel_rx.clone();
                let first = first.clone();
                let fut = move |_cx: FutureQueueContext| async move {
                    let finished = rerun_test(first, resolver, executor, cancel_rx, event_tx).await;
                    (index, finished)
                };
                (1, fut)
            })
            .future_queue(self.test_threads)
            .collect::<Vec<_>>();

        let dispatcher_fut =
            dispatcher_cx.run(event_rx, signal_handler, cancel_tx, self.global_timeout);

        let (mut finished, ()) = self
            .runtime
            .block_on(async move { futures::join!(run_fut, dispatcher_fut) });

        // Tests finish in any order. Keep warnings in the order of the initial results.
        finished.sort_by_key(|(index, _)| *index);

        let cancel_reason = *cancel_tx.borrow();
        let mut builder = ReportBuilder::new(initial);
        for (_, test) in finished {
            if let Some(warning) = test.warning {
                builder.add_warning(warning);
            }
            builder.add_decision(test.verdict, test.state);
        }
        if let Some(reason) = cancel_reason {
            builder.set_cancel_reason(reason);
        }
        builder.set_timing(start_time, stopwatch.elapsed());
        let report = builder.build();

        dispatcher_cx.emit(RerunEventKind::RunFinished {
            outcome: report.overall_outcome,
            cancel_reason,
        });

        report
    }
}

/// The result of running a single test through the rerun process.
#[derive(Debug)]
struct FinishedTest {
    verdict: Verdict,
    state: RerunState,
    warning: Option<PolicyWarning>,
}

async fn rerun_test(
    first: Attempt,
    resolver: PolicyResolver<'_>,
    executor: &dyn TestExecutor,
    mut cancel_rx: watch::Receiver<Option<CancelReason>>,
    event_tx: UnboundedSender<RerunEventKind>,
) -> FinishedTest {
    let test_id = first.test_id.clone();

    let cancelled = *cancel_rx.borrow();
    if let Some(reason) = cancelled {
        debug!(%test_id, "run cancelled before rerun started");
        return finish_unresolved(first, reason, &event_tx);
    }

    let resolution = tokio::select! {
        biased;

        reason = wait_for_cancel(&mut cancel_rx) => {
            debug!(%test_id, "run cancelled while resolving rerun policy");
            return finish_unresolved(first, reason, &event_tx);
        }
        resolution = resolver.resolve(&test_id) => resolution,
    };
    let policy = resolution.policy.clone();
    let warning = resolution.warning().cloned();
    let _ = event_tx.send(RerunEventKind::PolicyResolved {
        test_id: test_id.clone(),
        resolution,
    });

    let mut history = TestHistory::new(first, policy);
    let mut state = record_evaluation(&history, &event_tx);

    while state.is_retry_pending() {
        let cancelled = *cancel_rx.borrow();
        if let Some(reason) = cancelled {
            state = state.cancel(reason);
            break;
        }

        let attempt_number = history.next_attempt_number();
        debug!(%test_id, attempt = attempt_number, "rerunning test");

        let result = tokio::select! {
            biased;

            reason = wait_for_cancel(&mut cancel_rx) => {
                debug!(%test_id, attempt = attempt_number, "abandoning attempt on cancellation");
                state = state.cancel(reason);
                break;
            }
            result = executor.execute(&test_id, attempt_number) => result,
        };

        let attempt = match result {
            Ok(attempt) => attempt,
            Err(error) => {
                warn!(
                    "attempt {attempt_number} of `{test_id}` errored: {}",
                    DisplayErrorChain::new(&error),
                );
                Attempt::from_execution_error(test_id.clone(), attempt_number, &error)
            }
        };
        history.push(attempt);
        state = record_evaluation(&history, &event_tx);
    }

    finish(history, state, warning, &event_tx)
}

/// Evaluates the latest attempt in `history` and reports it.
fn record_evaluation(
    history: &TestHistory,
    event_tx: &UnboundedSender<RerunEventKind>,
) -> RerunState {
    let policy = history.policy();
    let pass_count = history.pass_count();
    let total_runs = history.total_runs();
    let state = RerunState::evaluate(policy, pass_count, total_runs);

    let _ = event_tx.send(RerunEventKind::AttemptFinished {
        attempt: history.last().clone(),
        policy: policy.clone(),
        pass_count,
        total_runs,
        runs_remaining: runs_remaining(policy, total_runs),
        state,
    });

    state
}

/// Finishes a test that was cancelled before its policy was known.
fn finish_unresolved(
    first: Attempt,
    reason: CancelReason,
    event_tx: &UnboundedSender<RerunEventKind>,
) -> FinishedTest {
    let policy = RerunPolicy::fallback(first.test_id.clone());
    let history = TestHistory::new(first, policy);
    let state = RerunState::Exhausted(ExhaustedReason::Cancelled(reason));
    finish(history, state, None, event_tx)
}

fn finish(
    history: TestHistory,
    state: RerunState,
    warning: Option<PolicyWarning>,
    event_tx: &UnboundedSender<RerunEventKind>,
) -> FinishedTest {
    let verdict = Verdict::from_history(history);
    debug!(
        test_id = %verdict.test_id(),
        outcome = %verdict.final_outcome(),
        %state,
        "test finished"
    );
    let _ = event_tx.send(RerunEventKind::TestFinished {
        verdict: verdict.clone(),
        state,
    });
    FinishedTest {
        verdict,
        state,
        warning,
    }
}

/// Resolves once a cancellation reason is set. Never resolves if the sender goes away.
async fn wait_for_cancel(cancel_rx: &mut watch::Receiver<Option<CancelReason>>) -> CancelReason {
    let reason = cancel_rx
        .wait_for(Option::is_some)
        .await
        .ok()
        .and_then(|reason| *reason);
    match reason {
        Some(reason) => reason,
        None => future::pending().await,
    }
}
