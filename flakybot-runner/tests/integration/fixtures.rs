// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use debug_ignore::DebugIgnore;
use flakybot_runner::{
    errors::{ExecutionError, StatsLookupError},
    initial_results::InitialResults,
    model::{Attempt, Outcome, TestId},
    reporter::{RunReport, events::RerunEvent},
    runner::{RerunRunner, RerunRunnerBuilder, TestExecutor},
    signal::SignalHandlerKind,
    stats::{StatsClient, SuggestedPolicy},
};
use futures::future::{BoxFuture, FutureExt};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

/// What a scripted attempt does.
#[derive(Debug)]
pub(crate) enum Scripted {
    Outcome(Outcome),
    Error(ExecutionError),
    /// Never finishes.
    Hang,
}

type CallHook = Box<dyn Fn(&TestId, u32) + Send + Sync>;

/// An executor that plays back a fixed sequence of outcomes per test.
#[derive(Debug, Default)]
pub(crate) struct ScriptedExecutor {
    scripts: Mutex<HashMap<TestId, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(TestId, u32)>>,
    on_call: DebugIgnore<Option<CallHook>>,
}

impl ScriptedExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(
        &mut self,
        test_id: &str,
        steps: impl IntoIterator<Item = Scripted>,
    ) -> &mut Self {
        self.scripts
            .get_mut()
            .expect("lock not poisoned")
            .insert(TestId::new(test_id), steps.into_iter().collect());
        self
    }

    pub(crate) fn outcomes(
        &mut self,
        test_id: &str,
        outcomes: impl IntoIterator<Item = Outcome>,
    ) -> &mut Self {
        self.script(test_id, outcomes.into_iter().map(Scripted::Outcome))
    }

    pub(crate) fn set_on_call(&mut self, hook: impl Fn(&TestId, u32) + Send + Sync + 'static) {
        self.on_call = DebugIgnore(Some(Box::new(hook)));
    }

    /// Returns the calls made so far, in order.
    pub(crate) fn calls(&self) -> Vec<(TestId, u32)> {
        self.calls.lock().expect("lock not poisoned").clone()
    }

    pub(crate) fn calls_for(&self, test_id: &str) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter(|(id, _)| id.as_str() == test_id)
            .map(|(_, attempt)| attempt)
            .collect()
    }
}

impl TestExecutor for ScriptedExecutor {
    fn execute<'a>(
        &'a self,
        test_id: &'a TestId,
        attempt_number: u32,
    ) -> BoxFuture<'a, Result<Attempt, ExecutionError>> {
        self.calls
            .lock()
            .expect("lock not poisoned")
            .push((test_id.clone(), attempt_number));
        if let Some(hook) = &*self.on_call {
            hook(test_id, attempt_number);
        }

        let step = self
            .scripts
            .lock()
            .expect("lock not poisoned")
            .get_mut(test_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| panic!("no scripted step for {test_id} attempt {attempt_number}"));

        match step {
            Scripted::Outcome(outcome) => {
                futures::future::ready(Ok(Attempt::new(test_id.clone(), attempt_number, outcome)))
                    .boxed()
            }
            Scripted::Error(error) => futures::future::ready(Err(error)).boxed(),
            Scripted::Hang => futures::future::pending().boxed(),
        }
    }
}

/// A stats client whose lookups never finish.
#[derive(Debug)]
pub(crate) struct UnresponsiveStats;

impl StatsClient for UnresponsiveStats {
    fn lookup<'a>(
        &'a self,
        _test_id: &'a TestId,
    ) -> BoxFuture<'a, Result<SuggestedPolicy, StatsLookupError>> {
        futures::future::pending().boxed()
    }
}

/// A stats client that always fails to connect.
#[derive(Debug)]
pub(crate) struct UnreachableStats;

impl StatsClient for UnreachableStats {
    fn lookup<'a>(
        &'a self,
        _test_id: &'a TestId,
    ) -> BoxFuture<'a, Result<SuggestedPolicy, StatsLookupError>> {
        let error = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        futures::future::ready(Err(StatsLookupError::Transport {
            url: "http://127.0.0.1:9/flaky-tests".to_owned(),
            error: Arc::new(error),
        }))
        .boxed()
    }
}

pub(crate) fn initial(outcomes: &[(&str, Outcome)]) -> InitialResults {
    InitialResults::new(
        outcomes
            .iter()
            .map(|(id, outcome)| Attempt::new(*id, 1, *outcome))
            .collect(),
    )
    .expect("initial results are valid")
}

pub(crate) fn build_runner(
    builder: RerunRunnerBuilder,
    stats: impl StatsClient + 'static,
    executor: Arc<ScriptedExecutor>,
) -> RerunRunner {
    builder
        .build(Arc::new(stats), executor, SignalHandlerKind::Noop)
        .expect("runner built")
}

/// Runs `initial` to completion, collecting all events.
pub(crate) fn execute(runner: RerunRunner, initial: &InitialResults) -> (RunReport, Vec<RerunEvent>) {
    let mut events = Vec::new();
    let report = runner.execute(initial, |event| events.push(event));
    (report, events)
}
