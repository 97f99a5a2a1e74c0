// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution of single test attempts.

use crate::{
    errors::ExecutionError,
    helpers::tail_lines,
    initial_results::read_junit_file,
    model::{Attempt, Outcome, TestId},
};
use camino::Utf8Path;
use futures::future::{BoxFuture, FutureExt};
use std::{
    fmt,
    process::Stdio,
    time::{Duration, Instant},
};
use tracing::debug;

/// The placeholder in a command template that is replaced by the test identifier.
pub const TEST_PLACEHOLDER: &str = "{test}";

/// The placeholder in a command template that is replaced by a per-attempt JUnit report path.
pub const JUNIT_PLACEHOLDER: &str = "{junit}";

/// The environment variable containing the test identifier, set for every attempt.
pub const TEST_ID_ENV: &str = "FLAKYBOT_TEST_ID";

/// The environment variable containing the 1-based attempt number, set for every attempt.
pub const ATTEMPT_ENV: &str = "FLAKYBOT_ATTEMPT";

/// The maximum number of lines of output used as the message of a failed attempt.
const OUTPUT_TAIL_LINES: usize = 20;

/// Runs a single attempt of a single test.
pub trait TestExecutor: fmt::Debug + Send + Sync {
    /// Executes the test, returning the recorded attempt.
    ///
    /// Errors are recorded by the runner as `ERRORED` attempts.
    fn execute<'a>(
        &'a self,
        test_id: &'a TestId,
        attempt_number: u32,
    ) -> BoxFuture<'a, Result<Attempt, ExecutionError>>;
}

/// A [`TestExecutor`] that runs a command once per attempt.
///
/// In the command's arguments, `{test}` is replaced by the test identifier. If no argument
/// contains `{test}`, the identifier is appended as the last argument.
///
/// If an argument contains `{junit}`, it is replaced by the path to a fresh JUnit report which
/// the command is expected to write. The outcome is then read from that report. Otherwise, an
/// exit status of 0 is a pass and anything else is a failure.
#[derive(Clone, Debug)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    attempt_timeout: Option<Duration>,
}

impl CommandExecutor {
    /// Creates a new executor for the given program and argument template.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            attempt_timeout: None,
        }
    }

    /// Creates a new executor from a full command line, returning `None` if it is empty.
    pub fn from_argv(argv: impl IntoIterator<Item = impl Into<String>>) -> Option<Self> {
        let mut argv = argv.into_iter().map(Into::into);
        let program: String = argv.next()?;
        Some(Self::new(program, argv))
    }

    /// Sets the maximum amount of time a single attempt may take.
    pub fn set_attempt_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    fn uses_junit(&self) -> bool {
        self.args.iter().any(|arg| arg.contains(JUNIT_PLACEHOLDER))
    }

    fn build_args(&self, test_id: &TestId, junit_path: Option<&Utf8Path>) -> Vec<String> {
        let mut has_test = false;
        let mut args: Vec<_> = self
            .args
            .iter()
            .map(|arg| {
                has_test |= arg.contains(TEST_PLACEHOLDER);
                let arg = arg.replace(TEST_PLACEHOLDER, test_id.as_str());
                match junit_path {
                    Some(path) => arg.replace(JUNIT_PLACEHOLDER, path.as_str()),
                    None => arg,
                }
            })
            .collect();
        if !has_test {
            args.push(test_id.as_str().to_owned());
        }
        args
    }

    async fn run(&self, test_id: &TestId, attempt_number: u32) -> Result<Attempt, ExecutionError> {
        // The directory is removed when this is dropped, after the report has been read.
        let junit_dir = if self.uses_junit() {
            let dir = camino_tempfile::Builder::new()
                .prefix("flakybot-")
                .tempdir()
                .map_err(ExecutionError::TempDir)?;
            Some(dir)
        } else {
            None
        };
        let junit_path = junit_dir.as_ref().map(|dir| dir.path().join("results.xml"));

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(self.build_args(test_id, junit_path.as_deref()))
            .env(TEST_ID_ENV, test_id.as_str())
            .env(ATTEMPT_ENV, attempt_number.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(%test_id, attempt = attempt_number, program = %self.program, "executing attempt");
        let stopwatch = Instant::now();
        let child = cmd.spawn().map_err(|error| ExecutionError::Spawn {
            command: self.program.clone(),
            error,
        })?;

        let wait = child.wait_with_output();
        let output = match self.attempt_timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| ExecutionError::Timeout { timeout })?,
            None => wait.await,
        };
        let output = output.map_err(|error| ExecutionError::Wait {
            command: self.program.clone(),
            error,
        })?;
        let time_taken = stopwatch.elapsed();

        if let Some(junit_path) = junit_path {
            let attempts = read_junit_file(&junit_path).map_err(ExecutionError::AttemptResults)?;
            let Some(mut attempt) = select_attempt(attempts, test_id) else {
                return Err(ExecutionError::TestMissingFromResults {
                    path: junit_path,
                    test_id: test_id.clone(),
                });
            };
            attempt.test_id = test_id.clone();
            attempt.attempt_number = attempt_number;
            if attempt.time_taken.is_none() {
                attempt.time_taken = Some(time_taken);
            }
            return Ok(attempt);
        }

        if output.status.success() {
            return Ok(
                Attempt::new(test_id.clone(), attempt_number, Outcome::Passed)
                    .with_time_taken(time_taken),
            );
        }

        let mut attempt = Attempt::new(test_id.clone(), attempt_number, Outcome::Failed)
            .with_error_type(output.status.to_string())
            .with_time_taken(time_taken);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let output = if stderr.trim().is_empty() {
            &stdout
        } else {
            &stderr
        };
        let tail = tail_lines(output, OUTPUT_TAIL_LINES);
        if !tail.is_empty() {
            attempt.error_message = Some(tail.to_owned());
        }
        Ok(attempt)
    }
}

impl TestExecutor for CommandExecutor {
    fn execute<'a>(
        &'a self,
        test_id: &'a TestId,
        attempt_number: u32,
    ) -> BoxFuture<'a, Result<Attempt, ExecutionError>> {
        self.run(test_id, attempt_number).boxed()
    }
}

/// Picks the attempt for `test_id` out of a per-attempt report.
///
/// An exact match is preferred. Test runners don't always name tests the same way in reports as
/// on the command line, so a report with a single test case is also accepted.
fn select_attempt(mut attempts: Vec<Attempt>, test_id: &TestId) -> Option<Attempt> {
    if let Some(index) = attempts.iter().position(|a| &a.test_id == test_id) {
        return Some(attempts.swap_remove(index));
    }
    if attempts.len() == 1 {
        return attempts.pop();
    }
    None
}
