// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by flakybot.

use crate::model::TestId;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error, fmt, sync::Arc, time::Duration};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse flakybot config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// The default profile named in the config is not defined.
    #[error("default profile `{default_profile}` is not defined in the config")]
    DefaultProfileNotDefined {
        /// The name of the default profile.
        default_profile: String,
    },
}

/// An error which indicates that a profile was requested but is not defined.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// An error that occurs while parsing a [`RerunConcurrency`](crate::config::RerunConcurrency).
#[derive(Clone, Debug, Error)]
#[error("invalid test-threads value `{input}` (expected a non-zero integer or \"num-cpus\")")]
pub struct RerunConcurrencyParseError {
    input: String,
}

impl RerunConcurrencyParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error returned by a [`StatsClient`](crate::stats::StatsClient) lookup.
///
/// All of these are soft errors: the policy resolver maps each of them to the fallback policy.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum StatsLookupError {
    /// The statistics service has no record for this test.
    #[error("no flakiness record for `{test_id}`")]
    NotFound {
        /// The test that was looked up.
        test_id: TestId,
    },

    /// The statistics service could not be reached.
    #[error("error fetching flakiness statistics from `{url}`")]
    Transport {
        /// The URL that was requested.
        url: String,

        /// The underlying error.
        #[source]
        error: Arc<dyn error::Error + Send + Sync>,
    },

    /// The statistics service returned data that could not be understood.
    #[error("malformed flakiness statistics from `{url}`")]
    Malformed {
        /// The URL that was requested.
        url: String,

        /// The underlying error.
        #[source]
        error: Arc<serde_json::Error>,
    },
}

/// An error that occurred while executing a test attempt.
///
/// These are converted into `ERRORED` attempts, and never abort the run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// The test command could not be started.
    #[error("failed to spawn `{command}`")]
    Spawn {
        /// The program that was being spawned.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while waiting for the test command to exit.
    #[error("failed to wait for `{command}` to exit")]
    Wait {
        /// The program that was being waited on.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A temporary directory for the attempt's results could not be created.
    #[error("failed to create temporary directory for attempt results")]
    TempDir(#[source] std::io::Error),

    /// The attempt did not finish within the configured timeout.
    #[error("attempt timed out after {}", format_timeout(.timeout))]
    Timeout {
        /// The timeout that was hit.
        timeout: Duration,
    },

    /// The per-attempt JUnit report could not be read or parsed.
    #[error("failed to read attempt results")]
    AttemptResults(#[source] MalformedInitialResults),

    /// The per-attempt JUnit report did not contain the test.
    #[error("attempt results at `{path}` do not contain `{test_id}`")]
    TestMissingFromResults {
        /// The path to the JUnit report.
        path: Utf8PathBuf,

        /// The test that was expected.
        test_id: TestId,
    },

    /// The executor gave up on the test for another reason.
    #[error("{message}")]
    Other {
        /// A description of what went wrong.
        message: String,
    },
}

fn format_timeout(timeout: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*timeout)
}

impl ExecutionError {
    /// Returns a short name for the kind of error, used as the error type of `ERRORED` attempts.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "SpawnError",
            Self::Wait { .. } => "WaitError",
            Self::TempDir(_) => "TempDirError",
            Self::Timeout { .. } => "TimeoutError",
            Self::AttemptResults(_) => "AttemptResultsError",
            Self::TestMissingFromResults { .. } => "MissingResultError",
            Self::Other { .. } => "ExecutionError",
        }
    }
}

/// The initial results for a run were malformed. This is fatal: the run does not proceed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MalformedInitialResults {
    /// A results file could not be read.
    #[error("failed to read results file `{path}`")]
    Read {
        /// The path that was being read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A results file was not valid JUnit XML.
    #[error("invalid JUnit XML in `{source_name}` at byte {position}")]
    Xml {
        /// The file (or other source) being parsed.
        source_name: String,

        /// The byte position the error was detected at.
        position: u64,

        /// The underlying error.
        #[source]
        error: quick_xml::Error,
    },

    /// A results file was empty, or its root element was not `<testsuites>` or `<testsuite>`.
    #[error("`{source_name}` is not a JUnit report")]
    NotJunit {
        /// The file (or other source) being parsed.
        source_name: String,
    },

    /// A `<testcase>` element did not have a required attribute.
    #[error("<testcase> #{index} in `{source_name}` is missing the `{attribute}` attribute")]
    MissingAttribute {
        /// The file (or other source) being parsed.
        source_name: String,

        /// The 0-based index of the test case within the source.
        index: usize,

        /// The attribute that was missing.
        attribute: &'static str,
    },

    /// A test identifier was empty.
    #[error("initial result #{index} has an empty test identifier")]
    EmptyTestId {
        /// The 0-based index of the attempt.
        index: usize,
    },

    /// An initial result was not a first attempt.
    #[error("initial result for `{test_id}` has attempt number {attempt_number} (expected 1)")]
    InvalidAttemptNumber {
        /// The test identifier.
        test_id: TestId,

        /// The attempt number that was found.
        attempt_number: u32,
    },

    /// A test appeared more than once in the initial results.
    #[error("test `{test_id}` appears more than once in the initial results")]
    DuplicateTestId {
        /// The duplicated test identifier.
        test_id: TestId,
    },
}

/// An error that occurred while writing a report to a sink.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteReportError {
    /// An I/O error occurred while writing.
    #[error("error writing {kind} report")]
    Io {
        /// The kind of report being written.
        kind: &'static str,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while creating the output file.
    #[error("error creating report file `{path}`")]
    Create {
        /// The path being created.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while serializing the JUnit report.
    #[error("error serializing JUnit report")]
    Junit(#[source] quick_junit::SerializeError),

    /// An error occurred while serializing the JSON summary.
    #[error("error serializing JSON summary")]
    Json(#[source] serde_json::Error),
}

/// An error occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] std::io::Error);

/// An error that occurred while building the rerun runner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RerunRunnerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] std::io::Error),

    /// An error occurred while setting up signals.
    #[error("error setting up signals")]
    SignalHandlerSetupError(#[from] SignalHandlerSetupError),
}

/// Displays an error along with its chain of sources, one per line.
///
/// Used where errors are embedded in reports rather than printed to a terminal.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let Some(mut cause) = self.error.source() else {
            return Ok(());
        };

        write!(f, "\n  caused by:")?;
        loop {
            write!(f, "\n  - {cause}")?;
            match cause.source() {
                Some(next) => cause = next,
                None => return Ok(()),
            }
        }
    }
}
