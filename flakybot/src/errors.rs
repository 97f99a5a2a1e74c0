// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use flakybot_metadata::FlakybotExitCode;
use flakybot_runner::errors::*;
use owo_colors::OwoColorize;
use std::{error::Error, path::PathBuf};
use thiserror::Error;
use tracing::error;

// The #[error()] strings are placeholders. Errors are meant to be printed out with
// display_to_stderr, which colorizes them.

/// An expected error that stops flakybot before a report could be produced.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("no test command specified")]
    EmptyCommand,
    #[error("malformed initial results")]
    MalformedInitialResults {
        #[from]
        err: MalformedInitialResults,
    },
    #[error("rerun runner build error")]
    RerunRunnerBuildError {
        #[from]
        err: RerunRunnerBuildError,
    },
    #[error("error writing report")]
    WriteReportError {
        #[from]
        err: WriteReportError,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. }
            | Self::EmptyCommand
            | Self::RerunRunnerBuildError { .. } => FlakybotExitCode::SETUP_ERROR,
            Self::MalformedInitialResults { .. } => FlakybotExitCode::MALFORMED_INITIAL_RESULTS,
            Self::WriteReportError { .. } => FlakybotExitCode::WRITE_REPORT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                error!(
                    "current directory `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse flakybot config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                None
            }
            Self::EmptyCommand => {
                error!(
                    "no test command specified (hint: pass it after `{}`)",
                    "--".style(styles.bold)
                );
                None
            }
            Self::MalformedInitialResults { err } => {
                error!("initial test results could not be read");
                Some(err as &dyn Error)
            }
            Self::RerunRunnerBuildError { err } => {
                error!("failed to set up the rerun runner");
                Some(err as &dyn Error)
            }
            Self::WriteReportError { err } => {
                error!("failed to write report");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }

    pub(crate) fn current_dir_invalid_utf8(path: PathBuf) -> Self {
        Self::CurrentDirInvalidUtf8 { path }
    }

    pub(crate) fn report_create_error(path: Utf8PathBuf, err: std::io::Error) -> Self {
        Self::WriteReportError {
            err: WriteReportError::Create { path, error: err },
        }
    }
}
