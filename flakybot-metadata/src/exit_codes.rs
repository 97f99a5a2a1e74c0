// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `flakybot` failures.
///
/// `flakybot` runs may fail for a variety of reasons. This structure documents the exit codes
/// that may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum FlakybotExitCode {}

impl FlakybotExitCode {
    /// No errors occurred, and every test either passed or was skipped.
    ///
    /// This includes tests that failed initially but then met their required pass count on rerun.
    pub const OK: i32 = 0;

    /// One or more tests failed, either because they exhausted their rerun budget or because the
    /// run was cancelled before they could pass.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// The initial test results could not be read or were malformed.
    ///
    /// This is distinct from [`Self::TEST_RUN_FAILED`]: no test has been judged in this case.
    pub const MALFORMED_INITIAL_RESULTS: i32 = 104;

    /// Writing a report (text, JUnit or JSON) produced an error.
    pub const WRITE_REPORT_ERROR: i32 = 110;

    /// A user issue happened while setting up a flakybot invocation, for example an invalid
    /// config file or an unknown profile.
    pub const SETUP_ERROR: i32 = 96;
}
