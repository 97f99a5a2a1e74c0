// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JUnit XML output of final verdicts.

use crate::{
    errors::WriteReportError,
    model::{Attempt, Outcome},
    reporter::{ReportSink, RunReport},
    verdict::{FinalOutcome, Verdict},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestRerun, TestSuite};
use std::fs::File;

/// The name of the JUnit report.
pub const JUNIT_REPORT_NAME: &str = "flakybot-run";

/// The name of the suite for tests whose identifiers have no `::` separator.
const DEFAULT_SUITE_NAME: &str = "flakybot";

/// Writes a JUnit XML report of final verdicts to a file.
///
/// Tests that recovered after failing are reported as successes with `flakyFailure` or
/// `flakyError` elements. Tests that failed carry their later failures as `rerunFailure` or
/// `rerunError` elements.
#[derive(Clone, Debug)]
pub struct JunitReporter {
    path: Utf8PathBuf,
}

impl JunitReporter {
    /// Creates a new reporter writing to `path`. Parent directories are created as needed.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path the report is written to.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl ReportSink for JunitReporter {
    fn write_report(&mut self, report: &RunReport) -> Result<(), WriteReportError> {
        let junit = to_junit_report(report);

        if let Some(junit_dir) = self.path.parent()
            && !junit_dir.as_str().is_empty()
        {
            std::fs::create_dir_all(junit_dir).map_err(|error| WriteReportError::Create {
                path: junit_dir.to_owned(),
                error,
            })?;
        }

        let f = File::create(&self.path).map_err(|error| WriteReportError::Create {
            path: self.path.clone(),
            error,
        })?;
        junit.serialize(f).map_err(WriteReportError::Junit)
    }
}

/// Converts a run report into a JUnit report.
///
/// Tests are grouped into suites by the part of their identifier before the last `::`.
pub fn to_junit_report(report: &RunReport) -> Report {
    let mut suites: IndexMap<&str, TestSuite> = IndexMap::new();
    for decision in &report.decisions {
        let verdict = &decision.verdict;
        let (suite_name, name) = split_test_id(verdict.test_id().as_str());
        let suite = suites
            .entry(suite_name)
            .or_insert_with(|| TestSuite::new(suite_name));
        let mut testcase = TestCase::new(name, testcase_status(verdict));
        testcase.set_classname(suite_name);
        if let Some(time) = verdict.history().last().time_taken {
            testcase.set_time(time);
        }
        suite.add_test_case(testcase);
    }

    let mut junit = Report::new(JUNIT_REPORT_NAME);
    junit
        .set_timestamp(report.start_time)
        .set_time(report.elapsed)
        .add_test_suites(suites.into_values());
    junit
}

fn split_test_id(test_id: &str) -> (&str, &str) {
    match test_id.rsplit_once("::") {
        Some((suite, name)) if !suite.is_empty() => (suite, name),
        _ => (DEFAULT_SUITE_NAME, test_id),
    }
}

fn testcase_status(verdict: &Verdict) -> TestCaseStatus {
    let attempts = verdict.history().attempts();
    match verdict.final_outcome() {
        FinalOutcome::Passed => {
            // Earlier failures of a recovered test become flaky reruns.
            let mut status = TestCaseStatus::success();
            status.add_reruns(attempts.iter().filter_map(to_rerun));
            status
        }
        FinalOutcome::Skipped => {
            let mut status = TestCaseStatus::skipped();
            if let Some(message) = &verdict.history().first().error_message {
                status.set_message(message.as_str());
            }
            status
        }
        FinalOutcome::Failed => {
            let first = verdict.history().first();
            let rest = &attempts[1..];
            let mut status = TestCaseStatus::non_success(non_success_kind(first.outcome));
            if let Some(error_type) = &first.error_type {
                status.set_type(error_type.as_str());
            }
            status.set_message(verdict.explanation());
            if let Some(description) = describe(first) {
                status.set_description(description);
            }
            status.add_reruns(rest.iter().filter_map(to_rerun));
            status
        }
    }
}

fn to_rerun(attempt: &Attempt) -> Option<TestRerun> {
    if !attempt.outcome.is_failure() {
        return None;
    }
    let mut rerun = TestRerun::new(non_success_kind(attempt.outcome));
    if let Some(error_type) = &attempt.error_type {
        rerun.set_type(error_type.as_str());
    }
    if let Some(message) = &attempt.error_message {
        rerun.set_message(message.as_str());
    }
    if let Some(time) = attempt.time_taken {
        rerun.set_time(time);
    }
    if let Some(description) = describe(attempt) {
        rerun.set_description(description);
    }
    Some(rerun)
}

fn non_success_kind(outcome: Outcome) -> NonSuccessKind {
    match outcome {
        Outcome::Errored => NonSuccessKind::Error,
        _ => NonSuccessKind::Failure,
    }
}

fn describe(attempt: &Attempt) -> Option<String> {
    let mut lines = Vec::new();
    if let Some(message) = &attempt.error_message {
        lines.push(message.clone());
    }
    if let Some(location) = &attempt.location {
        lines.push(format!("at {location}"));
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}
