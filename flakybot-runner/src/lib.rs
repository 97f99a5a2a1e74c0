// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [flakybot](https://crates.io/crates/flakybot): adaptive reruns of
//! flaky tests.
//!
//! The basic flow of a run is:
//!
//! 1. [`InitialResults`](initial_results::InitialResults) supplies the first attempt of every
//!    test in the run.
//! 2. The [`RerunRunner`](runner::RerunRunner) picks out tests whose first attempt failed and
//!    asks the [`PolicyResolver`](policy::PolicyResolver) how many passes they need and how many
//!    runs they may use.
//! 3. Those tests are rerun through a [`TestExecutor`](runner::TestExecutor) until each one is
//!    satisfied or exhausted.
//! 4. Every test history is reduced to a [`Verdict`](verdict::Verdict), and the verdicts are
//!    assembled into a [`RunReport`](reporter::RunReport) for the configured
//!    [`ReportSink`](reporter::ReportSink)s.

pub mod config;
pub mod errors;
mod helpers;
pub mod initial_results;
pub mod model;
pub mod policy;
pub mod reporter;
pub mod runner;
pub mod signal;
pub mod stats;
pub mod verdict;
