// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reporting of rerun events and results.
//!
//! A [`RunReport`] is assembled by the [`ReportBuilder`] at the end of a run, and handed to any
//! number of [`ReportSink`]s.

mod displayer;
pub mod events;
mod json;
mod junit;
mod report;

pub use displayer::*;
pub use json::*;
pub use junit::*;
pub use report::*;
