// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable surface for [flakybot](https://crates.io/crates/flakybot).
//!
//! This crate contains the documented process exit codes and the JSON schema of a run summary,
//! so that CI tooling can consume flakybot output without depending on the runner itself.

mod exit_codes;
mod summary;

pub use exit_codes::*;
pub use summary::*;
