// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `flakybot` command-line interface.
//!
//! This crate is not meant to be used as a library. Its interface may change at any time.

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::FlakybotApp;
#[doc(hidden)]
pub use errors::ExpectedError;
#[doc(hidden)]
pub use output::OutputContext;
