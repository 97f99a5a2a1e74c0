// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The rerun runner.
//!
//! The main structure in this module is [`RerunRunner`].

mod dispatcher;
mod executor;
mod imp;
mod state;

pub use executor::*;
pub use imp::*;
pub use state::*;
