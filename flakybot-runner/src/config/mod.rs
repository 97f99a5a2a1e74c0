// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for flakybot.
//!
//! The configuration is layered: the built-in [default config](FlakybotConfig::DEFAULT_CONFIG)
//! comes first, with the repository's `.config/flakybot.toml` (or a file passed in explicitly) on
//! top. Named profiles inherit unset values from `[profile.default]`.

mod concurrency;
mod imp;

pub use concurrency::*;
pub use imp::*;
