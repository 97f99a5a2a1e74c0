// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::RerunConcurrencyParseError;
use serde::Deserialize;
use std::{num::NonZeroUsize, str::FromStr, sync::LazyLock};
use tracing::warn;

/// How many failing tests are rerun at the same time: the `test-threads` setting.
///
/// Attempts of a single test never overlap, so this bounds the number of tests in flight.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(try_from = "ConcurrencyInput")]
pub enum RerunConcurrency {
    /// A fixed number of tests.
    Fixed(NonZeroUsize),

    /// One test per logical CPU, minus `reserved` CPUs. At least one test is always rerun.
    ///
    /// Written as `"num-cpus"` (nothing reserved) or as a negative integer.
    PerCpu {
        /// The number of CPUs left alone.
        reserved: usize,
    },
}

impl RerunConcurrency {
    /// Reruns one test at a time.
    pub const SERIAL: Self = Self::Fixed(NonZeroUsize::MIN);

    /// Returns the number of tests to rerun at the same time on this machine.
    pub fn get(self) -> usize {
        match self {
            Self::Fixed(count) => count.get(),
            Self::PerCpu { reserved } => num_cpus().saturating_sub(reserved).max(1),
        }
    }

    fn from_int(value: i64) -> Result<Self, RerunConcurrencyParseError> {
        if value < 0 {
            let reserved = usize::try_from(value.unsigned_abs()).unwrap_or(usize::MAX);
            return Ok(Self::PerCpu { reserved });
        }
        usize::try_from(value)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self::Fixed)
            .ok_or_else(|| RerunConcurrencyParseError::new(value.to_string()))
    }
}

impl Default for RerunConcurrency {
    fn default() -> Self {
        Self::SERIAL
    }
}

impl FromStr for RerunConcurrency {
    type Err = RerunConcurrencyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "num-cpus" {
            return Ok(Self::PerCpu { reserved: 0 });
        }
        let value = s
            .parse::<i64>()
            .map_err(|_| RerunConcurrencyParseError::new(s))?;
        Self::from_int(value)
    }
}

// TOML integers are always i64.
#[derive(Deserialize)]
#[serde(untagged)]
enum ConcurrencyInput {
    Int(i64),
    Str(String),
}

impl TryFrom<ConcurrencyInput> for RerunConcurrency {
    type Error = RerunConcurrencyParseError;

    fn try_from(input: ConcurrencyInput) -> Result<Self, Self::Error> {
        match input {
            ConcurrencyInput::Int(value) => Self::from_int(value),
            ConcurrencyInput::Str(value) => value.parse(),
        }
    }
}

fn num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.get(),
            Err(error) => {
                warn!("unable to determine the number of CPUs ({error}), assuming 1");
                1
            }
        });

    *NUM_CPUS
}
