// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Access to historical flakiness statistics.
//!
//! The [`StatsClient`] trait is the seam between the policy resolver and wherever statistics come
//! from. [`HttpStatsClient`] talks to the FlakyBot API; [`StaticStatsClient`] serves a fixed table.

mod ci_env;
mod http;

pub use ci_env::*;
pub use http::*;

use crate::{errors::StatsLookupError, model::TestId};
use futures::future::{BoxFuture, FutureExt};
use std::{collections::HashMap, fmt};

/// A rerun policy as suggested by the statistics service, before validation.
///
/// Values are kept as loosely typed as the service returns them: the
/// [`PolicyResolver`](crate::policy::PolicyResolver) is responsible for validating them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SuggestedPolicy {
    /// The suggested minimum number of passes.
    pub min_passes: Option<i64>,

    /// The suggested maximum number of runs.
    pub max_runs: Option<i64>,
}

impl SuggestedPolicy {
    /// Creates a new suggestion with both values present.
    pub fn new(min_passes: i64, max_runs: i64) -> Self {
        Self {
            min_passes: Some(min_passes),
            max_runs: Some(max_runs),
        }
    }
}

/// A source of historical flakiness statistics.
pub trait StatsClient: fmt::Debug + Send + Sync {
    /// Looks up the suggested rerun policy for a test.
    fn lookup<'a>(
        &'a self,
        test_id: &'a TestId,
    ) -> BoxFuture<'a, Result<SuggestedPolicy, StatsLookupError>>;
}

/// A [`StatsClient`] backed by a fixed table.
///
/// Tests not in the table are reported as not found.
#[derive(Clone, Debug, Default)]
pub struct StaticStatsClient {
    policies: HashMap<TestId, SuggestedPolicy>,
}

impl StaticStatsClient {
    /// Creates a new, empty client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a suggestion for a test, replacing any existing one.
    pub fn insert(&mut self, test_id: impl Into<TestId>, policy: SuggestedPolicy) -> &mut Self {
        self.policies.insert(test_id.into(), policy);
        self
    }
}

impl FromIterator<(TestId, SuggestedPolicy)> for StaticStatsClient {
    fn from_iter<T: IntoIterator<Item = (TestId, SuggestedPolicy)>>(iter: T) -> Self {
        Self {
            policies: iter.into_iter().collect(),
        }
    }
}

impl StatsClient for StaticStatsClient {
    fn lookup<'a>(
        &'a self,
        test_id: &'a TestId,
    ) -> BoxFuture<'a, Result<SuggestedPolicy, StatsLookupError>> {
        let res = self
            .policies
            .get(test_id)
            .copied()
            .ok_or_else(|| StatsLookupError::NotFound {
                test_id: test_id.clone(),
            });
        futures::future::ready(res).boxed()
    }
}
