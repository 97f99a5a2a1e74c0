// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolution of rerun policies from historical flakiness statistics.
//!
//! [`PolicyResolver::resolve`] never fails: any problem with the statistics results in the
//! fallback policy and a [`PolicyWarning`], which is surfaced in the final report.

use crate::{
    errors::{DisplayErrorChain, StatsLookupError},
    model::{RerunPolicy, TestId},
    stats::{StatsClient, SuggestedPolicy},
};
use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, PoisonError},
};
use tracing::{debug, warn};

/// The maximum number of runs used when the statistics service flags a test without saying how
/// many runs it may use.
pub const DEFAULT_MAX_RUNS: u32 = 2;

/// A resolved policy along with where it came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PolicyResolution {
    /// The policy to apply.
    pub policy: RerunPolicy,

    /// Where the policy came from.
    pub source: PolicySource,
}

impl PolicyResolution {
    /// Returns the warning recorded while resolving this policy, if any.
    pub fn warning(&self) -> Option<&PolicyWarning> {
        match &self.source {
            PolicySource::Stats => None,
            PolicySource::Fallback(warning) => Some(warning),
        }
    }
}

/// Where a [`RerunPolicy`] came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PolicySource {
    /// The policy was derived from historical statistics.
    Stats,

    /// The fallback policy was used.
    Fallback(PolicyWarning),
}

/// A soft warning recorded when the fallback policy was used.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PolicyWarning {
    /// The test the warning is for.
    pub test_id: TestId,

    /// What went wrong.
    pub kind: PolicyWarningKind,
}

/// The reason the fallback policy was used.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PolicyWarningKind {
    /// The statistics service has no record of this test.
    NotFound,

    /// The statistics service could not be reached.
    Transport {
        /// A rendering of the underlying error chain.
        message: String,
    },

    /// The statistics service returned data that could not be understood.
    Malformed {
        /// A rendering of the underlying error chain.
        message: String,
    },

    /// The statistics service suggested an unusable minimum pass count.
    InvalidSuggestion {
        /// The suggested minimum pass count.
        min_passes: Option<i64>,
    },
}

impl PolicyWarning {
    /// Returns true if this warning is worth showing to users.
    ///
    /// Tests without flakiness records are the common case, so `NotFound` is not notable.
    pub fn is_notable(&self) -> bool {
        !matches!(self.kind, PolicyWarningKind::NotFound)
    }
}

impl fmt::Display for PolicyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            PolicyWarningKind::NotFound => {
                write!(f, "no flakiness record for `{}`", self.test_id)
            }
            PolicyWarningKind::Transport { message } => write!(
                f,
                "flakiness statistics unavailable for `{}`: {message}",
                self.test_id
            ),
            PolicyWarningKind::Malformed { message } => write!(
                f,
                "malformed flakiness statistics for `{}`: {message}",
                self.test_id
            ),
            PolicyWarningKind::InvalidSuggestion { min_passes } => {
                write!(f, "invalid min-passes for `{}`: ", self.test_id)?;
                match min_passes {
                    Some(min_passes) => write!(f, "{min_passes}"),
                    None => write!(f, "missing"),
                }
            }
        }
    }
}

/// A read-through cache of resolved policies, scoped to a single run.
///
/// Entries are populated lazily and never invalidated.
#[derive(Debug, Default)]
pub struct PolicyCache {
    entries: Mutex<HashMap<TestId, PolicyResolution>>,
}

impl PolicyCache {
    /// Creates a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn get(&self, test_id: &TestId) -> Option<PolicyResolution> {
        self.lock().get(test_id).cloned()
    }

    fn insert(&self, resolution: PolicyResolution) -> PolicyResolution {
        // If two lookups for the same test raced, the first one to finish wins.
        self.lock()
            .entry(resolution.policy.test_id().clone())
            .or_insert(resolution)
            .clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TestId, PolicyResolution>> {
        // The map is always left in a consistent state, so poisoning can be ignored.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves rerun policies for tests, consulting a [`StatsClient`] through a [`PolicyCache`].
#[derive(Clone, Copy, Debug)]
pub struct PolicyResolver<'a> {
    client: &'a dyn StatsClient,
    cache: &'a PolicyCache,
}

impl<'a> PolicyResolver<'a> {
    /// Creates a new resolver.
    pub fn new(client: &'a dyn StatsClient, cache: &'a PolicyCache) -> Self {
        Self { client, cache }
    }

    /// Resolves the policy for a test. This never fails.
    pub async fn resolve(&self, test_id: &TestId) -> PolicyResolution {
        if let Some(resolution) = self.cache.get(test_id) {
            return resolution;
        }

        let resolution = match self.client.lookup(test_id).await {
            Ok(suggested) => validate(test_id, suggested),
            Err(error) => fallback_for_error(test_id, &error),
        };

        match resolution.warning() {
            Some(warning) if warning.is_notable() => warn!("{warning}, not rerunning"),
            Some(warning) => debug!("{warning}"),
            None => debug!(
                test_id = %test_id,
                policy = %resolution.policy,
                "resolved rerun policy"
            ),
        }

        self.cache.insert(resolution)
    }
}

/// Validates a suggestion from the statistics service.
///
/// In order: a missing or non-positive `min_passes` yields the fallback policy, then
/// `min_passes` is clamped to at least 1 and `max_runs` to at least `min_passes`.
pub fn validate(test_id: &TestId, suggested: SuggestedPolicy) -> PolicyResolution {
    let min_passes = match suggested.min_passes {
        Some(min_passes) if min_passes > 0 => min_passes,
        min_passes => {
            return fallback(
                test_id,
                PolicyWarningKind::InvalidSuggestion { min_passes },
            );
        }
    };

    let min_passes = clamp_to_u32(min_passes);
    let max_runs = match suggested.max_runs {
        Some(max_runs) => clamp_to_u32(max_runs),
        None => DEFAULT_MAX_RUNS,
    };

    PolicyResolution {
        policy: RerunPolicy::new(test_id.clone(), min_passes, max_runs),
        source: PolicySource::Stats,
    }
}

fn fallback_for_error(test_id: &TestId, error: &StatsLookupError) -> PolicyResolution {
    let kind = match error {
        StatsLookupError::NotFound { .. } => PolicyWarningKind::NotFound,
        StatsLookupError::Transport { .. } => PolicyWarningKind::Transport {
            message: DisplayErrorChain::new(error).to_string(),
        },
        StatsLookupError::Malformed { .. } => PolicyWarningKind::Malformed {
            message: DisplayErrorChain::new(error).to_string(),
        },
    };
    fallback(test_id, kind)
}

fn fallback(test_id: &TestId, kind: PolicyWarningKind) -> PolicyResolution {
    PolicyResolution {
        policy: RerunPolicy::fallback(test_id.clone()),
        source: PolicySource::Fallback(PolicyWarning {
            test_id: test_id.clone(),
            kind,
        }),
    }
}

fn clamp_to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StaticStatsClient;
    use futures::future::{BoxFuture, FutureExt};
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use test_case::test_case;

    #[test_case(Some(2), Some(5) => (2, 5, true); "valid")]
    #[test_case(Some(3), Some(1) => (3, 3, true); "max runs clamped up")]
    #[test_case(Some(1), None => (1, DEFAULT_MAX_RUNS, true); "missing max runs")]
    #[test_case(Some(3), None => (3, 3, true); "missing max runs below min passes")]
    #[test_case(Some(2), Some(-4) => (2, 2, true); "negative max runs")]
    #[test_case(Some(0), Some(5) => (1, 1, false); "zero min passes")]
    #[test_case(Some(-1), Some(5) => (1, 1, false); "negative min passes")]
    #[test_case(None, Some(5) => (1, 1, false); "missing min passes")]
    fn validate_cases(min_passes: Option<i64>, max_runs: Option<i64>) -> (u32, u32, bool) {
        let resolution = validate(
            &TestId::new("t"),
            SuggestedPolicy {
                min_passes,
                max_runs,
            },
        );
        (
            resolution.policy.min_passes(),
            resolution.policy.max_runs(),
            resolution.warning().is_none(),
        )
    }

    #[derive(Debug)]
    struct CountingClient {
        calls: AtomicUsize,
        result: Result<SuggestedPolicy, StatsLookupError>,
    }

    impl StatsClient for CountingClient {
        fn lookup<'a>(
            &'a self,
            _test_id: &'a TestId,
        ) -> BoxFuture<'a, Result<SuggestedPolicy, StatsLookupError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(self.result.clone()).boxed()
        }
    }

    #[tokio::test]
    async fn resolve_is_cached() {
        let client = CountingClient {
            calls: AtomicUsize::new(0),
            result: Ok(SuggestedPolicy::new(2, 4)),
        };
        let cache = PolicyCache::new();
        let resolver = PolicyResolver::new(&client, &cache);
        let test_id = TestId::new("t");

        let first = resolver.resolve(&test_id).await;
        let second = resolver.resolve(&test_id).await;
        assert_eq!(first, second);
        assert_eq!(first.policy, RerunPolicy::new("t", 2, 4));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1, "second lookup cached");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn not_found_falls_back() {
        let client = StaticStatsClient::new();
        let cache = PolicyCache::new();
        let resolution = PolicyResolver::new(&client, &cache)
            .resolve(&TestId::new("t"))
            .await;
        assert_eq!(resolution.policy, RerunPolicy::fallback("t"));
        let warning = resolution.warning().expect("fallback has a warning");
        assert_eq!(warning.kind, PolicyWarningKind::NotFound);
        assert!(!warning.is_notable());
    }

    #[tokio::test]
    async fn transport_error_falls_back() {
        let client = CountingClient {
            calls: AtomicUsize::new(0),
            result: Err(StatsLookupError::Transport {
                url: "http://stats".to_owned(),
                error: Arc::new(std::io::Error::other("connection refused")),
            }),
        };
        let cache = PolicyCache::new();
        let resolution = PolicyResolver::new(&client, &cache)
            .resolve(&TestId::new("t"))
            .await;
        assert_eq!(resolution.policy, RerunPolicy::fallback("t"));
        let warning = resolution.warning().expect("fallback has a warning");
        assert!(warning.is_notable());
        assert_eq!(
            warning.to_string(),
            "flakiness statistics unavailable for `t`: error fetching flakiness statistics \
             from `http://stats`\n  caused by:\n  - connection refused"
        );
    }
}
