// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{StatsClient, StatsEnvironment, SuggestedPolicy};
use crate::{errors::StatsLookupError, model::TestId};
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// The default URL of the FlakyBot statistics API.
pub const DEFAULT_API_URL: &str = "https://api.flakybot.com/api/v1/flaky-tests";

type FlakyTestMap = HashMap<TestId, SuggestedPolicy>;

/// A [`StatsClient`] that fetches the list of flaky tests from the FlakyBot API.
///
/// The list is fetched once, on the first lookup, and shared by every later lookup. If the fetch
/// fails, every lookup fails with the same transport error.
#[derive(Debug)]
pub struct HttpStatsClient {
    request: FetchRequest,
    flaky_tests: OnceCell<Result<FlakyTestMap, StatsLookupError>>,
}

#[derive(Clone, Debug)]
struct FetchRequest {
    url: String,
    token: String,
    repo_name: Option<String>,
    job_name: Option<String>,
    timeout: Duration,
}

impl HttpStatsClient {
    /// Creates a new client.
    ///
    /// `api_url` is used unless the environment overrides it.
    pub fn new(api_url: impl Into<String>, env: StatsEnvironment, timeout: Duration) -> Self {
        let url = env.api_url.unwrap_or_else(|| api_url.into());
        Self {
            request: FetchRequest {
                url,
                token: env.api_token.unwrap_or_default(),
                repo_name: env.repo_name,
                job_name: env.job_name,
                timeout,
            },
            flaky_tests: OnceCell::new(),
        }
    }

    /// Returns the URL this client fetches from.
    pub fn url(&self) -> &str {
        &self.request.url
    }

    async fn flaky_tests(&self) -> &Result<FlakyTestMap, StatsLookupError> {
        self.flaky_tests
            .get_or_init(|| async {
                let request = self.request.clone();
                let url = request.url.clone();
                let res = match tokio::task::spawn_blocking(move || request.fetch()).await {
                    Ok(res) => res,
                    Err(error) => Err(StatsLookupError::Transport {
                        url,
                        error: Arc::new(error),
                    }),
                };
                match &res {
                    Ok(map) => debug!(count = map.len(), "fetched flaky tests"),
                    Err(error) => warn!("{error}, falling back to no reruns"),
                }
                res
            })
            .await
    }
}

impl StatsClient for HttpStatsClient {
    fn lookup<'a>(
        &'a self,
        test_id: &'a TestId,
    ) -> BoxFuture<'a, Result<SuggestedPolicy, StatsLookupError>> {
        async move {
            match self.flaky_tests().await {
                Ok(map) => map
                    .get(test_id)
                    .copied()
                    .ok_or_else(|| StatsLookupError::NotFound {
                        test_id: test_id.clone(),
                    }),
                Err(error) => Err(error.clone()),
            }
        }
        .boxed()
    }
}

impl FetchRequest {
    fn fetch(self) -> Result<FlakyTestMap, StatsLookupError> {
        let transport = |error: ureq::Error| StatsLookupError::Transport {
            url: self.url.clone(),
            error: Arc::new(error),
        };

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build()
            .into();

        let mut request = agent
            .get(&self.url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json");
        if let Some(repo_name) = &self.repo_name {
            request = request.query("repo_name", repo_name);
        }
        if let Some(job_name) = &self.job_name {
            request = request.query("job_name", job_name);
        }

        debug!(url = %self.url, repo_name = ?self.repo_name, job_name = ?self.job_name, "fetching flaky tests");
        let mut response = request.call().map_err(transport)?;
        let body = response.body_mut().read_to_string().map_err(transport)?;

        parse_flaky_tests(&body).map_err(|error| StatsLookupError::Malformed {
            url: self.url.clone(),
            error: Arc::new(error),
        })
    }
}

#[derive(Deserialize)]
struct FlakyTestsResponse {
    #[serde(default)]
    flaky_tests: Vec<serde_json::Value>,
}

/// Maps the API response into typed suggestions.
///
/// Individual entries are interpreted leniently: entries without a non-empty `test_name` are
/// ignored, and counts that aren't integers are treated as missing.
fn parse_flaky_tests(body: &str) -> Result<FlakyTestMap, serde_json::Error> {
    let response: FlakyTestsResponse = serde_json::from_str(body)?;

    let mut map = FlakyTestMap::with_capacity(response.flaky_tests.len());
    for entry in &response.flaky_tests {
        let Some(test_name) = entry
            .get("test_name")
            .and_then(|name| name.as_str())
            .filter(|name| !name.is_empty())
        else {
            continue;
        };
        let policy = SuggestedPolicy {
            min_passes: entry.get("min_passes").and_then(|v| v.as_i64()),
            max_runs: entry.get("max_runs").and_then(|v| v.as_i64()),
        };
        map.insert(TestId::new(test_name), policy);
    }

    Ok(map)
}
