// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use tracing::debug;

const BUILDKITE_JOB_PREFIX: &str = "buildkite/";
const CIRCLECI_JOB_PREFIX: &str = "ci/circleci:";

/// The environment variable overriding the statistics API URL.
pub const API_URL_ENV: &str = "FLAKY_BOT_API_URL";

/// The environment variable holding the statistics API token.
pub const API_TOKEN_ENV: &str = "FLAKY_BOT_API_TOKEN";

/// The CI job and repository a run belongs to, along with API credentials.
///
/// Detected from environment variables set by CircleCI and Buildkite. When both are present,
/// Buildkite wins.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StatsEnvironment {
    /// The repository name, in `owner/repo` form.
    pub repo_name: Option<String>,

    /// The job name, prefixed with the CI provider.
    pub job_name: Option<String>,

    /// An API URL that overrides the configured one.
    pub api_url: Option<String>,

    /// The bearer token used to authenticate with the API.
    pub api_token: Option<String>,
}

impl StatsEnvironment {
    /// Reads the environment of the current process.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the environment out of a lookup function, returning `None` for unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        // Empty values are treated the same as unset ones.
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let mut env = Self {
            api_url: var(API_URL_ENV),
            api_token: var(API_TOKEN_ENV),
            ..Self::default()
        };

        if let Some(job) = var("CIRCLE_JOB") {
            env.job_name = Some(format!("{CIRCLECI_JOB_PREFIX}{job}"));
            env.repo_name = Some(format!(
                "{}/{}",
                var("CIRCLE_PROJECT_USERNAME").unwrap_or_default(),
                var("CIRCLE_PROJECT_REPONAME").unwrap_or_default(),
            ));
            debug!(job_name = ?env.job_name, "detected CircleCI");
        }

        if let Some(slug) = var("BUILDKITE_PIPELINE_SLUG") {
            env.job_name = Some(format!("{BUILDKITE_JOB_PREFIX}{slug}"));
            env.repo_name = var("BUILDKITE_REPO").map(|repo| buildkite_repo_name(&repo));
            debug!(job_name = ?env.job_name, "detected Buildkite");
        }

        env
    }
}

/// `BUILDKITE_REPO` is in the form `git@github.com:owner/repo.git`.
fn buildkite_repo_name(repo: &str) -> String {
    let repo = repo.strip_prefix("git@github.com:").unwrap_or(repo);
    repo.strip_suffix(".git").unwrap_or(repo).to_owned()
}
