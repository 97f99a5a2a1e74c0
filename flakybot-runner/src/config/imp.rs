// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::RerunConcurrency;
use crate::errors::{ConfigParseError, ConfigParseErrorKind, ProfileNotFound};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use tracing::warn;

/// Trait for handling configuration warnings.
///
/// This allows warnings to be logged (the default) or collected for testing.
pub trait ConfigWarnings {
    /// Handle unknown configuration keys found in a config file.
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        workspace_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    );
}

/// Default implementation of [`ConfigWarnings`] that logs warnings using the tracing crate.
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        workspace_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    ) {
        let mut unknown_str = String::new();
        if unknown.len() == 1 {
            // Print this on the same line.
            unknown_str.push_str("key: ");
            unknown_str.extend(unknown.iter().map(String::as_str));
        } else {
            unknown_str.push_str("keys:\n");
            for ignored_key in unknown {
                unknown_str.push('\n');
                unknown_str.push_str("  - ");
                unknown_str.push_str(ignored_key);
            }
        }

        warn!(
            "in config file {}, ignoring unknown configuration {unknown_str}",
            config_file
                .strip_prefix(workspace_root)
                .unwrap_or(config_file),
        )
    }
}

/// Overall configuration for flakybot.
///
/// Most settings are managed through profiles, obtained through the [`profile`](Self::profile)
/// method.
#[derive(Clone, Debug)]
pub struct FlakybotConfig {
    workspace_root: Utf8PathBuf,
    inner: FlakybotConfigDeserialize,
}

impl FlakybotConfig {
    /// The default location of the config within the workspace: `.config/flakybot.toml`.
    pub const CONFIG_PATH: &'static str = ".config/flakybot.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the config from the given file, or if not specified from `.config/flakybot.toml` in
    /// the workspace root.
    ///
    /// If no config file is specified and the workspace doesn't have `.config/flakybot.toml`, the
    /// default config is used.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_with_warnings(workspace_root, config_file, &mut DefaultConfigWarnings)
    }

    /// Loads configuration from the given sources, with custom warning handling.
    pub fn from_sources_with_warnings(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();

        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (inner, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            warnings.unknown_config_keys(&config_file, &workspace_root, &unknown);
        }

        if !inner.profiles.contains_key(&inner.default_profile) {
            return Err(ConfigParseError::new(
                &config_file,
                ConfigParseErrorKind::DefaultProfileNotDefined {
                    default_profile: inner.default_profile.clone(),
                },
            ));
        }

        Ok(Self {
            workspace_root,
            inner,
        })
    }

    /// Returns the default config.
    pub fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let config = Self::make_default_config()
            .build()
            .expect("default config is always valid");
        let inner: FlakybotConfigDeserialize =
            serde_ignored::deserialize(config, |path: serde_ignored::Path| {
                panic!("found unknown key in default config: {path}")
            })
            .expect("default config is always valid");

        Self {
            workspace_root: workspace_root.into(),
            inner,
        }
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the name of the profile used when none is specified.
    pub fn default_profile_name(&self) -> &str {
        &self.inner.default_profile
    }

    /// Returns the names of all profiles, in the order they were defined.
    pub fn profile_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.inner.profiles.keys().map(String::as_str)
    }

    /// Returns the statistics API configuration.
    pub fn stats(&self) -> StatsConfig {
        StatsConfig {
            api_url: self.inner.stats.api_url.clone(),
            request_timeout: self.inner.stats.request_timeout,
        }
    }

    /// Returns the profile with the given name, or an error if it isn't defined.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<FlakybotProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom_profile = self
            .inner
            .profiles
            .get(name)
            .ok_or_else(|| ProfileNotFound::new(name, self.profile_names()))?;
        let default_profile = self
            .inner
            .profiles
            .get(Self::DEFAULT_PROFILE)
            .expect("default profile always exists");

        Ok(FlakybotProfile {
            name: name.to_owned(),
            workspace_root: &self.workspace_root,
            default_profile,
            custom_profile,
        })
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(FlakybotConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: FlakybotConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // Both serde_path_to_error and the config crate report the key. Drop the key from
                // the config error for consistency.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// Configuration for the flaky test statistics API.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatsConfig {
    api_url: String,
    request_timeout: Duration,
}

impl StatsConfig {
    /// The configured API URL. The environment may override this.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// How long to wait for the API.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// A flakybot profile. Unset values are inherited from `[profile.default]`.
///
/// Returned by [`FlakybotConfig::profile`].
#[derive(Clone, Debug)]
pub struct FlakybotProfile<'cfg> {
    name: String,
    workspace_root: &'cfg Utf8Path,
    default_profile: &'cfg ProfileDeserialize,
    custom_profile: &'cfg ProfileDeserialize,
}

impl FlakybotProfile<'_> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of tests to rerun simultaneously.
    pub fn test_threads(&self) -> RerunConcurrency {
        self.custom_profile
            .test_threads
            .or(self.default_profile.test_threads)
            .unwrap_or_default()
    }

    /// Returns the maximum amount of time a single attempt may take.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.custom_profile
            .attempt_timeout
            .or(self.default_profile.attempt_timeout)
    }

    /// Returns the maximum amount of time the whole run may take.
    pub fn global_timeout(&self) -> Option<Duration> {
        self.custom_profile
            .global_timeout
            .or(self.default_profile.global_timeout)
    }

    /// Returns the path the JUnit report should be written to, if any.
    pub fn junit_path(&self) -> Option<Utf8PathBuf> {
        self.custom_profile
            .junit
            .path
            .as_deref()
            .or(self.default_profile.junit.path.as_deref())
            .map(|path| self.workspace_root.join(path))
    }
}

// This is the form of `FlakybotConfig` that gets deserialized.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FlakybotConfigDeserialize {
    default_profile: String,
    stats: StatsConfigDeserialize,
    #[serde(rename = "profile")]
    profiles: IndexMap<String, ProfileDeserialize>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StatsConfigDeserialize {
    api_url: String,
    #[serde(with = "humantime_serde")]
    request_timeout: Duration,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ProfileDeserialize {
    #[serde(default)]
    test_threads: Option<RerunConcurrency>,
    #[serde(default, with = "humantime_serde")]
    attempt_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    global_timeout: Option<Duration>,
    #[serde(default)]
    junit: JunitDeserialize,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct JunitDeserialize {
    #[serde(default)]
    path: Option<Utf8PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct CollectWarnings {
        unknown: Vec<String>,
    }

    impl ConfigWarnings for CollectWarnings {
        fn unknown_config_keys(
            &mut self,
            _config_file: &Utf8Path,
            _workspace_root: &Utf8Path,
            unknown: &BTreeSet<String>,
        ) {
            self.unknown.extend(unknown.iter().cloned());
        }
    }

    #[test]
    fn default_config_is_valid() {
        let config = FlakybotConfig::default_config("/fake/workspace");
        assert_eq!(config.default_profile_name(), "default");
        assert_eq!(
            config.stats().api_url(),
            "https://api.flakybot.com/api/v1/flaky-tests"
        );
        assert_eq!(config.stats().request_timeout(), Duration::from_secs(30));

        let profile = config.profile("default").expect("default profile exists");
        assert_eq!(profile.test_threads(), RerunConcurrency::SERIAL);
        assert_eq!(profile.attempt_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(profile.global_timeout(), None);
        assert_eq!(profile.junit_path(), None);
    }

    #[test]
    fn layered_config() {
        let workspace_dir = tempdir().expect("tempdir created");
        let config_dir = workspace_dir.path().join(".config");
        std::fs::create_dir(&config_dir).expect("config dir created");
        std::fs::write(
            config_dir.join("flakybot.toml"),
            indoc! {r#"
                default-profile = "ci"

                [stats]
                request-timeout = "5s"
                unknown-key = true

                [profile.ci]
                test-threads = 4
                global-timeout = "1h"

                [profile.ci.junit]
                path = "target/flakybot/junit.xml"
            "#},
        )
        .expect("config written");

        let mut warnings = CollectWarnings::default();
        let config =
            FlakybotConfig::from_sources_with_warnings(workspace_dir.path(), None, &mut warnings)
                .expect("config is valid");
        assert_eq!(warnings.unknown, vec!["stats.unknown-key".to_owned()]);

        assert_eq!(config.default_profile_name(), "ci");
        assert_eq!(config.stats().request_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.stats().api_url(),
            "https://api.flakybot.com/api/v1/flaky-tests",
            "api-url inherited from the default config"
        );

        let profile = config.profile("ci").expect("ci profile exists");
        assert_eq!(profile.name(), "ci");
        assert_eq!(profile.test_threads().get(), 4);
        assert_eq!(
            profile.attempt_timeout(),
            Some(Duration::from_secs(600)),
            "inherited from default profile"
        );
        assert_eq!(profile.global_timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(
            profile.junit_path(),
            Some(workspace_dir.path().join("target/flakybot/junit.xml"))
        );

        let error = config.profile("nightly").expect_err("profile not defined");
        assert_eq!(
            error.to_string(),
            "profile `nightly` not found (known profiles: ci, default)"
        );
    }

    #[test]
    fn undefined_default_profile() {
        let workspace_dir = tempdir().expect("tempdir created");
        let config_path = workspace_dir.path().join("flakybot.toml");
        std::fs::write(&config_path, "default-profile = \"missing\"\n").expect("config written");

        let error = FlakybotConfig::from_sources(workspace_dir.path(), Some(&config_path))
            .expect_err("default profile must be defined");
        assert!(
            matches!(
                error.kind(),
                ConfigParseErrorKind::DefaultProfileNotDefined { default_profile }
                    if default_profile == "missing"
            ),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn invalid_duration() {
        let workspace_dir = tempdir().expect("tempdir created");
        let config_path = workspace_dir.path().join("flakybot.toml");
        std::fs::write(
            &config_path,
            "[profile.default]\nattempt-timeout = \"soon\"\n",
        )
        .expect("config written");

        let error = FlakybotConfig::from_sources(workspace_dir.path(), Some(&config_path))
            .expect_err("duration is invalid");
        let ConfigParseErrorKind::DeserializeError(error) = error.kind() else {
            panic!("unexpected error kind: {:?}", error.kind());
        };
        assert_eq!(error.path().to_string(), "profile.default.attempt-timeout");
    }
}
