// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::ExpectedError,
    output::{OutputContext, OutputOpts, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use flakybot_runner::{
    config::{FlakybotConfig, RerunConcurrency},
    initial_results::InitialResults,
    reporter::{DisplayReporter, JsonReporter, JunitReporter, ReportSink, RunReport},
    runner::{CommandExecutor, RerunRunnerBuilder},
    signal::SignalHandlerKind,
    stats::{HttpStatsClient, StatsEnvironment},
};
use std::{
    fs::File,
    io::{self, BufWriter},
    sync::Arc,
};
use tracing::{debug, info};

/// Adaptive reruns for flaky tests.
///
/// flakybot reads the results of an initial test run, looks up how flaky each failing test is
/// known to be, and reruns those tests until they either pass often enough or run out of
/// attempts.
#[derive(Debug, Parser)]
#[command(version, name = "flakybot", styles = clap_styles::style())]
pub struct FlakybotApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl FlakybotApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the exit code on success.
    pub fn exec(self, output: OutputContext) -> Result<i32, ExpectedError> {
        match self.command {
            Command::Run(opts) => opts.exec(output),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rerun the failing tests of an initial test run
    ///
    /// Each failing test is rerun with COMMAND. In COMMAND, `{test}` is replaced by the test
    /// name (if it doesn't appear, the name is appended), and `{junit}` is replaced by the path
    /// of a JUnit XML file the command should write its result to.
    Run(RunOpts),
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: .config/flakybot.toml in the current directory]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Config profile to use
    #[arg(long, short = 'P', value_name = "PROFILE", env = "FLAKYBOT_PROFILE")]
    profile: Option<String>,
}

impl ConfigOpts {
    fn make_config(&self, workspace_root: &Utf8Path) -> Result<FlakybotConfig, ExpectedError> {
        Ok(FlakybotConfig::from_sources(
            workspace_root,
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Args)]
struct RunOpts {
    /// JUnit XML files with the results of the initial test run
    #[arg(long, value_name = "FILE", required = true, num_args = 1..)]
    initial_results: Vec<Utf8PathBuf>,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    /// Number of tests to rerun simultaneously [possible values: integer or "num-cpus"]
    #[arg(long, short = 'j', value_name = "N", env = "FLAKYBOT_TEST_THREADS")]
    test_threads: Option<RerunConcurrency>,

    /// Write a JUnit XML report to this path, overriding the profile
    #[arg(long, value_name = "PATH")]
    junit_out: Option<Utf8PathBuf>,

    /// Write a JSON summary to this path ("-" for standard output)
    #[arg(long, value_name = "PATH")]
    json_out: Option<Utf8PathBuf>,

    /// The command that runs one attempt of a test
    #[arg(last = true, required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl RunOpts {
    fn exec(self, output: OutputContext) -> Result<i32, ExpectedError> {
        let workspace_root = current_dir()?;
        let config = self.config_opts.make_config(&workspace_root)?;
        let profile_name = self
            .config_opts
            .profile
            .as_deref()
            .unwrap_or_else(|| config.default_profile_name());
        let profile = config.profile(profile_name)?;

        let initial = InitialResults::from_junit_paths(&self.initial_results)?;
        debug!(
            tests = initial.len(),
            profile = profile.name(),
            "read initial results"
        );

        let stats_config = config.stats();
        let stats = HttpStatsClient::new(
            stats_config.api_url(),
            StatsEnvironment::from_env(),
            stats_config.request_timeout(),
        );
        debug!(url = stats.url(), "using flaky test statistics");

        let mut executor =
            CommandExecutor::from_argv(self.command).ok_or(ExpectedError::EmptyCommand)?;
        if let Some(timeout) = profile.attempt_timeout() {
            executor.set_attempt_timeout(timeout);
        }

        let mut builder = RerunRunnerBuilder::default();
        builder.set_test_threads(self.test_threads.unwrap_or_else(|| profile.test_threads()));
        if let Some(timeout) = profile.global_timeout() {
            builder.set_global_timeout(timeout);
        }
        let runner = builder.build(
            Arc::new(stats),
            Arc::new(executor),
            SignalHandlerKind::Standard,
        )?;

        let mut displayer = DisplayReporter::new(io::stderr());
        displayer.set_verbose(output.verbose);
        if output.color.should_colorize(supports_color::Stream::Stderr) {
            displayer.colorize();
        }

        // Live output errors don't stop the run, but are reported once it's done.
        let mut live_error = None;
        let report = runner.execute(&initial, |event| {
            if let Err(error) = displayer.write_event(&event)
                && live_error.is_none()
            {
                live_error = Some(error);
            }
        });

        displayer.write_report(&report)?;
        if let Some(error) = live_error {
            return Err(error.into());
        }

        let junit_path = self.junit_out.or_else(|| profile.junit_path());
        if let Some(path) = junit_path {
            JunitReporter::new(path.clone()).write_report(&report)?;
            info!("wrote JUnit report to `{path}`");
        }
        if let Some(path) = &self.json_out {
            write_json(path, &report)?;
        }

        Ok(report.exit_code())
    }
}

fn write_json(path: &Utf8Path, report: &RunReport) -> Result<(), ExpectedError> {
    if path == "-" {
        JsonReporter::new(io::stdout().lock()).write_report(report)?;
        return Ok(());
    }

    let file = File::create(path)
        .map_err(|err| ExpectedError::report_create_error(path.to_owned(), err))?;
    JsonReporter::new(BufWriter::new(file)).write_report(report)?;
    Ok(())
}

fn current_dir() -> Result<Utf8PathBuf, ExpectedError> {
    let dir = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
    Utf8PathBuf::from_path_buf(dir).map_err(ExpectedError::current_dir_invalid_utf8)
}
