// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::WriteReportError,
    reporter::{ReportSink, RunReport},
};
use std::io::Write;

/// Writes the run summary as JSON.
///
/// The schema is [`flakybot_metadata::RunSummary`].
#[derive(Debug)]
pub struct JsonReporter<W> {
    writer: W,
}

impl<W: Write> JsonReporter<W> {
    /// Creates a new reporter writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for JsonReporter<W> {
    fn write_report(&mut self, report: &RunReport) -> Result<(), WriteReportError> {
        serde_json::to_writer_pretty(&mut self.writer, &report.to_summary())
            .map_err(WriteReportError::Json)?;
        writeln!(self.writer)
            .and_then(|()| self.writer.flush())
            .map_err(|error| WriteReportError::Io {
                kind: "JSON",
                error,
            })
    }
}
