// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The first attempt of every test in a run, usually read from JUnit XML reports.

use crate::{
    errors::MalformedInitialResults,
    model::{Attempt, Outcome, TestId},
};
use camino::Utf8Path;
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use std::{collections::HashSet, time::Duration};
use tracing::debug;

/// The validated, ordered first attempts of every test in a run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InitialResults {
    attempts: Vec<Attempt>,
}

impl InitialResults {
    /// Validates and wraps a list of first attempts.
    ///
    /// Returns an error if any test identifier is empty, any attempt number isn't 1, or any test
    /// appears more than once.
    pub fn new(attempts: Vec<Attempt>) -> Result<Self, MalformedInitialResults> {
        let mut seen = HashSet::with_capacity(attempts.len());
        for (index, attempt) in attempts.iter().enumerate() {
            if attempt.test_id.is_empty() {
                return Err(MalformedInitialResults::EmptyTestId { index });
            }
            if attempt.attempt_number != 1 {
                return Err(MalformedInitialResults::InvalidAttemptNumber {
                    test_id: attempt.test_id.clone(),
                    attempt_number: attempt.attempt_number,
                });
            }
            if !seen.insert(&attempt.test_id) {
                return Err(MalformedInitialResults::DuplicateTestId {
                    test_id: attempt.test_id.clone(),
                });
            }
        }

        Ok(Self { attempts })
    }

    /// Parses initial results from a JUnit XML string.
    ///
    /// `source_name` is used in error messages.
    pub fn from_junit_str(source_name: &str, xml: &str) -> Result<Self, MalformedInitialResults> {
        Self::new(parse_junit(source_name, xml)?)
    }

    /// Reads initial results from one or more JUnit XML files, concatenated in order.
    pub fn from_junit_paths(
        paths: impl IntoIterator<Item = impl AsRef<Utf8Path>>,
    ) -> Result<Self, MalformedInitialResults> {
        let mut attempts = Vec::new();
        for path in paths {
            attempts.extend(read_junit_file(path.as_ref())?);
        }
        Self::new(attempts)
    }

    /// The first attempts, in the order they were reported.
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// The number of tests.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// Returns true if there are no tests.
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Iterates over the tests whose first attempt failed, along with their index.
    pub fn failing(&self) -> impl Iterator<Item = (usize, &Attempt)> + '_ {
        self.attempts
            .iter()
            .enumerate()
            .filter(|(_, attempt)| attempt.outcome.is_failure())
    }
}

/// Reads a JUnit XML file into attempts, without further validation.
pub(crate) fn read_junit_file(path: &Utf8Path) -> Result<Vec<Attempt>, MalformedInitialResults> {
    let xml = std::fs::read_to_string(path).map_err(|error| MalformedInitialResults::Read {
        path: path.to_owned(),
        error,
    })?;
    let attempts = parse_junit(path.as_str(), &xml)?;
    debug!(%path, count = attempts.len(), "read JUnit results");
    Ok(attempts)
}

/// Parses JUnit XML into first attempts, one per `<testcase>`.
///
/// The root element must be `<testsuites>` or `<testsuite>`. The test identifier is `classname::name`, or just `name` if there's no class name.
pub(crate) fn parse_junit(
    source_name: &str,
    xml: &str,
) -> Result<Vec<Attempt>, MalformedInitialResults> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parser = JunitParser::default();
    loop {
        let res = match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(start)) => parser.start(&start, false),
            Ok(Event::Empty(start)) => parser.start(&start, true),
            Ok(Event::End(end)) => {
                parser.end(end.name().as_ref());
                Ok(())
            }
            Ok(Event::Text(text)) => text
                .unescape()
                .map(|text| parser.text(&text))
                .map_err(|error| ParseError::Xml(error.into())),
            Ok(Event::CData(cdata)) => {
                parser.text(&String::from_utf8_lossy(&cdata.into_inner()));
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(error) => Err(ParseError::Xml(error)),
        };

        res.map_err(|error| match error {
            ParseError::Xml(error) => MalformedInitialResults::Xml {
                source_name: source_name.to_owned(),
                position: reader.error_position(),
                error,
            },
            ParseError::NotJunit => MalformedInitialResults::NotJunit {
                source_name: source_name.to_owned(),
            },
            ParseError::MissingAttribute { index, attribute } => {
                MalformedInitialResults::MissingAttribute {
                    source_name: source_name.to_owned(),
                    index,
                    attribute,
                }
            }
        })?;
    }

    // Empty input, or only a prolog and comments.
    if !parser.saw_root {
        return Err(MalformedInitialResults::NotJunit {
            source_name: source_name.to_owned(),
        });
    }

    Ok(parser.attempts)
}

enum ParseError {
    Xml(quick_xml::Error),
    NotJunit,
    MissingAttribute {
        index: usize,
        attribute: &'static str,
    },
}

impl From<quick_xml::Error> for ParseError {
    fn from(error: quick_xml::Error) -> Self {
        Self::Xml(error)
    }
}

#[derive(Default)]
struct JunitParser {
    attempts: Vec<Attempt>,
    saw_root: bool,
    current: Option<Attempt>,
    // Set while inside a <failure>, <error> or <skipped> element whose text may be the message.
    in_result: bool,
}

impl JunitParser {
    fn start(&mut self, start: &BytesStart<'_>, empty: bool) -> Result<(), ParseError> {
        if !self.saw_root {
            match start.name().as_ref() {
                b"testsuites" | b"testsuite" => self.saw_root = true,
                _ => return Err(ParseError::NotJunit),
            }
        }

        match start.name().as_ref() {
            b"testcase" => {
                let attempt = self.start_case(start)?;
                if empty {
                    self.attempts.push(attempt);
                } else {
                    self.current = Some(attempt);
                }
            }
            name @ (b"failure" | b"error" | b"skipped") => {
                let outcome = match name {
                    b"failure" => Outcome::Failed,
                    b"error" => Outcome::Errored,
                    _ => Outcome::Skipped,
                };
                if let Some(current) = &mut self.current {
                    // The first result element wins.
                    if current.outcome == Outcome::Passed {
                        current.outcome = outcome;
                        for attr in start.attributes() {
                            let attr = attr.map_err(quick_xml::Error::from)?;
                            let value = attr.unescape_value().map_err(quick_xml::Error::from)?;
                            match attr.key.as_ref() {
                                b"type" => current.error_type = Some(value.into_owned()),
                                b"message" => current.error_message = Some(value.into_owned()),
                                _ => {}
                            }
                        }
                        self.in_result = !empty;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn start_case(&self, start: &BytesStart<'_>) -> Result<Attempt, ParseError> {
        let mut name = None;
        let mut classname = None;
        let mut file = None;
        let mut line = None;
        let mut time = None;

        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let value = attr.unescape_value().map_err(quick_xml::Error::from)?;
            match attr.key.as_ref() {
                b"name" => name = Some(value.into_owned()),
                b"classname" => classname = Some(value.into_owned()),
                b"file" => file = Some(value.into_owned()),
                b"line" => line = Some(value.into_owned()),
                b"time" => time = value.parse::<f64>().ok(),
                _ => {}
            }
        }

        let name = name.ok_or(ParseError::MissingAttribute {
            index: self.attempts.len(),
            attribute: "name",
        })?;
        let test_id = match classname.filter(|classname| !classname.is_empty()) {
            Some(classname) => TestId::new(format!("{classname}::{name}")),
            None => TestId::new(name),
        };

        let mut attempt = Attempt::new(test_id, 1, Outcome::Passed);
        attempt.location = match (file, line) {
            (Some(file), Some(line)) => Some(format!("{file}:{line}")),
            (Some(file), None) => Some(file),
            (None, _) => None,
        };
        attempt.time_taken = time.and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        Ok(attempt)
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"testcase" => {
                if let Some(attempt) = self.current.take() {
                    self.attempts.push(attempt);
                }
                self.in_result = false;
            }
            b"failure" | b"error" | b"skipped" => self.in_result = false,
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if !self.in_result {
            return;
        }
        if let Some(current) = &mut self.current {
            // The body is only used as the message if there's no message attribute.
            if current.error_message.is_none() && !text.is_empty() {
                current.error_message = Some(text.to_owned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const PYTEST_REPORT: &str = indoc! {r#"
        <?xml version="1.0" encoding="utf-8"?>
        <testsuites>
          <testsuite name="pytest" errors="1" failures="1" skipped="1" tests="4" time="1.5">
            <testcase classname="tests.test_api" name="test_ok" time="0.5" />
            <testcase classname="tests.test_api" name="test_timeout" file="tests/test_api.py" line="42" time="1.25">
              <failure message="TimeoutError: request took too long" type="TimeoutError">traceback here</failure>
            </testcase>
            <testcase classname="tests.test_db" name="test_pool">
              <error type="ConnectionError">fixture &quot;db&quot; failed</error>
            </testcase>
            <testcase classname="" name="test_skip">
              <skipped message="not on linux" type="pytest.skip" />
            </testcase>
          </testsuite>
        </testsuites>
    "#};

    #[test]
    fn parse_pytest_report() {
        let results =
            InitialResults::from_junit_str("report.xml", PYTEST_REPORT).expect("report is valid");
        let attempts = results.attempts();
        assert_eq!(attempts.len(), 4);

        assert_eq!(
            attempts[0],
            Attempt::new("tests.test_api::test_ok", 1, Outcome::Passed)
                .with_time_taken(Duration::from_millis(500))
        );
        assert_eq!(
            attempts[1],
            Attempt::new("tests.test_api::test_timeout", 1, Outcome::Failed)
                .with_error_type("TimeoutError")
                .with_error_message("TimeoutError: request took too long")
                .with_location("tests/test_api.py:42")
                .with_time_taken(Duration::from_millis(1250))
        );
        assert_eq!(
            attempts[2],
            Attempt::new("tests.test_db::test_pool", 1, Outcome::Errored)
                .with_error_type("ConnectionError")
                .with_error_message("fixture \"db\" failed"),
            "body text used as message when there's no message attribute"
        );
        assert_eq!(attempts[3].test_id.as_str(), "test_skip");
        assert_eq!(attempts[3].outcome, Outcome::Skipped);

        let failing: Vec<_> = results.failing().map(|(index, _)| index).collect();
        assert_eq!(failing, vec![1, 2]);
    }

    #[test]
    fn invalid_xml() {
        let error =
            InitialResults::from_junit_str("bad.xml", "<testsuite></testcase></testsuite>")
                .expect_err("mismatched tags are invalid");
        assert!(
            matches!(error, MalformedInitialResults::Xml { .. }),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn not_junit() {
        for (xml, description) in [
            ("", "empty input"),
            ("   \n", "whitespace only"),
            (r#"<?xml version="1.0"?><!-- nothing -->"#, "prolog only"),
            ("<foo/>", "unknown root"),
            (r#"<testcase name="a" />"#, "bare test case"),
            (r#"<html><testsuite><testcase name="a" /></testsuite></html>"#, "nested suite"),
        ] {
            let error = InitialResults::from_junit_str("r.xml", xml)
                .expect_err(&format!("{description} is rejected"));
            assert!(
                matches!(error, MalformedInitialResults::NotJunit { .. }),
                "{description}: unexpected error: {error:?}"
            );
        }

        let results = InitialResults::from_junit_str("r.xml", r#"<testsuite name="empty" />"#)
            .expect("empty suite is valid");
        assert!(results.is_empty());
    }

    #[test]
    fn missing_name() {
        let error = InitialResults::from_junit_str(
            "r.xml",
            r#"<testsuite><testcase classname="a" /></testsuite>"#,
        )
        .expect_err("name is required");
        assert!(
            matches!(
                error,
                MalformedInitialResults::MissingAttribute {
                    index: 0,
                    attribute: "name",
                    ..
                }
            ),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn validation() {
        let error = InitialResults::new(vec![
            Attempt::new("a", 1, Outcome::Passed),
            Attempt::new("", 1, Outcome::Passed),
        ])
        .expect_err("empty ID is invalid");
        assert!(matches!(error, MalformedInitialResults::EmptyTestId { index: 1 }));

        let error = InitialResults::new(vec![Attempt::new("a", 2, Outcome::Failed)])
            .expect_err("attempt number must be 1");
        assert!(matches!(
            error,
            MalformedInitialResults::InvalidAttemptNumber {
                attempt_number: 2,
                ..
            }
        ));

        let error = InitialResults::new(vec![
            Attempt::new("a", 1, Outcome::Failed),
            Attempt::new("a", 1, Outcome::Passed),
        ])
        .expect_err("duplicates are invalid");
        assert!(matches!(error, MalformedInitialResults::DuplicateTestId { .. }));

        let results = InitialResults::new(Vec::new()).expect("empty results are valid");
        assert!(results.is_empty());
    }

    #[test]
    fn read_missing_file() {
        let error = InitialResults::from_junit_paths(["/nonexistent/flakybot/report.xml"])
            .expect_err("missing file is an error");
        assert!(matches!(error, MalformedInitialResults::Read { .. }));
    }
}
