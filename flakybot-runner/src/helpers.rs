// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for flakybot-runner.

/// Utilities for pluralizing various words based on count.
pub(crate) mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "run" if `count` is 1, otherwise "runs".
    pub(crate) fn runs_str(count: u32) -> &'static str {
        if count == 1 { "run" } else { "runs" }
    }

    /// Returns "warning" if `count` is 1, otherwise "warnings".
    pub(crate) fn warnings_str(count: usize) -> &'static str {
        if count == 1 { "warning" } else { "warnings" }
    }
}

/// Returns the last `max_lines` lines of `output`, with trailing whitespace trimmed.
pub(crate) fn tail_lines(output: &str, max_lines: usize) -> &str {
    if max_lines == 0 {
        return "";
    }
    let trimmed = output.trim_end();
    let start = trimmed
        .char_indices()
        .rev()
        .filter(|&(_, c)| c == '\n')
        .nth(max_lines.saturating_sub(1))
        .map_or(0, |(idx, _)| idx + 1);
    &trimmed[start..]
}
