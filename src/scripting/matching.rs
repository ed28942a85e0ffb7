//! Text matching predicate

use crate::caps::MatchingMode;
use crate::error::ScriptError;
use regex::{Regex, RegexBuilder};

/// Compares bot text with an expected text according to a [`MatchingMode`].
///
/// `include*`, `regexp*` and `wildcard*` modes search anywhere in the bot
/// text. In wildcard modes `*` matches any run of characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Matcher {
    mode: MatchingMode,
}

impl Matcher {
    pub fn new(mode: MatchingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> MatchingMode {
        self.mode
    }

    pub fn matches(&self, actual: &str, expected: &str) -> Result<bool, ScriptError> {
        Ok(match self.mode {
            MatchingMode::Exact => actual == expected,
            MatchingMode::Include => actual.contains(expected),
            MatchingMode::IncludeIgnoreCase => actual
                .to_lowercase()
                .contains(&expected.to_lowercase()),
            MatchingMode::Regexp => compile(expected, false)?.is_match(actual),
            MatchingMode::RegexpIgnoreCase => compile(expected, true)?.is_match(actual),
            MatchingMode::Wildcard => wildcard(expected, false)?.is_match(actual),
            MatchingMode::WildcardIgnoreCase => wildcard(expected, true)?.is_match(actual),
        })
    }

    /// True if `actual` matches at least one of `expected`
    pub fn matches_any<S: AsRef<str>>(&self, actual: &str, expected: &[S]) -> Result<bool, ScriptError> {
        for candidate in expected {
            if self.matches(actual, candidate.as_ref())? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn compile(pattern: &str, ignore_case: bool) -> Result<Regex, ScriptError> {
    RegexBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .build()
        .map_err(|e| ScriptError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn wildcard(expected: &str, ignore_case: bool) -> Result<Regex, ScriptError> {
    let pattern = expected
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("(?s:.*)");
    compile(&pattern, ignore_case)
}
