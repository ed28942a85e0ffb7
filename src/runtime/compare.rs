//! Comparing bot responses with step expectations

use crate::convo::normalize_text;
use crate::error::{AssertionError, ConvoError};
use crate::memory::{ApplyContext, ScriptingMemory, VariableMemory};
use crate::scripting::Matcher;
use serde_json::Value;

/// Expectation checks for one bot step.
///
/// Every expected text is captured against the actual text first, then
/// substituted and matched, so variables captured by a template are already
/// known when the same template is compared.
pub(super) struct Expectation<'a> {
    pub step_tag: &'a str,
    pub matcher: &'a Matcher,
    pub variables: &'a VariableMemory,
    pub ctx: ApplyContext<'a>,
    pub normalize: bool,
}

impl Expectation<'_> {
    /// Match `actual` against any of `candidates`, or against none of them
    /// when `not` is set
    pub fn check_text(
        &self,
        memory: &mut ScriptingMemory,
        actual: &str,
        candidates: &[String],
        not: bool,
    ) -> Result<(), ConvoError> {
        let actual = normalize_text(actual, self.normalize);
        let mut tried = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let (matched, expected) = self.matches_template(memory, &actual, candidate, !not)?;
            if matched {
                if not {
                    return Err(AssertionError::mismatch(
                        self.step_tag,
                        format!("bot response \"{actual}\" matches \"{expected}\", expected it not to"),
                        expected,
                        actual,
                    )
                    .into());
                }
                return Ok(());
            }
            tried.push(expected);
        }
        if not {
            return Ok(());
        }
        let expected = tried.join(" | ");
        Err(AssertionError::mismatch(
            self.step_tag,
            format!("bot response \"{actual}\" does not match \"{expected}\""),
            expected,
            actual,
        )
        .into())
    }

    /// Recursive structural comparison.
    ///
    /// Arrays must have the same length, objects must contain every expected
    /// key and string leaves go through capture and matching.
    pub fn check_value(
        &self,
        memory: &mut ScriptingMemory,
        expected: &Value,
        actual: &Value,
        path: &str,
    ) -> Result<(), ConvoError> {
        match (expected, actual) {
            (Value::Array(expected), Value::Array(actual)) => {
                if expected.len() != actual.len() {
                    return Err(AssertionError::LengthMismatch {
                        step_tag: self.step_tag.to_string(),
                        path: path.to_string(),
                        expected: expected.len(),
                        actual: actual.len(),
                    }
                    .into());
                }
                for (index, (e, a)) in expected.iter().zip(actual).enumerate() {
                    self.check_value(memory, e, a, &format!("{path}[{index}]"))?;
                }
                Ok(())
            }
            (Value::Object(expected), Value::Object(actual)) => {
                for (key, e) in expected {
                    let child = format!("{path}.{key}");
                    let a = actual.get(key).ok_or_else(|| AssertionError::MissingKey {
                        step_tag: self.step_tag.to_string(),
                        path: child.clone(),
                    })?;
                    self.check_value(memory, e, a, &child)?;
                }
                Ok(())
            }
            (Value::Array(_) | Value::Object(_), _) => Err(AssertionError::mismatch(
                self.step_tag,
                format!("expected {path} to be {}", kind(expected)),
                expected.to_string(),
                actual.to_string(),
            )
            .into()),
            (Value::String(template), actual) => {
                let actual = normalize_text(&leaf_text(actual), self.normalize);
                let (matched, expected) = self.matches_template(memory, &actual, template, true)?;
                if matched {
                    Ok(())
                } else {
                    Err(AssertionError::mismatch(
                        self.step_tag,
                        format!("{path}: \"{actual}\" does not match \"{expected}\""),
                        expected,
                        actual,
                    )
                    .into())
                }
            }
            (expected, actual) => {
                if leaf_text(expected) == leaf_text(actual) {
                    Ok(())
                } else {
                    Err(AssertionError::mismatch(
                        self.step_tag,
                        format!("{path}: expected {expected}, bot response has {actual}"),
                        expected.to_string(),
                        actual.to_string(),
                    )
                    .into())
                }
            }
        }
    }

    /// Capture (if asked), substitute and match one template. Returns the
    /// substituted template for diagnostics.
    fn matches_template(
        &self,
        memory: &mut ScriptingMemory,
        actual: &str,
        template: &str,
        capture: bool,
    ) -> Result<(bool, String), ConvoError> {
        let template = normalize_text(template, self.normalize);
        if capture {
            self.variables.capture(memory, actual, &template);
        }
        let expected = self.variables.apply(memory, &template, &self.ctx)?;
        let matched = self.matcher.matches(actual, &expected)?;
        Ok((matched, expected))
    }
}

fn leaf_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
        _ => "a scalar",
    }
}
