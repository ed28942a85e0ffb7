//! Variable capture by matching bot text against a template

use super::functions;
use super::ScriptingMemory;
use crate::caps::MemoryMatchingMode;
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

/// A variable reference: sigil, a letter, then word characters
pub(crate) static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[A-Za-z][A-Za-z0-9_]*").expect("valid regex"));

/// Variable names referenced by a template, in order of appearance
pub fn variable_names(template: &str) -> Vec<&str> {
    VAR_RE.find_iter(template).map(|m| m.as_str()).collect()
}

fn span_pattern(mode: MemoryMatchingMode) -> &'static str {
    match mode {
        MemoryMatchingMode::NonWhitespace => r"(\S+)",
        MemoryMatchingMode::Word => r"(\w+)",
        MemoryMatchingMode::Joker => r"([\s\S]+)",
    }
}

/// Regex source for a template: literals escaped, variables as groups
fn template_pattern(template: &str, mode: MemoryMatchingMode) -> String {
    let group = span_pattern(mode);
    let mut pattern = String::with_capacity(template.len() * 2);
    // `split` yields one more literal than there are variables
    for (i, literal) in VAR_RE.split(template).enumerate() {
        if i > 0 {
            pattern.push_str(group);
        }
        pattern.push_str(&regex::escape(literal));
    }
    pattern
}

fn build(pattern: &str, ignore_case: bool) -> Option<Regex> {
    match RegexBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to build capture pattern");
            None
        }
    }
}

pub(super) fn capture(
    memory: &mut ScriptingMemory,
    actual: &str,
    template: &str,
    mode: MemoryMatchingMode,
    ignore_case: bool,
) -> bool {
    let names = variable_names(template);
    if names.is_empty() {
        return false;
    }

    let pattern = template_pattern(template, mode);
    let anchored = format!("^(?:{pattern})$");

    // Prefer a full match, fall back to finding the template inside the text
    let captures = [anchored.as_str(), pattern.as_str()]
        .into_iter()
        .filter_map(|p| build(p, ignore_case))
        .find_map(|re| {
            re.captures(actual).map(|caps| {
                caps.iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()))
                    .collect::<Vec<_>>()
            })
        });

    let Some(values) = captures else {
        tracing::debug!(template, "Template did not match, nothing captured");
        return false;
    };

    for (name, value) in names.into_iter().zip(values) {
        if functions::is_function_name(name) {
            continue;
        }
        if let Some(value) = value {
            tracing::debug!(name, value = %value, "Captured variable");
            memory.set(name, value);
        }
    }
    true
}
