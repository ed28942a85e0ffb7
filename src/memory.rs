//! Scripting memory: variable capture and substitution
//!
//! Variables are `$name` references inside step texts. A bot step captures
//! their values from the bot's answer, later steps get them substituted back
//! in, together with a catalogue of dynamic functions (`$now`, `$random(5)`,
//! `$msg($.buttons[0].text)`, ...).

mod apply;
mod capture;
pub mod functions;
pub mod path;

#[cfg(test)]
mod proptests;

pub use capture::variable_names;

use crate::caps::{Capabilities, MatchingMode, MemoryMatchingMode};
use crate::error::ConvoError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Captured variable values of one run, keyed by name including the `$` sigil
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptingMemory(BTreeMap<String, String>);

impl ScriptingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&with_sigil(name)).map(String::as_str)
    }

    /// Store a value; the sigil is added when missing
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(with_sigil(name), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&with_sigil(name))
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Variable names ordered so that no name precedes one it is a prefix of
    pub(crate) fn names_longest_first(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.0.keys().map(String::as_str).collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        names
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ScriptingMemory {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut memory = Self::new();
        for (k, v) in iter {
            memory.set(&k.into(), v);
        }
        memory
    }
}

fn with_sigil(name: &str) -> String {
    if name.starts_with('$') {
        name.to_string()
    } else {
        format!("${name}")
    }
}

/// Everything a substitution may read besides the memory itself
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext<'a> {
    pub caps: &'a Capabilities,
    /// Name of the running conversation, for `$testcasename`
    pub convo_name: &'a str,
    /// JSON form of the outgoing or incoming message, for `$msg(PATH)`
    pub msg: Option<&'a Value>,
}

impl<'a> ApplyContext<'a> {
    pub fn new(caps: &'a Capabilities, convo_name: &'a str) -> Self {
        Self {
            caps,
            convo_name,
            msg: None,
        }
    }

    #[must_use]
    pub fn with_msg(mut self, msg: &'a Value) -> Self {
        self.msg = Some(msg);
        self
    }
}

/// Captures values from bot text and substitutes them into templates
#[derive(Debug, Clone)]
pub struct VariableMemory {
    mode: MemoryMatchingMode,
    enabled: bool,
    ignore_case: bool,
}

impl VariableMemory {
    pub fn new(caps: &Capabilities) -> Self {
        Self {
            mode: caps.memory_matching_mode,
            enabled: caps.enable_memory,
            ignore_case: matches!(
                caps.matching_mode,
                MatchingMode::IncludeIgnoreCase
                    | MatchingMode::RegexpIgnoreCase
                    | MatchingMode::WildcardIgnoreCase
            ),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: MemoryMatchingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Capture variable values from `actual` using `template` as the pattern.
    ///
    /// Returns true if the template matched. On no match the memory is left
    /// untouched.
    pub fn capture(&self, memory: &mut ScriptingMemory, actual: &str, template: &str) -> bool {
        if !self.enabled {
            return false;
        }
        capture::capture(memory, actual, template, self.mode, self.ignore_case)
    }

    /// Substitute known variables and dynamic functions in a single
    /// left-to-right pass
    pub fn apply(
        &self,
        memory: &ScriptingMemory,
        template: &str,
        ctx: &ApplyContext<'_>,
    ) -> Result<String, ConvoError> {
        apply::apply(memory, template, ctx)
    }

    /// `apply` over an argument list, returning a new list
    pub fn apply_to_args(
        &self,
        args: &[String],
        memory: &ScriptingMemory,
        ctx: &ApplyContext<'_>,
    ) -> Result<Vec<String>, ConvoError> {
        args.iter()
            .map(|arg| apply::apply(memory, arg, ctx))
            .collect()
    }

    /// `apply` over every string leaf of a structured payload
    pub fn apply_to_value(
        &self,
        value: &Value,
        memory: &ScriptingMemory,
        ctx: &ApplyContext<'_>,
    ) -> Result<Value, ConvoError> {
        Ok(match value {
            Value::String(s) => Value::String(apply::apply(memory, s, ctx)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.apply_to_value(v, memory, ctx))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.apply_to_value(v, memory, ctx)?)))
                    .collect::<Result<_, ConvoError>>()?,
            ),
            other => other.clone(),
        })
    }
}
