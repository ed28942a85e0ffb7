//! Conversation corpus, utterance groups and the matching predicate
//!
//! The registry is filled by whatever compiles authored files into
//! [`ConversationScript`]s, expanded once, then shared read-only between
//! concurrently running conversations.

mod expansion;
mod matching;

#[cfg(test)]
mod proptests;

pub use matching::Matcher;

use crate::caps::{Capabilities, UtteranceExpansion};
use crate::convo::{ConversationScript, Utterance};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named set of variable values; conversations using its variables are
/// replayed once per set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptingMemorySet {
    pub name: String,
    pub values: BTreeMap<String, String>,
}

impl ScriptingMemorySet {
    pub fn new<I, K, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            values: values
                .into_iter()
                .map(|(k, v)| {
                    let k = k.into();
                    let k = if k.starts_with('$') { k } else { format!("${k}") };
                    (k, v.into())
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptingRegistry {
    matcher: Matcher,
    expansion: UtteranceExpansion,
    convos: Vec<ConversationScript>,
    partial_convos: BTreeMap<String, ConversationScript>,
    utterances: BTreeMap<String, Utterance>,
    memory_sets: Vec<ScriptingMemorySet>,
}

impl ScriptingRegistry {
    pub fn new(caps: &Capabilities) -> Self {
        Self {
            matcher: Matcher::new(caps.matching_mode),
            expansion: caps.utterance_expansion.clone(),
            ..Self::default()
        }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn add_convos(&mut self, convos: impl IntoIterator<Item = ConversationScript>) {
        self.convos.extend(convos);
    }

    /// Register conversations that other conversations can `INCLUDE`.
    ///
    /// A later partial with the same name replaces the earlier one.
    pub fn add_partial_convos(&mut self, partials: impl IntoIterator<Item = ConversationScript>) {
        for partial in partials {
            self.partial_convos
                .insert(partial.header.name.clone(), partial);
        }
    }

    /// Register utterance groups, appending unseen variants to existing groups
    pub fn add_utterances(&mut self, utterances: impl IntoIterator<Item = Utterance>) {
        for utterance in utterances {
            match self.utterances.get_mut(&utterance.name) {
                Some(existing) => {
                    for variant in utterance.utterances {
                        if !existing.utterances.contains(&variant) {
                            existing.utterances.push(variant);
                        }
                    }
                }
                None => {
                    let mut fresh = Utterance::new(utterance.name.clone(), Vec::<String>::new());
                    for variant in utterance.utterances {
                        if !fresh.utterances.contains(&variant) {
                            fresh.utterances.push(variant);
                        }
                    }
                    self.utterances.insert(utterance.name, fresh);
                }
            }
        }
    }

    pub fn add_scripting_memories(&mut self, sets: impl IntoIterator<Item = ScriptingMemorySet>) {
        self.memory_sets.extend(sets);
    }

    pub fn convos(&self) -> &[ConversationScript] {
        &self.convos
    }

    pub fn partial(&self, name: &str) -> Option<&ConversationScript> {
        self.partial_convos.get(name)
    }

    pub fn partial_names(&self) -> Vec<String> {
        self.partial_convos.keys().cloned().collect()
    }

    pub fn utterance(&self, name: &str) -> Option<&Utterance> {
        self.utterances.get(name)
    }

    /// Texts a bot response may match: the variants of the utterance group
    /// named by `expected`, or `expected` itself
    pub fn resolve_utterances_to_match(&self, expected: &str) -> Vec<String> {
        match self.utterances.get(expected.trim()) {
            Some(utterance) if !utterance.utterances.is_empty() => utterance.utterances.clone(),
            _ => vec![expected.to_string()],
        }
    }

    /// Text to send for a `me` step: the first variant of a named group, or
    /// the text itself
    pub fn resolve_utterance_to_send(&self, text: &str) -> String {
        self.utterances
            .get(text.trim())
            .and_then(|u| u.utterances.first())
            .cloned()
            .unwrap_or_else(|| text.to_string())
    }

    /// Replace the corpus by its expansion: memory sets first, then utterances
    pub fn expand_convos(&mut self) {
        let before = self.convos.len();
        let expanded: Vec<ConversationScript> = self
            .convos
            .iter()
            .flat_map(|convo| expansion::expand_scripting_memories(convo, &self.memory_sets))
            .flat_map(|convo| {
                expansion::expand_utterances(&convo, &self.utterances, &self.expansion)
            })
            .collect();
        tracing::info!(before, after = expanded.len(), "Expanded conversations");
        self.convos = expanded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::MatchingMode;
    use crate::convo::ConversationStep;

    #[test]
    fn test_utterance_merge_deduplicates() {
        let mut registry = ScriptingRegistry::default();
        registry.add_utterances([Utterance::new("HELLO", ["hi", "hello", "hi"])]);
        registry.add_utterances([Utterance::new("HELLO", ["hello", "hey"])]);
        assert_eq!(
            registry.utterance("HELLO").unwrap().utterances,
            vec!["hi", "hello", "hey"]
        );
    }

    #[test]
    fn test_resolve_utterances() {
        let mut registry = ScriptingRegistry::default();
        registry.add_utterances([Utterance::new("HELLO", ["hi", "hello"])]);
        assert_eq!(registry.resolve_utterances_to_match("HELLO"), vec!["hi", "hello"]);
        assert_eq!(registry.resolve_utterances_to_match("hi there"), vec!["hi there"]);
        assert_eq!(registry.resolve_utterance_to_send("HELLO"), "hi");
        assert_eq!(registry.resolve_utterance_to_send("plain"), "plain");
    }

    #[test]
    fn test_matcher_follows_caps() {
        let caps = Capabilities {
            matching_mode: MatchingMode::Exact,
            ..Capabilities::default()
        };
        let registry = ScriptingRegistry::new(&caps);
        assert_eq!(registry.matcher().mode(), MatchingMode::Exact);
    }

    #[test]
    fn test_partials_replace_by_name() {
        let mut registry = ScriptingRegistry::default();
        registry.add_partial_convos([
            ConversationScript::new("login", vec![ConversationStep::me("old")]),
            ConversationScript::new("login", vec![ConversationStep::me("new")]),
        ]);
        assert_eq!(registry.partial_names(), vec!["login"]);
        assert_eq!(
            registry.partial("login").unwrap().steps[0].message_text.as_deref(),
            Some("new")
        );
    }

    #[test]
    fn test_expand_convos_applies_sets_then_utterances() {
        let mut registry = ScriptingRegistry::new(&Capabilities::default());
        registry.add_utterances([Utterance::new("ASK", ["weather in $city?", "forecast for $city"])]);
        registry.add_scripting_memories([
            ScriptingMemorySet::new("vienna", [("city", "Vienna")]),
            ScriptingMemorySet::new("rome", [("city", "Rome")]),
        ]);
        registry.add_convos([ConversationScript::new(
            "weather",
            vec![
                ConversationStep::me("ASK"),
                ConversationStep::bot("sunny in $city"),
            ],
        )]);

        registry.expand_convos();
        let names: Vec<&str> = registry.convos().iter().map(ConversationScript::name).collect();
        assert_eq!(
            names,
            vec![
                "weather.vienna/ASK-L1",
                "weather.vienna/ASK-L2",
                "weather.rome/ASK-L1",
                "weather.rome/ASK-L2",
            ]
        );
    }
}
