//! Generating concrete conversations from utterance groups and memory sets

use super::ScriptingMemorySet;
use crate::caps::{UtteranceExpansion, UtteranceExpansionMode};
use crate::convo::{ConversationScript, ConversationStep, ExtensionRef, Sender, Utterance};
use crate::memory::variable_names;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A `me` step that names an utterance group, with the variant indexes to use
struct Slot<'a> {
    step_index: usize,
    utterance: &'a Utterance,
    indexes: Vec<usize>,
}

fn chosen_indexes(len: usize, expansion: &UtteranceExpansion) -> Vec<usize> {
    match expansion.mode {
        UtteranceExpansionMode::All => (0..len).collect(),
        UtteranceExpansionMode::First => (0..len.min(1)).collect(),
        UtteranceExpansionMode::Random => {
            let all: Vec<usize> = (0..len).collect();
            let mut picked: Vec<usize> = all
                .choose_multiple(&mut rand::thread_rng(), expansion.random_count.min(len))
                .copied()
                .collect();
            picked.sort_unstable();
            picked
        }
    }
}

/// Combinations of per-slot variant indexes, one `Vec` per generated conversation
fn combinations(slots: &[Slot<'_>], associate: bool) -> Vec<Vec<usize>> {
    if associate {
        let count = slots.iter().map(|s| s.indexes.len()).max().unwrap_or(0);
        return (0..count)
            .map(|k| slots.iter().map(|s| s.indexes[k % s.indexes.len()]).collect())
            .collect();
    }

    slots.iter().fold(vec![Vec::new()], |acc, slot| {
        acc.iter()
            .flat_map(|prefix| {
                slot.indexes.iter().map(move |&i| {
                    let mut combo = prefix.clone();
                    combo.push(i);
                    combo
                })
            })
            .collect()
    })
}

/// Expand `me` steps naming an utterance group into one conversation per
/// chosen variant. Conversations without such steps are returned unchanged.
pub(super) fn expand_utterances(
    convo: &ConversationScript,
    utterances: &BTreeMap<String, Utterance>,
    expansion: &UtteranceExpansion,
) -> Vec<ConversationScript> {
    let slots: Vec<Slot<'_>> = convo
        .steps
        .iter()
        .enumerate()
        .filter(|(_, step)| step.sender == Sender::Me)
        .filter_map(|(step_index, step)| {
            let utterance = utterances.get(step.message_text.as_deref()?.trim())?;
            let indexes = chosen_indexes(utterance.utterances.len(), expansion);
            (!indexes.is_empty()).then_some(Slot {
                step_index,
                utterance,
                indexes,
            })
        })
        .collect();

    if slots.is_empty() {
        return vec![convo.clone()];
    }

    let expanded: Vec<ConversationScript> = combinations(&slots, expansion.associate_indexes)
        .into_iter()
        .map(|combo| {
            let mut generated = convo.clone();
            let mut name = convo.header.name.clone();
            for (slot, &index) in slots.iter().zip(&combo) {
                generated.steps[slot.step_index].message_text =
                    Some(slot.utterance.utterances[index].clone());
                name.push_str(&format!("/{}-L{}", slot.utterance.name, index + 1));
            }
            generated.header.name = name;
            generated
        })
        .collect();

    tracing::debug!(
        convo = %convo.header.name,
        generated = expanded.len(),
        "Expanded utterances"
    );
    expanded
}

fn collect_value_variables<'a>(value: &'a Value, names: &mut BTreeSet<&'a str>) {
    match value {
        Value::String(s) => names.extend(variable_names(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_value_variables(v, names)),
        Value::Object(map) => map.values().for_each(|v| collect_value_variables(v, names)),
        _ => {}
    }
}

/// Variables referenced anywhere in a conversation
fn referenced_variables(convo: &ConversationScript) -> BTreeSet<&str> {
    let mut names = BTreeSet::new();
    for step in &convo.steps {
        if let Some(text) = &step.message_text {
            names.extend(variable_names(text));
        }
        if let Some(data) = &step.source_data {
            collect_value_variables(data, &mut names);
        }
        for reference in step
            .asserters
            .iter()
            .chain(&step.logic_hooks)
            .chain(&step.user_inputs)
        {
            for arg in &reference.args {
                names.extend(variable_names(arg));
            }
        }
    }
    names
}

/// Expand a conversation into one copy per memory set it references,
/// seeding the values through `SET_SCRIPTING_MEMORY` begin hooks.
pub(super) fn expand_scripting_memories(
    convo: &ConversationScript,
    sets: &[ScriptingMemorySet],
) -> Vec<ConversationScript> {
    let referenced = referenced_variables(convo);
    let matching: Vec<&ScriptingMemorySet> = sets
        .iter()
        .filter(|set| {
            set.values
                .keys()
                .any(|name| referenced.contains(name.as_str()))
        })
        .collect();

    if matching.is_empty() {
        return vec![convo.clone()];
    }

    matching
        .into_iter()
        .map(|set| {
            let mut generated = convo.clone();
            generated.header.name = format!("{}.{}", convo.header.name, set.name);

            let hooks = set
                .values
                .iter()
                .map(|(name, value)| {
                    ExtensionRef::new("SET_SCRIPTING_MEMORY", [name.clone(), value.clone()])
                });
            if generated.steps.first().is_none_or(|s| s.sender != Sender::Begin) {
                // Authored steps keep the positional tags they would get unexpanded
                for (index, step) in generated.steps.iter_mut().enumerate() {
                    if step.step_tag.is_empty() {
                        step.step_tag = format!("#{}", index + 1);
                    }
                }
                generated
                    .steps
                    .insert(0, ConversationStep::new(Sender::Begin).with_tag("#0"));
            }
            generated.steps[0].logic_hooks.extend(hooks);
            generated
        })
        .collect()
}
