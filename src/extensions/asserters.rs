//! Built-in asserters
//!
//! Every built-in honors negation. List asserters (`BUTTONS`, `MEDIA`,
//! `CARDS`, `ENTITIES`, `ENTITY_VALUES`) require all listed items when
//! positive and none of them when negated; without arguments they require
//! at least one item, or none when negated. All other built-ins fail when
//! their predicate result equals the negation flag.

use super::{required_arg, Asserter, StepAssertContext};
use crate::convo::{BotMessage, Button, Media};
use crate::error::{AssertionError, ConvoError, ScriptError};
use crate::memory::path;
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

pub(super) fn builtins() -> Vec<(&'static str, Arc<dyn Asserter>)> {
    vec![
        entry("BUTTONS", ListAsserter::new("BUTTONS", "button", button_texts)),
        entry("MEDIA", ListAsserter::new("MEDIA", "media", media_uris)),
        entry("CARDS", ListAsserter::new("CARDS", "card", card_texts)),
        entry("ENTITIES", ListAsserter::new("ENTITIES", "entity", entity_names)),
        entry(
            "ENTITY_VALUES",
            ListAsserter::new("ENTITY_VALUES", "entity value", entity_values),
        ),
        entry(
            "BUTTONS_COUNT",
            CountAsserter::new("BUTTONS_COUNT", "button", |m| all_buttons(m).count()),
        ),
        entry(
            "MEDIA_COUNT",
            CountAsserter::new("MEDIA_COUNT", "media", |m| all_media(m).count()),
        ),
        entry(
            "CARDS_COUNT",
            CountAsserter::new("CARDS_COUNT", "card", |m| m.cards.len()),
        ),
        entry("INTENT", IntentAsserter),
        entry("INTENT_CONFIDENCE", IntentConfidenceAsserter),
        entry("TEXT_CONTAINS_ANY", TextContainsAsserter { all: false }),
        entry("TEXT_CONTAINS_ALL", TextContainsAsserter { all: true }),
        entry("TEXT_REGEXP_ANY", TextRegexpAnyAsserter),
        entry("JSON_PATH", JsonPathAsserter),
        entry("RESPONSE_LENGTH", ResponseLengthAsserter),
    ]
}

fn entry(name: &'static str, imp: impl Asserter + 'static) -> (&'static str, Arc<dyn Asserter>) {
    (name, Arc::new(imp))
}

/// Fail unless `holds` differs from the negation flag
fn verdict(
    ctx: &StepAssertContext<'_>,
    name: &str,
    holds: bool,
    describe: impl FnOnce() -> String,
) -> Result<(), ConvoError> {
    if holds != ctx.not {
        return Ok(());
    }
    let message = if ctx.not {
        format!("{name}: expected not {}", describe())
    } else {
        format!("{name}: expected {}", describe())
    };
    Err(AssertionError::failed(ctx.step_tag, message)
        .from_source(name)
        .into())
}

fn all_buttons(msg: &BotMessage) -> impl Iterator<Item = &Button> {
    msg.buttons
        .iter()
        .chain(msg.cards.iter().flat_map(|c| c.buttons.iter()))
}

fn all_media(msg: &BotMessage) -> impl Iterator<Item = &Media> {
    msg.media.iter().chain(
        msg.cards
            .iter()
            .flat_map(|c| c.image.iter().chain(c.media.iter())),
    )
}

fn button_texts(msg: &BotMessage) -> Vec<String> {
    all_buttons(msg)
        .flat_map(|b| b.text.clone().into_iter().chain(b.payload_text()))
        .collect()
}

fn media_uris(msg: &BotMessage) -> Vec<String> {
    all_media(msg).map(|m| m.media_uri.clone()).collect()
}

fn card_texts(msg: &BotMessage) -> Vec<String> {
    msg.cards
        .iter()
        .flat_map(|c| c.texts().map(str::to_string))
        .collect()
}

fn entity_names(msg: &BotMessage) -> Vec<String> {
    msg.nlp
        .iter()
        .flat_map(|n| n.entities.iter().map(|e| e.name.clone()))
        .collect()
}

fn entity_values(msg: &BotMessage) -> Vec<String> {
    msg.nlp
        .iter()
        .flat_map(|n| n.entities.iter().map(|e| e.value.clone()))
        .collect()
}

/// Expected items looked up in a list extracted from the response
struct ListAsserter {
    name: &'static str,
    what: &'static str,
    collect: fn(&BotMessage) -> Vec<String>,
}

impl ListAsserter {
    fn new(name: &'static str, what: &'static str, collect: fn(&BotMessage) -> Vec<String>) -> Self {
        Self {
            name,
            what,
            collect,
        }
    }
}

#[async_trait]
impl Asserter for ListAsserter {
    async fn assert_convo_step(&self, ctx: &StepAssertContext<'_>) -> Result<(), ConvoError> {
        let found = (self.collect)(ctx.bot_msg);

        if ctx.args.is_empty() {
            return verdict(ctx, self.name, !found.is_empty(), || {
                format!("at least one {}", self.what)
            });
        }

        let mut present = Vec::new();
        let mut missing = Vec::new();
        for expected in ctx.args {
            let mut hit = false;
            for candidate in &found {
                if ctx.matcher.matches(candidate, expected)? {
                    hit = true;
                    break;
                }
            }
            if hit {
                present.push(expected.as_str());
            } else {
                missing.push(expected.as_str());
            }
        }

        let (failed, message) = if ctx.not {
            (
                !present.is_empty(),
                format!("{}: not expected {}(s) found: {}", self.name, self.what, present.join(", ")),
            )
        } else {
            (
                !missing.is_empty(),
                format!(
                    "{}: expected {}(s) not found: {} (got: {})",
                    self.name,
                    self.what,
                    missing.join(", "),
                    found.join(", ")
                ),
            )
        };
        if failed {
            return Err(AssertionError::failed(ctx.step_tag, message)
                .from_source(self.name)
                .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Count condition such as `3`, `>=2` or `<10`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountSpec {
    cmp: Comparison,
    value: usize,
}

impl CountSpec {
    /// Parse a condition; a bare number means `bare`
    fn parse(name: &str, raw: &str, bare: Comparison) -> Result<Self, ScriptError> {
        let raw = raw.trim();
        let (cmp, number) = [
            (">=", Comparison::Ge),
            ("<=", Comparison::Le),
            (">", Comparison::Gt),
            ("<", Comparison::Lt),
            ("=", Comparison::Eq),
        ]
        .into_iter()
        .find_map(|(prefix, cmp)| raw.strip_prefix(prefix).map(|rest| (cmp, rest)))
        .unwrap_or((bare, raw));

        let value = number.trim().parse().map_err(|_| {
            ScriptError::bad_args(name, format!("invalid count \"{raw}\", expected N, =N, >N, >=N, <N or <=N"))
        })?;
        Ok(Self { cmp, value })
    }

    pub fn check(self, actual: usize) -> bool {
        match self.cmp {
            Comparison::Eq => actual == self.value,
            Comparison::Gt => actual > self.value,
            Comparison::Ge => actual >= self.value,
            Comparison::Lt => actual < self.value,
            Comparison::Le => actual <= self.value,
        }
    }
}

impl fmt::Display for CountSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.cmp {
            Comparison::Eq => "=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
        };
        write!(f, "{op}{}", self.value)
    }
}

struct CountAsserter {
    name: &'static str,
    what: &'static str,
    count: fn(&BotMessage) -> usize,
}

impl CountAsserter {
    fn new(name: &'static str, what: &'static str, count: fn(&BotMessage) -> usize) -> Self {
        Self { name, what, count }
    }
}

#[async_trait]
impl Asserter for CountAsserter {
    async fn assert_convo_step(&self, ctx: &StepAssertContext<'_>) -> Result<(), ConvoError> {
        let spec = match ctx.args.first() {
            Some(raw) => CountSpec::parse(self.name, raw, Comparison::Eq)?,
            None => CountSpec {
                cmp: Comparison::Gt,
                value: 0,
            },
        };
        let actual = (self.count)(ctx.bot_msg);
        verdict(ctx, self.name, spec.check(actual), || {
            format!("{} count {spec}, got {actual}", self.what)
        })
    }
}

struct IntentAsserter;

#[async_trait]
impl Asserter for IntentAsserter {
    async fn assert_convo_step(&self, ctx: &StepAssertContext<'_>) -> Result<(), ConvoError> {
        let expected = required_arg("INTENT", ctx.args, 0)?;
        let actual = ctx
            .bot_msg
            .nlp
            .as_ref()
            .and_then(|n| n.intent.as_ref())
            .map(|i| i.name.as_str());
        let holds = match actual {
            Some(name) => ctx.matcher.matches(name, expected)?,
            None => false,
        };
        verdict(ctx, "INTENT", holds, || {
            format!("intent \"{expected}\", got \"{}\"", actual.unwrap_or("<none>"))
        })
    }
}

struct IntentConfidenceAsserter;

#[async_trait]
impl Asserter for IntentConfidenceAsserter {
    async fn assert_convo_step(&self, ctx: &StepAssertContext<'_>) -> Result<(), ConvoError> {
        let raw = required_arg("INTENT_CONFIDENCE", ctx.args, 0)?;
        let min: f64 = raw.trim().trim_end_matches('%').parse().map_err(|_| {
            ScriptError::bad_args("INTENT_CONFIDENCE", format!("invalid percentage \"{raw}\""))
        })?;
        let confidence = ctx
            .bot_msg
            .nlp
            .as_ref()
            .and_then(|n| n.intent.as_ref())
            .and_then(|i| i.confidence)
            .map(|c| c * 100.0);
        let holds = confidence.is_some_and(|c| c >= min);
        verdict(ctx, "INTENT_CONFIDENCE", holds, || match confidence {
            Some(c) => format!("intent confidence >= {min}%, got {c:.1}%"),
            None => format!("intent confidence >= {min}%, got none"),
        })
    }
}

struct TextContainsAsserter {
    all: bool,
}

#[async_trait]
impl Asserter for TextContainsAsserter {
    async fn assert_convo_step(&self, ctx: &StepAssertContext<'_>) -> Result<(), ConvoError> {
        let name = if self.all {
            "TEXT_CONTAINS_ALL"
        } else {
            "TEXT_CONTAINS_ANY"
        };
        required_arg(name, ctx.args, 0)?;
        let text = ctx.bot_msg.message_text.as_deref().unwrap_or_default();
        let holds = if self.all {
            ctx.args.iter().all(|a| text.contains(a.as_str()))
        } else {
            ctx.args.iter().any(|a| text.contains(a.as_str()))
        };
        verdict(ctx, name, holds, || {
            let quantifier = if self.all { "all of" } else { "any of" };
            format!("text to contain {quantifier} [{}], got \"{text}\"", ctx.args.join(", "))
        })
    }
}

struct TextRegexpAnyAsserter;

#[async_trait]
impl Asserter for TextRegexpAnyAsserter {
    async fn assert_convo_step(&self, ctx: &StepAssertContext<'_>) -> Result<(), ConvoError> {
        required_arg("TEXT_REGEXP_ANY", ctx.args, 0)?;
        let text = ctx.bot_msg.message_text.as_deref().unwrap_or_default();
        let mut holds = false;
        for pattern in ctx.args {
            let re = Regex::new(pattern).map_err(|e| ScriptError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            if re.is_match(text) {
                holds = true;
                break;
            }
        }
        verdict(ctx, "TEXT_REGEXP_ANY", holds, || {
            format!("text to match any of [{}], got \"{text}\"", ctx.args.join(", "))
        })
    }
}

/// Looks a path up in the response payload, optionally comparing the value.
///
/// Falls back to the whole response when the bot sent no payload.
struct JsonPathAsserter;

#[async_trait]
impl Asserter for JsonPathAsserter {
    async fn assert_convo_step(&self, ctx: &StepAssertContext<'_>) -> Result<(), ConvoError> {
        let json_path = required_arg("JSON_PATH", ctx.args, 0)?;
        let expected = ctx.args.get(1);

        let whole;
        let root = match &ctx.bot_msg.source_data {
            Some(data) => data,
            None => {
                whole = serde_json::to_value(ctx.bot_msg).unwrap_or_default();
                &whole
            }
        };
        let actual = path::lookup(root, json_path).map(path::value_text);

        let holds = match (&actual, expected) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => ctx.matcher.matches(actual, expected)?,
        };
        verdict(ctx, "JSON_PATH", holds, || match (expected, &actual) {
            (Some(e), Some(a)) => format!("\"{json_path}\" to be \"{e}\", got \"{a}\""),
            (Some(e), None) => format!("\"{json_path}\" to be \"{e}\", path not found"),
            (None, _) => format!("\"{json_path}\" to exist"),
        })
    }
}

/// Limits the response text length; a bare number is a maximum
struct ResponseLengthAsserter;

#[async_trait]
impl Asserter for ResponseLengthAsserter {
    async fn assert_convo_step(&self, ctx: &StepAssertContext<'_>) -> Result<(), ConvoError> {
        let raw = required_arg("RESPONSE_LENGTH", ctx.args, 0)?;
        let spec = CountSpec::parse("RESPONSE_LENGTH", raw, Comparison::Le)?;
        let length = ctx
            .bot_msg
            .message_text
            .as_deref()
            .map_or(0, |t| t.chars().count());
        verdict(ctx, "RESPONSE_LENGTH", spec.check(length), || {
            format!("response length {spec}, got {length}")
        })
    }
}
