//! Conversation script types

use crate::error::ScriptError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Who speaks a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// Conversation-scoped hooks run before the first message
    Begin,
    Me,
    Bot,
    /// Conversation-scoped hooks run after the last message
    End,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::Begin => "begin",
            Sender::Me => "me",
            Sender::Bot => "bot",
            Sender::End => "end",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sender {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('#').to_ascii_lowercase().as_str() {
            "begin" => Ok(Sender::Begin),
            "me" => Ok(Sender::Me),
            "bot" => Ok(Sender::Bot),
            "end" => Ok(Sender::End),
            _ => Err(ScriptError::UnknownSender {
                step_tag: String::new(),
                sender: s.to_string(),
            }),
        }
    }
}

/// Reference to an asserter, logic hook or user input by name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtensionRef {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Negate an asserter
    #[serde(default)]
    pub not: bool,
}

impl ExtensionRef {
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
            not: false,
        }
    }

    pub fn negated<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            not: true,
            ..Self::new(name, args)
        }
    }

    /// Name with any `NOT_` prefix removed, plus the effective negation
    pub fn resolved_name(&self) -> (String, bool) {
        let upper = self.name.to_ascii_uppercase();
        match upper.strip_prefix("NOT_") {
            Some(rest) => (rest.to_string(), !self.not),
            None => (upper, self.not),
        }
    }
}

/// One turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStep {
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,
    /// Structured payload, expected (bot) or sent (me)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Negates the text assertion of a bot step
    #[serde(default)]
    pub not: bool,
    /// Human-readable locator, assigned `#<index>` when empty
    #[serde(default)]
    pub step_tag: String,
    #[serde(default)]
    pub asserters: Vec<ExtensionRef>,
    #[serde(default)]
    pub logic_hooks: Vec<ExtensionRef>,
    #[serde(default)]
    pub user_inputs: Vec<ExtensionRef>,
}

impl ConversationStep {
    pub fn new(sender: Sender) -> Self {
        Self {
            sender,
            message_text: None,
            source_data: None,
            channel: None,
            not: false,
            step_tag: String::new(),
            asserters: Vec::new(),
            logic_hooks: Vec::new(),
            user_inputs: Vec::new(),
        }
    }

    pub fn me(text: impl Into<String>) -> Self {
        Self::new(Sender::Me).with_text(text)
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(Sender::Bot).with_text(text)
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.message_text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_source_data(mut self, data: Value) -> Self {
        self.source_data = Some(data);
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.step_tag = tag.into();
        self
    }

    #[must_use]
    pub fn negated(mut self) -> Self {
        self.not = true;
        self
    }

    #[must_use]
    pub fn with_asserter(mut self, asserter: ExtensionRef) -> Self {
        self.asserters.push(asserter);
        self
    }

    #[must_use]
    pub fn with_logic_hook(mut self, hook: ExtensionRef) -> Self {
        self.logic_hooks.push(hook);
        self
    }

    #[must_use]
    pub fn with_user_input(mut self, input: ExtensionRef) -> Self {
        self.user_inputs.push(input);
        self
    }

    /// True when the step carries nothing to send, expect or invoke
    pub fn is_empty(&self) -> bool {
        self.message_text.is_none()
            && self.source_data.is_none()
            && self.asserters.is_empty()
            && self.logic_hooks.is_empty()
            && self.user_inputs.is_empty()
    }
}

/// Conversation header
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConvoHeader {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Parsed conversation. Runs work on a clone of the steps, never on these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationScript {
    pub header: ConvoHeader,
    pub steps: Vec<ConversationStep>,
}

impl ConversationScript {
    pub fn new(name: impl Into<String>, steps: Vec<ConversationStep>) -> Self {
        Self {
            header: ConvoHeader {
                name: name.into(),
                description: None,
            },
            steps,
        }
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }
}

/// Named group of interchangeable texts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub name: String,
    pub utterances: Vec<String>,
}

impl Utterance {
    pub fn new<I, S>(name: impl Into<String>, utterances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            utterances: utterances.into_iter().map(Into::into).collect(),
        }
    }
}
