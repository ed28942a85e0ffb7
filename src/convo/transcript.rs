//! Structured record of a conversation run

use super::{BotMessage, ConversationStep, Sender, UserMessage};
use crate::error::ConvoError;
use crate::memory::ScriptingMemory;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// What actually went over the transport for a step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActualMessage {
    Me(UserMessage),
    Bot(BotMessage),
}

/// One executed step
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptStep {
    pub step_tag: String,
    pub sender: Sender,
    /// The step as executed, after variable substitution
    pub expected: ConversationStep,
    /// `None` only when the step failed before reaching the transport
    pub actual: Option<ActualMessage>,
    pub not: bool,
    pub step_begin: DateTime<Utc>,
    pub step_end: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_wait_begin: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_wait_end: Option<DateTime<Utc>>,
    pub error: Option<ConvoError>,
}

impl TranscriptStep {
    pub(crate) fn begin(step: &ConversationStep) -> Self {
        let now = Utc::now();
        Self {
            step_tag: step.step_tag.clone(),
            sender: step.sender,
            expected: step.clone(),
            actual: None,
            not: step.not,
            step_begin: now,
            step_end: now,
            bot_wait_begin: None,
            bot_wait_end: None,
            error: None,
        }
    }

    pub fn bot_message(&self) -> Option<&BotMessage> {
        match &self.actual {
            Some(ActualMessage::Bot(msg)) => Some(msg),
            _ => None,
        }
    }

    pub fn user_message(&self) -> Option<&UserMessage> {
        match &self.actual {
            Some(ActualMessage::Me(msg)) => Some(msg),
            _ => None,
        }
    }
}

/// Record of a completed or aborted run
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub convo_name: String,
    pub steps: Vec<TranscriptStep>,
    pub scripting_memory: ScriptingMemory,
    pub convo_begin: DateTime<Utc>,
    pub convo_end: DateTime<Utc>,
    pub error: Option<ConvoError>,
}

impl Transcript {
    pub(crate) fn begin(convo_name: &str) -> Self {
        let now = Utc::now();
        Self {
            convo_name: convo_name.to_string(),
            steps: Vec::new(),
            scripting_memory: ScriptingMemory::default(),
            convo_begin: now,
            convo_end: now,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Last step that recorded an error
    pub fn failed_step(&self) -> Option<&TranscriptStep> {
        self.steps.iter().rev().find(|s| s.error.is_some())
    }

    pub fn duration(&self) -> chrono::Duration {
        self.convo_end - self.convo_begin
    }
}

/// Notification published on the transport's event channel
#[derive(Debug, Clone)]
pub enum ConvoEvent {
    /// Emitted once per run, on success and on failure
    TranscriptReady(Box<Transcript>),
}
