//! Messages exchanged with the bot

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Button offered by the bot or pressed by the user
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Button {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
}

impl Button {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Payload rendered as text, strings unquoted
    pub fn payload_text(&self) -> Option<String> {
        self.payload.as_ref().map(|p| match p {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Media attachment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub media_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

impl Media {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            media_uri: uri.into(),
            ..Self::default()
        }
    }
}

/// Rich card
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Media>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
}

impl Card {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// All texts shown on the card
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        [&self.text, &self.subtext, &self.content]
            .into_iter()
            .filter_map(|t| t.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// NLP annotation reported by the bot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nlp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,
}

impl Nlp {
    pub fn is_empty(&self) -> bool {
        self.intent.is_none() && self.entities.is_empty()
    }
}

/// Form field filled in by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormValue {
    pub name: String,
    pub value: String,
}

/// Message sent to the bot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<FormValue>,
}

impl UserMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message_text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Message received from the bot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cards: Vec<Card>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlp: Option<Nlp>,
}

impl BotMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message_text: Some(text.into()),
            ..Self::default()
        }
    }

    /// True when the bot sent no text, media, buttons, cards, payload or NLP
    pub fn is_empty(&self) -> bool {
        self.message_text.as_deref().is_none_or(str::is_empty)
            && self.media.is_empty()
            && self.buttons.is_empty()
            && self.cards.is_empty()
            && self.source_data.as_ref().is_none_or(Value::is_null)
            && self.nlp.as_ref().is_none_or(Nlp::is_empty)
    }
}
