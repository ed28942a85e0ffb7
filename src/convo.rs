//! Conversation data model
//!
//! Scripts, steps, messages exchanged with the bot and the transcript a run
//! produces.

mod message;
mod model;
pub mod normalize;
mod transcript;

pub use message::{
    BotMessage, Button, Card, Entity, FormValue, Intent, Media, Nlp, UserMessage,
};
pub use model::{
    ConversationScript, ConversationStep, ConvoHeader, ExtensionRef, Sender, Utterance,
};
pub use normalize::normalize_text;
pub use transcript::{ActualMessage, ConvoEvent, Transcript, TranscriptStep};
