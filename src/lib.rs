//! Convo Replay - scripted conversation testing for chat bots
//!
//! Declarative multi-turn conversations are replayed against an injected
//! [`Transport`], bot responses are checked against expectations, runtime
//! values are captured into a per-run scripting memory and re-injected into
//! later steps, and every run produces a [`Transcript`].

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

pub mod caps;
pub mod convo;
pub mod error;
pub mod extensions;
pub mod memory;
pub mod runtime;
pub mod scripting;

pub use caps::{Capabilities, MatchingMode, MemoryMatchingMode, UtteranceExpansionMode};
pub use convo::{
    BotMessage, ConversationScript, ConversationStep, ConvoEvent, ConvoHeader, ExtensionRef,
    Sender, Transcript, TranscriptStep, UserMessage, Utterance,
};
pub use error::{
    AssertionError, ConvoError, ConvoFailure, ScriptError, SecurityError, TransportError,
    TransportErrorKind,
};
pub use extensions::{Asserter, ExtensionRegistry, LogicHook, UserInput};
pub use memory::{ScriptingMemory, VariableMemory};
pub use runtime::{ConversationRunner, Transport};
pub use scripting::{Matcher, ScriptingRegistry};
