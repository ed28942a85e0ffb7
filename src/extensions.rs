//! Pluggable asserters, logic hooks and user inputs
//!
//! Three catalogues share one resolution contract (see [`registry`]). The
//! runner invokes entries referenced by a step plus every entry flagged
//! global. Logic hooks additionally observe the whole run through a fixed
//! set of lifecycle callbacks.

mod adapters;
pub mod asserters;
pub mod logic_hooks;
mod registry;
pub mod user_inputs;

pub use adapters::{EventHooks, FnAsserter, FnUserInput, HookEvent};
pub use registry::{Entry, ExtensionRegistry, ExtensionSource, ExtensionSpec, PluginTable};

use crate::caps::Capabilities;
use crate::convo::{BotMessage, ConversationStep, Transcript, UserMessage};
use crate::error::{ConvoError, ScriptError};
use crate::memory::ScriptingMemory;
use crate::scripting::Matcher;
use async_trait::async_trait;

/// Context for begin- and end-scoped assertions
pub struct ConvoAssertContext<'a> {
    pub convo_name: &'a str,
    pub args: &'a [String],
    pub not: bool,
    pub memory: &'a ScriptingMemory,
    pub caps: &'a Capabilities,
    /// Transcript so far; complete when asserting at the end
    pub transcript: &'a Transcript,
}

/// Context for an assertion against one bot response
pub struct StepAssertContext<'a> {
    pub convo_name: &'a str,
    pub step_tag: &'a str,
    /// Arguments after variable substitution
    pub args: &'a [String],
    /// Negated reference (`not` flag or `NOT_` prefix)
    pub not: bool,
    pub bot_msg: &'a BotMessage,
    pub memory: &'a ScriptingMemory,
    pub caps: &'a Capabilities,
    pub matcher: &'a Matcher,
}

/// A check run against a bot's response
#[async_trait]
pub trait Asserter: Send + Sync {
    async fn assert_convo_begin(&self, _ctx: &ConvoAssertContext<'_>) -> Result<(), ConvoError> {
        Ok(())
    }

    async fn assert_convo_step(&self, _ctx: &StepAssertContext<'_>) -> Result<(), ConvoError> {
        Ok(())
    }

    async fn assert_convo_end(&self, _ctx: &ConvoAssertContext<'_>) -> Result<(), ConvoError> {
        Ok(())
    }
}

/// Everything a lifecycle callback may read or change
pub struct HookContext<'a> {
    pub convo_name: &'a str,
    /// Step being executed; `None` at convo begin and end
    pub step: Option<&'a ConversationStep>,
    pub args: &'a [String],
    pub memory: &'a mut ScriptingMemory,
    pub caps: &'a Capabilities,
    /// Outgoing message, present in `on_me_start` and `on_me_end`
    pub user_msg: Option<&'a mut UserMessage>,
    /// Bot response, present in `on_bot_end`
    pub bot_msg: Option<&'a BotMessage>,
}

impl HookContext<'_> {
    pub fn step_tag(&self) -> &str {
        self.step.map_or("", |s| s.step_tag.as_str())
    }
}

/// Lifecycle observer and mutator.
///
/// Every callback defaults to a no-op. The runner calls the callbacks of
/// global hooks for every step and the callbacks of step-attached hooks for
/// the step they are attached to.
#[async_trait]
pub trait LogicHook: Send + Sync {
    async fn on_convo_begin(&self, _ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Ok(())
    }

    async fn on_me_start(&self, _ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Ok(())
    }

    async fn on_me_end(&self, _ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Ok(())
    }

    async fn on_bot_start(&self, _ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Ok(())
    }

    async fn on_bot_end(&self, _ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Ok(())
    }

    async fn on_convo_end(&self, _ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Ok(())
    }

    /// Failures of a best-effort hook are logged and swallowed
    fn best_effort(&self) -> bool {
        false
    }
}

/// Context for rewriting an outgoing message
pub struct UserInputContext<'a> {
    pub convo_name: &'a str,
    pub step_tag: &'a str,
    pub args: &'a [String],
    pub msg: &'a mut UserMessage,
    pub caps: &'a Capabilities,
}

/// Rewrites an outgoing `me` message, e.g. to press a button
#[async_trait]
pub trait UserInput: Send + Sync {
    async fn set_user_input(&self, ctx: &mut UserInputContext<'_>) -> Result<(), ConvoError>;
}

/// Argument at `index`, or `BadArgs` naming the extension
pub(crate) fn required_arg<'a>(
    name: &str,
    args: &'a [String],
    index: usize,
) -> Result<&'a str, ScriptError> {
    args.get(index).map(String::as_str).ok_or_else(|| {
        ScriptError::bad_args(
            name,
            format!("expected at least {} argument(s), got {}", index + 1, args.len()),
        )
    })
}
