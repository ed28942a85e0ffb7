//! Closure-backed implementations of the extension traits

use super::{Asserter, HookContext, LogicHook, StepAssertContext, UserInput, UserInputContext};
use crate::error::ConvoError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Asserter backed by a plain function over the bot response
pub struct FnAsserter<F> {
    check: F,
}

impl<F> FnAsserter<F>
where
    F: Fn(&StepAssertContext<'_>) -> Result<(), ConvoError> + Send + Sync,
{
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F> Asserter for FnAsserter<F>
where
    F: Fn(&StepAssertContext<'_>) -> Result<(), ConvoError> + Send + Sync,
{
    async fn assert_convo_step(&self, ctx: &StepAssertContext<'_>) -> Result<(), ConvoError> {
        (self.check)(ctx)
    }
}

/// User input backed by a plain function over the outgoing message
pub struct FnUserInput<F> {
    set: F,
}

impl<F> FnUserInput<F>
where
    F: Fn(&mut UserInputContext<'_>) -> Result<(), ConvoError> + Send + Sync,
{
    pub fn new(set: F) -> Self {
        Self { set }
    }
}

#[async_trait]
impl<F> UserInput for FnUserInput<F>
where
    F: Fn(&mut UserInputContext<'_>) -> Result<(), ConvoError> + Send + Sync,
{
    async fn set_user_input(&self, ctx: &mut UserInputContext<'_>) -> Result<(), ConvoError> {
        (self.set)(ctx)
    }
}

/// Lifecycle callback a logic hook can react to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    ConvoBegin,
    MeStart,
    MeEnd,
    BotStart,
    BotEnd,
    ConvoEnd,
}

type HookFn = Arc<dyn Fn(&mut HookContext<'_>) -> Result<(), ConvoError> + Send + Sync>;

/// Logic hook assembled from per-event closures.
///
/// Events without a handler are no-ops.
#[derive(Clone, Default)]
pub struct EventHooks {
    handlers: HashMap<HookEvent, HookFn>,
    best_effort: bool,
}

impl EventHooks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on<F>(mut self, event: HookEvent, handler: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), ConvoError> + Send + Sync + 'static,
    {
        self.handlers.insert(event, Arc::new(handler));
        self
    }

    /// Log failures instead of failing the run
    #[must_use]
    pub fn with_best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    fn dispatch(&self, event: HookEvent, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        match self.handlers.get(&event) {
            Some(handler) => handler(ctx),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for EventHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHooks")
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .field("best_effort", &self.best_effort)
            .finish()
    }
}

#[async_trait]
impl LogicHook for EventHooks {
    async fn on_convo_begin(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        self.dispatch(HookEvent::ConvoBegin, ctx)
    }

    async fn on_me_start(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        self.dispatch(HookEvent::MeStart, ctx)
    }

    async fn on_me_end(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        self.dispatch(HookEvent::MeEnd, ctx)
    }

    async fn on_bot_start(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        self.dispatch(HookEvent::BotStart, ctx)
    }

    async fn on_bot_end(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        self.dispatch(HookEvent::BotEnd, ctx)
    }

    async fn on_convo_end(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        self.dispatch(HookEvent::ConvoEnd, ctx)
    }

    fn best_effort(&self) -> bool {
        self.best_effort
    }
}
