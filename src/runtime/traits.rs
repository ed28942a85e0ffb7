//! Trait abstraction for the bot connection
//!
//! The runner never talks to a bot directly. Connectors implement
//! [`Transport`]; tests use the mocks in `runtime::testing`.

use crate::convo::{BotMessage, ConvoEvent, UserMessage};
use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Connection to the bot under test
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a user message to the bot
    async fn user_says(&self, msg: &UserMessage) -> Result<(), TransportError>;

    /// Wait for the next bot message, optionally on a specific channel.
    ///
    /// Implementations must give up with a `Timeout` error once `timeout`
    /// has elapsed.
    async fn wait_bot_says(
        &self,
        channel: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<BotMessage, TransportError>;

    /// Publish a run notification
    fn emit(&self, event: ConvoEvent);
}

// ============================================================================
// Arc implementation for trait objects
// ============================================================================

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn user_says(&self, msg: &UserMessage) -> Result<(), TransportError> {
        (**self).user_says(msg).await
    }

    async fn wait_bot_says(
        &self,
        channel: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<BotMessage, TransportError> {
        (**self).wait_bot_says(channel, timeout).await
    }

    fn emit(&self, event: ConvoEvent) {
        (**self).emit(event);
    }
}
