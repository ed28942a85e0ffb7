//! Conversation execution
//!
//! A [`ConversationRunner`] replays one [`ConversationScript`] against a
//! [`Transport`] step by step and produces a [`Transcript`]. Runners hold only
//! shared read-only state, so any number of conversations can run at once.
//!
//! [`ConversationScript`]: crate::convo::ConversationScript
//! [`Transcript`]: crate::convo::Transcript

mod compare;
mod executor;
mod includes;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationRunner;
pub use traits::Transport;
