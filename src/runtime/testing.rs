//! Mock implementations for testing
//!
//! These mocks enable running conversations without a real bot.

use super::traits::Transport;
use crate::convo::{BotMessage, ConvoEvent, Transcript, UserMessage};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

// ============================================================================
// Mock Transport
// ============================================================================

/// How the mock produces bot replies
enum ReplyMode {
    /// Only queued replies are returned
    Scripted,
    /// Every user message queues a reply: the configured answer, or the text itself
    Echo(HashMap<String, String>),
}

/// In-memory transport recording everything the runner sends
pub struct MockTransport {
    mode: ReplyMode,
    replies: Mutex<VecDeque<Result<BotMessage, TransportError>>>,
    send_error: Option<TransportError>,
    /// Messages delivered through `user_says`
    pub sent: Mutex<Vec<UserMessage>>,
    /// Channel and timeout of every `wait_bot_says` call
    pub waits: Mutex<Vec<(Option<String>, Option<Duration>)>>,
    events: broadcast::Sender<ConvoEvent>,
}

#[allow(dead_code)]
impl MockTransport {
    /// Transport answering only with queued replies
    pub fn scripted() -> Self {
        Self::with_mode(ReplyMode::Scripted)
    }

    /// Transport echoing user text back
    pub fn echo() -> Self {
        Self::with_mode(ReplyMode::Echo(HashMap::new()))
    }

    fn with_mode(mode: ReplyMode) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            mode,
            replies: Mutex::new(VecDeque::new()),
            send_error: None,
            sent: Mutex::new(Vec::new()),
            waits: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Answer `question` with `reply` instead of echoing it (echo mode only)
    pub fn answer(mut self, question: impl Into<String>, reply: impl Into<String>) -> Self {
        if let ReplyMode::Echo(answers) = &mut self.mode {
            answers.insert(question.into(), reply.into());
        }
        self
    }

    /// Make every `user_says` fail
    pub fn failing(mut self, error: TransportError) -> Self {
        self.send_error = Some(error);
        self
    }

    pub fn queue_reply(&self, reply: BotMessage) {
        self.replies.lock().unwrap().push_back(Ok(reply));
    }

    pub fn queue_error(&self, error: TransportError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConvoEvent> {
        self.events.subscribe()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.message_text.clone().unwrap_or_default())
            .collect()
    }

    /// Number of transport calls of either kind
    pub fn call_count(&self) -> usize {
        self.sent.lock().unwrap().len() + self.waits.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn user_says(&self, msg: &UserMessage) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(msg.clone());
        if let Some(error) = &self.send_error {
            return Err(error.clone());
        }
        if let ReplyMode::Echo(answers) = &self.mode {
            let text = msg.message_text.clone().unwrap_or_default();
            let reply = answers.get(&text).cloned().unwrap_or(text);
            self.replies
                .lock()
                .unwrap()
                .push_back(Ok(BotMessage::text(reply)));
        }
        Ok(())
    }

    async fn wait_bot_says(
        &self,
        channel: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<BotMessage, TransportError> {
        self.waits
            .lock()
            .unwrap()
            .push((channel.map(str::to_string), timeout));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::timeout("no bot reply queued")))
    }

    fn emit(&self, event: ConvoEvent) {
        let _ = self.events.send(event);
    }
}

/// Next published transcript, if one arrives within a short grace period
pub async fn next_transcript(rx: &mut broadcast::Receiver<ConvoEvent>) -> Option<Transcript> {
    match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
        Ok(Ok(ConvoEvent::TranscriptReady(transcript))) => Some(*transcript),
        _ => None,
    }
}

/// Route `tracing` output through the test harness, honoring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
