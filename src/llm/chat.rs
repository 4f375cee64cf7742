//! Chat model seam and conversation history.

use crate::error::{Result, VoxError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// System prompt plus the last `exchanges` user/assistant pairs.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    system: Option<ChatMessage>,
    messages: VecDeque<ChatMessage>,
    exchanges: usize,
}

impl ChatHistory {
    pub fn new(system_prompt: Option<&str>, exchanges: usize) -> Self {
        Self {
            system: system_prompt
                .filter(|prompt| !prompt.is_empty())
                .map(ChatMessage::system),
            messages: VecDeque::new(),
            exchanges,
        }
    }

    /// Records a finished exchange, evicting the oldest one beyond capacity.
    pub fn record(&mut self, user: ChatMessage, assistant: ChatMessage) {
        self.messages.push_back(user);
        self.messages.push_back(assistant);
        while self.messages.len() > self.exchanges * 2 {
            self.messages.drain(..2);
        }
    }

    /// Messages to send: system prompt, history, then `extra`.
    pub fn prompt(&self, extra: &[ChatMessage]) -> Vec<ChatMessage> {
        self.system
            .iter()
            .chain(self.messages.iter())
            .chain(extra.iter())
            .cloned()
            .collect()
    }

    /// Number of stored messages, system prompt excluded.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Streamed reply text.
pub type TextDeltas<'a> = Box<dyn Iterator<Item = Result<String>> + Send + 'a>;

/// Trait for chat completion models.
pub trait ChatModel: Send + Sync {
    /// Starts generating a reply to `messages`, yielding text as it arrives.
    fn stream_reply(&self, messages: &[ChatMessage]) -> Result<TextDeltas<'_>>;

    fn model_name(&self) -> &str;
}

impl<T: ChatModel + ?Sized> ChatModel for Arc<T> {
    fn stream_reply(&self, messages: &[ChatMessage]) -> Result<TextDeltas<'_>> {
        (**self).stream_reply(messages)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Mock chat model for testing.
///
/// Replies with a fixed text split into word-sized deltas and records every
/// prompt it receives.
#[derive(Debug, Default)]
pub struct MockChatModel {
    reply: String,
    delta_latency: Duration,
    fail_after: Option<usize>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockChatModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            ..Self::default()
        }
    }

    /// Sleeps before every delta.
    pub fn with_delta_latency(mut self, latency: Duration) -> Self {
        self.delta_latency = latency;
        self
    }

    /// Fails after yielding `deltas` deltas.
    pub fn with_failure_after(mut self, deltas: usize) -> Self {
        self.fail_after = Some(deltas);
        self
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn deltas(&self) -> Vec<String> {
        self.reply
            .split_inclusive(' ')
            .map(str::to_string)
            .collect()
    }
}

impl ChatModel for MockChatModel {
    fn stream_reply(&self, messages: &[ChatMessage]) -> Result<TextDeltas<'_>> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());

        let mut items: Vec<Result<String>> = self.deltas().into_iter().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(VoxError::LanguageModel {
                message: "mock generation failure".to_string(),
            }));
        }
        let latency = self.delta_latency;
        Ok(Box::new(items.into_iter().inspect(move |_| {
            if !latency.is_zero() {
                std::thread::sleep(latency);
            }
        })))
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}
