//! Chat transcript accumulated from streaming events

use crate::events::AiEvent;
use crate::types::{ChatMessage, ChatRole};

/// Ordered chat history for one conversation
///
/// Tokens are appended to the newest assistant message while its turn is
/// open. A turn closes on the operation's terminal event.
#[derive(Debug, Clone, Default)]
pub struct ChatTranscript {
    messages: Vec<ChatMessage>,
    streaming: bool,
    operation: Option<u64>,
    last_error: Option<String>,
}

impl ChatTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> &ChatMessage {
        self.messages.push(ChatMessage::new(ChatRole::User, content));
        &self.messages[self.messages.len() - 1]
    }

    /// Open an assistant turn with an empty placeholder message
    pub fn begin_assistant(&mut self) {
        self.messages.push(ChatMessage::new(ChatRole::Assistant, ""));
        self.streaming = true;
        self.operation = None;
        self.last_error = None;
    }

    /// Only accept events from this operation for the open turn
    pub fn bind(&mut self, operation: u64) {
        self.operation = Some(operation);
    }

    /// Close the open turn and drop its placeholder if nothing arrived
    pub fn abandon_turn(&mut self) {
        if !self.streaming {
            return;
        }
        self.streaming = false;
        self.operation = None;
        if self
            .messages
            .last()
            .is_some_and(|m| m.role == ChatRole::Assistant && m.content.is_empty())
        {
            self.messages.pop();
        }
    }

    /// Apply an event; returns whether the transcript changed
    pub fn apply(&mut self, event: &AiEvent) -> bool {
        if !self.streaming {
            return false;
        }
        if self.operation.is_some_and(|op| op != event.operation()) {
            return false;
        }

        match event {
            AiEvent::Token { token, .. } => match self.messages.last_mut() {
                Some(message) if message.role == ChatRole::Assistant => {
                    message.content.push_str(token);
                    true
                }
                _ => false,
            },
            AiEvent::Complete { .. } => {
                self.streaming = false;
                self.operation = None;
                true
            }
            AiEvent::Error { message, .. } => {
                self.last_error = Some(message.clone());
                self.streaming = false;
                self.operation = None;
                true
            }
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Text of the assistant message currently being streamed
    pub fn streaming_text(&self) -> Option<&str> {
        if !self.streaming {
            return None;
        }
        self.messages
            .last()
            .filter(|m| m.role == ChatRole::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Message of the error that ended the last turn, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
