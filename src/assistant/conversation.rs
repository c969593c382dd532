//! Conversation state: the ordered message log shown in the chat window.

use crate::core::ids::MessageId;

use super::command::strip_partial_command;
use super::render::{render_markdown, render_user_text};
use super::types::{
    ConversationMessage, HistoryEntry, MessageStatus, MessageUpdate, Sender,
};

/// Greeting every new conversation starts with.
pub const INTRO_TEXT: &str = "Good day, Sir. J.A.R.V.I.S. online and ready. All systems are nominal. How may I be of assistance?";

/// Ordered log of conversation messages, oldest first.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// New conversation holding only the greeting.
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: vec![intro_message()],
        }
    }

    /// Restore a persisted conversation.
    ///
    /// An empty log gets the greeting; messages left mid-stream by a previous
    /// process are marked cancelled.
    #[must_use]
    pub fn from_messages(mut messages: Vec<ConversationMessage>) -> Self {
        if messages.is_empty() {
            return Self::new();
        }
        for message in &mut messages {
            if message.status == MessageStatus::Streaming {
                close_cancelled(message);
            }
        }
        Self { messages }
    }

    /// Messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Look up a message.
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Append a user message.
    pub fn push_user(&mut self, text: &str) -> MessageId {
        let message = ConversationMessage::complete(Sender::User, text, render_user_text(text));
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Append an empty assistant message that will receive stream updates.
    pub fn begin_assistant_turn(&mut self) -> MessageId {
        let message = ConversationMessage::pending_assistant();
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Apply a stream update to its message. Returns `false` if the message is
    /// unknown or already terminal.
    pub fn apply_update(&mut self, update: &MessageUpdate) -> bool {
        self.messages
            .iter_mut()
            .find(|m| m.id == update.message_id)
            .is_some_and(|m| m.apply_update(update))
    }

    /// Close a streaming message that will receive no more updates.
    pub fn cancel_message(&mut self, id: MessageId) -> bool {
        match self
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.status == MessageStatus::Streaming)
        {
            Some(message) => {
                close_cancelled(message);
                true
            }
            None => false,
        }
    }

    /// Whether an assistant message is still receiving updates.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.status == MessageStatus::Streaming)
    }

    /// History to send to the model: finished messages only.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .filter(|m| m.status == MessageStatus::Complete && !m.raw_text.trim().is_empty())
            .map(|m| HistoryEntry {
                sender: m.sender,
                text: m.raw_text.clone(),
            })
            .collect()
    }

    /// Drop everything and start over with the greeting.
    pub fn clear(&mut self) {
        self.messages = vec![intro_message()];
    }

    /// Consume the conversation into its messages.
    #[must_use]
    pub fn into_messages(self) -> Vec<ConversationMessage> {
        self.messages
    }
}

fn intro_message() -> ConversationMessage {
    ConversationMessage::complete(Sender::Assistant, INTRO_TEXT, render_markdown(INTRO_TEXT))
}

fn close_cancelled(message: &mut ConversationMessage) {
    message.rendered_html = render_markdown(strip_partial_command(&message.raw_text));
    message.status = MessageStatus::Cancelled;
}
