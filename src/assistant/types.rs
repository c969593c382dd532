//! Conversation data model and the records exchanged with the model client
//! and the UI layer.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::core::errors::{JarvisError, JarvisResult};
use crate::core::ids::MessageId;

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The human at the console.
    User,
    /// The model.
    Assistant,
}

/// Grounding record as received in a response chunk. Either field may be
/// missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRecord {
    /// Source URI.
    pub uri: Option<String>,
    /// Source title.
    pub title: Option<String>,
}

impl CitationRecord {
    /// Build a record with both fields present.
    #[must_use]
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            title: Some(title.into()),
        }
    }
}

/// Deduplicated web source attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Source URI, unique within a message.
    pub uri: String,
    /// Source title, if the model supplied one.
    pub title: Option<String>,
}

/// Binary attachment forwarded to the model alongside the latest user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Standard base64 payload.
    pub base64_data: String,
}

impl Attachment {
    /// Check that the attachment can be forwarded as inline data.
    ///
    /// # Errors
    /// Returns [`JarvisError::InvalidAttachment`] for a blank MIME type or a
    /// payload that is not valid base64.
    pub fn validate(&self) -> JarvisResult<()> {
        if self.mime_type.trim().is_empty() || !self.mime_type.contains('/') {
            return Err(JarvisError::InvalidAttachment(format!(
                "unsupported mime type: {:?}",
                self.mime_type
            )));
        }
        STANDARD
            .decode(self.base64_data.as_bytes())
            .map_err(|e| JarvisError::InvalidAttachment(format!("bad base64 payload: {e}")))?;
        Ok(())
    }
}

/// One turn of history as sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Author of the turn.
    pub sender: Sender,
    /// Plain/markdown text of the turn.
    pub text: String,
}

/// One incremental unit of a streamed model response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseChunk {
    /// Text appended by this chunk; may be empty.
    pub text_delta: String,
    /// Grounding records attached to this chunk.
    pub citations: Option<Vec<CitationRecord>>,
}

impl ResponseChunk {
    /// Chunk carrying text only.
    #[must_use]
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            text_delta: delta.into(),
            citations: None,
        }
    }

    /// Attach grounding records.
    #[must_use]
    pub fn with_citations(mut self, citations: Vec<CitationRecord>) -> Self {
        self.citations = Some(citations);
        self
    }
}

/// Lifecycle state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Still receiving chunks.
    Streaming,
    /// Finalized after a successful stream, or a user message.
    Complete,
    /// Replaced by the apology after a stream error.
    Failed,
    /// Abandoned because the consumer went away.
    Cancelled,
}

impl MessageStatus {
    /// Terminal messages never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

/// Which kind of publish an update represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    /// Mid-stream render with cursor.
    Partial,
    /// Final render after the stream ended.
    Final,
    /// Apology after a stream error.
    Failed,
}

/// State of an in-progress assistant message, published to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUpdate {
    /// Message being updated.
    pub message_id: MessageId,
    /// Partial, final or failed.
    pub phase: UpdatePhase,
    /// Accumulated text (source of truth).
    pub raw_text: String,
    /// Sanitized HTML derived from the display text.
    pub rendered_html: String,
    /// Deduplicated citations, first-seen order.
    pub citations: Vec<Citation>,
}

/// A message of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Stable identifier.
    pub id: MessageId,
    /// Author.
    pub sender: Sender,
    /// Accumulated text (source of truth).
    pub raw_text: String,
    /// Sanitized HTML for display, always regenerable from `raw_text`.
    pub rendered_html: String,
    /// Deduplicated citations.
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Lifecycle state.
    pub status: MessageStatus,
}

impl ConversationMessage {
    /// Empty assistant message for a new turn.
    #[must_use]
    pub fn pending_assistant() -> Self {
        Self {
            id: MessageId::new(),
            sender: Sender::Assistant,
            raw_text: String::new(),
            rendered_html: String::new(),
            citations: Vec::new(),
            created_at: now_ms(),
            status: MessageStatus::Streaming,
        }
    }

    /// Finished message with pre-rendered HTML.
    #[must_use]
    pub fn complete(sender: Sender, raw_text: impl Into<String>, rendered_html: String) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            raw_text: raw_text.into(),
            rendered_html,
            citations: Vec::new(),
            created_at: now_ms(),
            status: MessageStatus::Complete,
        }
    }

    /// Apply a publish to this message.
    ///
    /// Returns `false` (and changes nothing) when the update targets another
    /// message or this message is already terminal.
    pub fn apply_update(&mut self, update: &MessageUpdate) -> bool {
        if update.message_id != self.id || self.status.is_terminal() {
            return false;
        }
        self.raw_text.clone_from(&update.raw_text);
        self.rendered_html.clone_from(&update.rendered_html);
        self.citations.clone_from(&update.citations);
        self.status = match update.phase {
            UpdatePhase::Partial => MessageStatus::Streaming,
            UpdatePhase::Final => MessageStatus::Complete,
            UpdatePhase::Failed => MessageStatus::Failed,
        };
        true
    }
}

/// Current wall-clock time in milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
