//! Server-sent events emitted during a chat turn.

use axum::response::sse::Event;
use serde_json::json;
use tokio::sync::mpsc;

use crate::assistant::types::{MessageStatus, MessageUpdate};
use crate::core::ids::MessageId;
use crate::tasks::TaskItem;

/// Channel feeding one SSE response.
pub type EventSender = mpsc::UnboundedSender<Result<Event, axum::Error>>;

/// One event of a chat turn.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Partial, final or failure update of the assistant message.
    Update(MessageUpdate),
    /// Task list after embedded commands changed it.
    Tasks(Vec<TaskItem>),
    /// Plain text to read aloud.
    Speak(String),
    /// The turn is over.
    Done {
        /// Assistant message of the turn.
        message_id: MessageId,
        /// Final status of that message.
        status: MessageStatus,
    },
}

impl ChatEvent {
    /// SSE event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Update(_) => "update",
            Self::Tasks(_) => "tasks",
            Self::Speak(_) => "speak",
            Self::Done { .. } => "done",
        }
    }

    /// Encode as an SSE event with a JSON payload.
    ///
    /// # Errors
    /// Returns an error if the payload cannot be serialized.
    pub fn into_event(self) -> Result<Event, axum::Error> {
        let event = Event::default().event(self.name());
        match self {
            Self::Update(update) => event.json_data(update),
            Self::Tasks(tasks) => event.json_data(tasks),
            Self::Speak(text) => event.json_data(json!({ "text": text })),
            Self::Done { message_id, status } => {
                event.json_data(json!({ "message_id": message_id, "status": status }))
            }
        }
    }

    /// Send on `events`. Returns `false` once the client is gone.
    pub fn send(self, events: &EventSender) -> bool {
        events.send(self.into_event()).is_ok()
    }
}
