//! Streaming response assembly for the assistant.
//!
//! - `types`: conversation data model and publish records
//! - `citations`: citation deduplication
//! - `render`: markdown rendering and sanitization
//! - `command`: embedded task commands
//! - `assembler`: stream consumer
//! - `conversation`: message log

pub mod assembler;
pub mod citations;
pub mod command;
pub mod conversation;
pub mod render;
pub mod types;

pub use assembler::{
    APOLOGY_MESSAGE, FinishedResponse, StreamAssembler, StreamOptions, StreamOutcome, UpdateSink,
    consume_stream, fail_response, failure_update,
};
pub use citations::CitationSet;
pub use command::{
    ActionKind, AppliedAction, CommandError, Extraction, PendingAction, TASK_COMMAND_SENTINEL,
    TASK_COMMAND_SEPARATOR, apply_action, extract_actions, strip_partial_command,
};
pub use conversation::{Conversation, INTRO_TEXT};
pub use render::{CURSOR_GLYPH, render_markdown, render_streaming, render_user_text, sanitize_html};
pub use types::{
    Attachment, Citation, CitationRecord, ConversationMessage, HistoryEntry, MessageStatus,
    MessageUpdate, ResponseChunk, Sender, UpdatePhase,
};
