//! Model client abstraction.

use std::future::Future;
use std::pin::Pin;

use futures::Stream;

use crate::assistant::types::{Attachment, HistoryEntry, ResponseChunk};
use crate::core::errors::JarvisResult;

/// Lazy, finite, non-restartable sequence of response chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = JarvisResult<ResponseChunk>> + Send>>;

/// Boxed future type for streamer operations.
pub type StreamFuture<'a> = Pin<Box<dyn Future<Output = JarvisResult<ChunkStream>> + Send + 'a>>;

/// Everything needed to open one response stream.
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    /// Conversation so far, oldest first, ending with the new user turn.
    pub history: Vec<HistoryEntry>,
    /// Ground the answer with live web search.
    pub search_enabled: bool,
    /// Files attached to the latest user turn.
    pub attachments: Vec<Attachment>,
    /// Open tasks, so the model can target them with `complete` commands.
    pub pending_tasks: Vec<String>,
}

/// Trait abstraction over streaming language-model clients.
pub trait ResponseStreamer: Send + Sync {
    /// Open one streaming request.
    ///
    /// # Errors
    /// Returns an error if the request cannot be sent or is rejected before
    /// the stream starts.
    fn stream_response(&self, request: StreamRequest) -> StreamFuture<'_>;
}
