//! Language-model client: the streaming abstraction and its Gemini
//! implementation.

pub mod gemini;
pub mod prompt;
pub mod streamer;

pub use gemini::{GeminiClient, parse_sse_payload};
pub use prompt::system_instruction;
pub use streamer::{ChunkStream, ResponseStreamer, StreamFuture, StreamRequest};
