//! Core configuration, errors and identifiers.

pub mod config;
pub mod errors;
pub mod ids;

pub use config::{JarvisConfig, ModelConfig, ServerConfig, StorageConfig, StreamConfig};
pub use errors::{JarvisError, JarvisResult};
pub use ids::{MessageId, TaskId};
