//! Persistence of the console session.

pub mod kv;
pub mod session_store;

pub use kv::{JsonFileStore, KeyValueStore, KvFuture, MemoryStore};
pub use session_store::{
    MESSAGES_KEY, SETTINGS_KEY, SessionSettings, SessionSnapshot, TASKS_KEY, load_session,
    save_session,
};
