//! Session snapshot persisted across restarts.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::assistant::types::ConversationMessage;
use crate::core::errors::JarvisResult;
use crate::tasks::TaskList;

use super::kv::KeyValueStore;

/// Key of the message log.
pub const MESSAGES_KEY: &str = "jarvis.messages";
/// Key of the task list.
pub const TASKS_KEY: &str = "jarvis.tasks";
/// Key of the user settings.
pub const SETTINGS_KEY: &str = "jarvis.settings";

/// User toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Speak completed responses aloud.
    pub tts_enabled: bool,
    /// Ground responses with web search.
    pub web_search_enabled: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tts_enabled: true,
            web_search_enabled: false,
        }
    }
}

/// Everything persisted for one console.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Message log, oldest first.
    pub messages: Vec<ConversationMessage>,
    /// Task list.
    pub tasks: TaskList,
    /// User toggles.
    pub settings: SessionSettings,
}

/// Load the persisted session. Missing or unreadable entries fall back to
/// their defaults.
pub async fn load_session(store: &dyn KeyValueStore) -> SessionSnapshot {
    SessionSnapshot {
        messages: load_entry(store, MESSAGES_KEY).await.unwrap_or_default(),
        tasks: load_entry(store, TASKS_KEY).await.unwrap_or_default(),
        settings: load_entry(store, SETTINGS_KEY).await.unwrap_or_default(),
    }
}

/// Persist `snapshot`.
///
/// # Errors
/// Returns an error if serialization or the backend write fails.
pub async fn save_session(store: &dyn KeyValueStore, snapshot: &SessionSnapshot) -> JarvisResult<()> {
    store
        .save(MESSAGES_KEY, serde_json::to_value(&snapshot.messages)?)
        .await?;
    store
        .save(TASKS_KEY, serde_json::to_value(&snapshot.tasks)?)
        .await?;
    store
        .save(SETTINGS_KEY, serde_json::to_value(snapshot.settings)?)
        .await?;
    Ok(())
}

async fn load_entry<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let value = match store.load(key).await {
        Ok(value) => value?,
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to read persisted state");
            return None;
        }
    };
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(key, error = %e, "ignoring corrupt persisted entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::assistant::types::Sender;
    use crate::storage::kv::{JsonFileStore, MemoryStore};
    use crate::tasks::TaskStore;

    fn sample() -> SessionSnapshot {
        let mut tasks = TaskList::new();
        tasks.add_task("Calibrate the repulsors");
        SessionSnapshot {
            messages: vec![ConversationMessage::complete(
                Sender::User,
                "Hello",
                "Hello".to_string(),
            )],
            tasks,
            settings: SessionSettings {
                tts_enabled: false,
                web_search_enabled: true,
            },
        }
    }

    #[tokio::test]
    async fn test_empty_store_gives_defaults() {
        let store = MemoryStore::new();
        let snapshot = load_session(&store).await;
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.tasks.is_empty());
        assert!(snapshot.settings.tts_enabled);
        assert!(!snapshot.settings.web_search_enabled);
    }

    #[tokio::test]
    async fn test_session_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        let snapshot = sample();

        save_session(&store, &snapshot).await.unwrap();
        assert_eq!(load_session(&store).await, snapshot);
    }

    #[tokio::test]
    async fn test_corrupt_entry_falls_back() {
        let store = MemoryStore::new();
        save_session(&store, &sample()).await.unwrap();
        store.save(MESSAGES_KEY, json!(42)).await.unwrap();
        store
            .save(SETTINGS_KEY, json!({"web_search_enabled": true}))
            .await
            .unwrap();

        let snapshot = load_session(&store).await;
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.tasks.items().len(), 1);
        assert!(snapshot.settings.tts_enabled);
        assert!(snapshot.settings.web_search_enabled);
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "garbage").unwrap();
        let store = JsonFileStore::new(&path);

        assert_eq!(load_session(&store).await, SessionSnapshot::default());
        save_session(&store, &sample()).await.unwrap();
        assert_eq!(load_session(&store).await.tasks.items().len(), 1);
    }
}
