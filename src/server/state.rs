//! Application state shared across all request handlers.

use std::sync::{Arc, Mutex, PoisonError};

use crate::assistant::conversation::Conversation;
use crate::assistant::types::MessageUpdate;
use crate::assistant::UpdateSink;
use crate::core::config::JarvisConfig;
use crate::core::errors::JarvisResult;
use crate::core::ids::TaskId;
use crate::llm::{GeminiClient, ResponseStreamer};
use crate::storage::{
    JsonFileStore, KeyValueStore, MemoryStore, SessionSettings, SessionSnapshot, load_session,
    save_session,
};
use crate::tasks::{TaskList, TaskStore};

use super::events::{ChatEvent, EventSender};

/// Mutable console state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Message log.
    pub conversation: Conversation,
    /// Task list.
    pub tasks: TaskList,
    /// User toggles.
    pub settings: SessionSettings,
}

impl Session {
    /// Restore a session from persisted data.
    #[must_use]
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            conversation: Conversation::from_messages(snapshot.messages),
            tasks: snapshot.tasks,
            settings: snapshot.settings,
        }
    }

    /// Copy of everything that is persisted.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.conversation.messages().to_vec(),
            tasks: self.tasks.clone(),
            settings: self.settings,
        }
    }
}

/// Shared application state.
pub struct AppState {
    /// Runtime configuration.
    pub config: JarvisConfig,
    streamer: Arc<dyn ResponseStreamer>,
    store: Arc<dyn KeyValueStore>,
    session: Mutex<Session>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl AppState {
    /// Build state from configuration: Gemini client, file or memory store,
    /// and the persisted session.
    ///
    /// # Errors
    /// Returns an error if the model client cannot be created.
    pub async fn from_config(config: JarvisConfig) -> JarvisResult<Arc<Self>> {
        let streamer = Arc::new(GeminiClient::new(&config.model)?);
        let store: Arc<dyn KeyValueStore> = match &config.storage.state_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "persisting session to file");
                Arc::new(JsonFileStore::new(path))
            }
            None => {
                tracing::info!("no state path configured, session kept in memory");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::with_parts(config, streamer, store).await)
    }

    /// Build state from explicit collaborators.
    pub async fn with_parts(
        config: JarvisConfig,
        streamer: Arc<dyn ResponseStreamer>,
        store: Arc<dyn KeyValueStore>,
    ) -> Arc<Self> {
        let snapshot = load_session(store.as_ref()).await;
        tracing::info!(
            messages = snapshot.messages.len(),
            tasks = snapshot.tasks.items().len(),
            "session loaded"
        );
        Arc::new(Self {
            config,
            streamer,
            store,
            session: Mutex::new(Session::from_snapshot(snapshot)),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Model client.
    #[must_use]
    pub fn streamer(&self) -> &dyn ResponseStreamer {
        self.streamer.as_ref()
    }

    /// Run `f` with exclusive access to the session.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Copy of the persisted part of the session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.with_session(|s| s.snapshot())
    }

    /// Save the current session. Failures are logged, not returned.
    pub async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.snapshot();
        if let Err(e) = save_session(self.store.as_ref(), &snapshot).await {
            tracing::warn!(error = %e, "failed to persist session");
        }
    }
}

/// Task store view over the shared session.
pub struct SharedTasks<'a> {
    state: &'a AppState,
}

impl<'a> SharedTasks<'a> {
    /// View the tasks of `state`.
    #[must_use]
    pub const fn new(state: &'a AppState) -> Self {
        Self { state }
    }
}

impl TaskStore for SharedTasks<'_> {
    fn add_task(&mut self, text: &str) -> Option<TaskId> {
        self.state.with_session(|s| s.tasks.add_task(text))
    }

    fn find_and_complete_task(&mut self, phrase: &str) -> bool {
        self.state
            .with_session(|s| s.tasks.find_and_complete_task(phrase))
    }
}

/// Update sink that applies updates to the shared conversation and forwards
/// them to the SSE client.
pub struct SessionSink<'a> {
    state: &'a AppState,
    events: EventSender,
}

impl<'a> SessionSink<'a> {
    /// Sink for `state` forwarding to `events`.
    #[must_use]
    pub const fn new(state: &'a AppState, events: EventSender) -> Self {
        Self { state, events }
    }
}

impl UpdateSink for SessionSink<'_> {
    fn publish(&mut self, update: MessageUpdate) -> bool {
        let applied = self
            .state
            .with_session(|s| s.conversation.apply_update(&update));
        if !applied {
            tracing::debug!(message_id = %update.message_id, "update for closed message dropped");
        }
        ChatEvent::Update(update).send(&self.events)
    }
}
