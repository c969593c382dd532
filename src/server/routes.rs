//! HTTP route handlers for the console API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::services::ServeDir;

use crate::assistant::types::{Attachment, ConversationMessage, MessageStatus};
use crate::assistant::{APOLOGY_MESSAGE, StreamOptions, StreamOutcome, consume_stream, fail_response};
use crate::core::errors::JarvisError;
use crate::core::ids::{MessageId, TaskId};
use crate::llm::StreamRequest;
use crate::storage::SessionSettings;
use crate::tasks::{TaskItem, TaskList, TaskStore};
use crate::voice::speech_text;

use super::events::{ChatEvent, EventSender};
use super::state::{AppState, SessionSink, SharedTasks};

/// Error response: status plus a plain-text reason.
type ApiError = (StatusCode, String);

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.config.server.static_dir);
    Router::new()
        .route("/health", get(health_check))
        .route("/api/session", get(get_session))
        .route("/api/chat", post(chat))
        .route("/api/chat/clear", post(clear_chat))
        .route("/api/tasks", get(list_tasks).post(add_task))
        .route("/api/tasks/{id}/toggle", post(toggle_task))
        .route("/api/tasks/clear-completed", post(clear_completed_tasks))
        .route("/api/settings", get(get_settings).put(update_settings))
        .fallback_service(static_files)
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "jarvis-console",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Everything the front-end needs to draw the console.
#[derive(Debug, Serialize)]
pub struct SessionView {
    /// Message log.
    pub messages: Vec<ConversationMessage>,
    /// Task list.
    pub tasks: TaskList,
    /// User toggles.
    pub settings: SessionSettings,
    /// Whether a response is streaming right now.
    pub streaming: bool,
}

async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionView> {
    Json(state.with_session(|s| SessionView {
        messages: s.conversation.messages().to_vec(),
        tasks: s.tasks.clone(),
        settings: s.settings,
        streaming: s.conversation.is_streaming(),
    }))
}

/// Chat turn request.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The user's message.
    #[serde(default)]
    pub message: String,
    /// Files attached to the message.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Overrides the web search setting for this turn.
    #[serde(default)]
    pub web_search: Option<bool>,
}

/// Start a chat turn and stream its events.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    if request.message.trim().is_empty() && request.attachments.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message must not be empty".to_string()));
    }
    for attachment in &request.attachments {
        attachment
            .validate()
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    }

    let ChatRequest {
        message,
        attachments,
        web_search,
    } = request;
    let turn = state.with_session(|s| {
        if s.conversation.is_streaming() {
            return None;
        }
        s.conversation.push_user(&message);
        let history = s.conversation.history();
        let message_id = s.conversation.begin_assistant_turn();
        Some((
            message_id,
            StreamRequest {
                history,
                search_enabled: web_search.unwrap_or(s.settings.web_search_enabled),
                attachments,
                pending_tasks: s.tasks.pending_texts(),
            },
        ))
    });
    let Some((message_id, stream_request)) = turn else {
        return Err((
            StatusCode::CONFLICT,
            "a response is already streaming".to_string(),
        ));
    };

    tracing::info!(
        %message_id,
        search = stream_request.search_enabled,
        attachments = stream_request.attachments.len(),
        "chat turn started"
    );
    state.persist().await;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_turn(Arc::clone(&state), message_id, stream_request, tx));

    Ok(Sse::new(UnboundedReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

/// Drive one assistant turn to its end and report it on `events`.
///
/// The turn is cancelled as soon as the event receiver goes away; the
/// message is then closed as cancelled with whatever text it had.
pub(crate) async fn run_turn(
    state: Arc<AppState>,
    message_id: MessageId,
    request: StreamRequest,
    events: EventSender,
) {
    let idle_timeout = state.config.stream.idle_timeout;
    let options = StreamOptions::new(idle_timeout);

    let watcher = {
        let watched = events.clone();
        let cancel = options.cancel.clone();
        tokio::spawn(async move {
            watched.closed().await;
            cancel.cancel();
        })
    };

    let outcome = {
        let mut sink = SessionSink::new(&state, events.clone());
        let mut tasks = SharedTasks::new(&state);
        let opened = tokio::select! {
            biased;
            () = options.cancel.cancelled() => None,
            opened = tokio::time::timeout(idle_timeout, state.streamer().stream_response(request)) => Some(opened),
        };
        match opened {
            None => StreamOutcome::Cancelled,
            Some(Ok(Ok(stream))) => {
                consume_stream(message_id, stream, &mut sink, &mut tasks, &options).await
            }
            Some(Ok(Err(error))) => fail_response(message_id, error, &mut sink),
            Some(Err(_)) => fail_response(
                message_id,
                JarvisError::StreamTimeout(idle_timeout),
                &mut sink,
            ),
        }
    };
    watcher.abort();

    let tts_enabled = state.with_session(|s| s.settings.tts_enabled);
    let status = match &outcome {
        StreamOutcome::Completed(finished) => {
            if finished.tasks_changed() {
                let items = state.with_session(|s| s.tasks.items().to_vec());
                ChatEvent::Tasks(items).send(&events);
            }
            let spoken = speech_text(&finished.update.raw_text);
            if tts_enabled && !spoken.is_empty() {
                ChatEvent::Speak(spoken).send(&events);
            }
            MessageStatus::Complete
        }
        StreamOutcome::Failed(_) => {
            if tts_enabled {
                ChatEvent::Speak(APOLOGY_MESSAGE.to_string()).send(&events);
            }
            MessageStatus::Failed
        }
        StreamOutcome::Cancelled => {
            state.with_session(|s| s.conversation.cancel_message(message_id));
            MessageStatus::Cancelled
        }
    };

    tracing::info!(%message_id, ?status, "chat turn finished");
    ChatEvent::Done { message_id, status }.send(&events);
    state.persist().await;
}

/// Reset the conversation to the greeting.
async fn clear_chat(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ConversationMessage>>, ApiError> {
    let messages = state.with_session(|s| {
        if s.conversation.is_streaming() {
            return None;
        }
        s.conversation.clear();
        Some(s.conversation.messages().to_vec())
    });
    let Some(messages) = messages else {
        return Err((
            StatusCode::CONFLICT,
            "cannot clear while a response is streaming".to_string(),
        ));
    };
    state.persist().await;
    Ok(Json(messages))
}

async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<TaskList> {
    Json(state.with_session(|s| s.tasks.clone()))
}

/// New task request.
#[derive(Debug, Deserialize)]
pub struct NewTaskRequest {
    /// Task description.
    pub text: String,
}

async fn add_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewTaskRequest>,
) -> Result<(StatusCode, Json<TaskItem>), ApiError> {
    let item = state.with_session(|s| {
        s.tasks
            .add_task(&request.text)
            .and_then(|id| s.tasks.get(id).cloned())
    });
    let Some(item) = item else {
        return Err((
            StatusCode::BAD_REQUEST,
            "task text must not be empty".to_string(),
        ));
    };
    state.persist().await;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn toggle_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<Json<TaskItem>, ApiError> {
    let item = state.with_session(|s| s.tasks.toggle(id).and_then(|_| s.tasks.get(id).cloned()));
    let Some(item) = item else {
        return Err((StatusCode::NOT_FOUND, format!("no task with id {id}")));
    };
    state.persist().await;
    Ok(Json(item))
}

/// Result of clearing completed tasks.
#[derive(Debug, Serialize)]
pub struct ClearCompletedResponse {
    /// Number of removed tasks.
    pub removed: usize,
    /// Remaining tasks.
    pub tasks: TaskList,
}

async fn clear_completed_tasks(State(state): State<Arc<AppState>>) -> Json<ClearCompletedResponse> {
    let response = state.with_session(|s| ClearCompletedResponse {
        removed: s.tasks.clear_completed(),
        tasks: s.tasks.clone(),
    });
    if response.removed > 0 {
        state.persist().await;
    }
    Json(response)
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SessionSettings> {
    Json(state.with_session(|s| s.settings))
}

/// Partial settings update.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    /// Speak completed responses.
    pub tts_enabled: Option<bool>,
    /// Ground responses with web search.
    pub web_search_enabled: Option<bool>,
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> Json<SessionSettings> {
    let settings = state.with_session(|s| {
        if let Some(tts) = update.tts_enabled {
            s.settings.tts_enabled = tts;
        }
        if let Some(search) = update.web_search_enabled {
            s.settings.web_search_enabled = search;
        }
        s.settings
    });
    tracing::info!(?settings, "settings updated");
    state.persist().await;
    Json(settings)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use futures::{StreamExt, stream};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::assistant::types::ResponseChunk;
    use crate::core::config::JarvisConfig;
    use crate::core::errors::JarvisResult;
    use crate::llm::{ChunkStream, ResponseStreamer, StreamFuture};
    use crate::storage::MemoryStore;

    enum Script {
        Reply(Vec<&'static str>),
        Fail,
        Hang(&'static str),
    }

    struct ScriptedStreamer {
        script: Script,
        requests: Mutex<Vec<StreamRequest>>,
    }

    impl ResponseStreamer for ScriptedStreamer {
        fn stream_response(&self, request: StreamRequest) -> StreamFuture<'_> {
            self.requests.lock().unwrap().push(request);
            let result = match &self.script {
                Script::Reply(parts) => {
                    let chunks: Vec<JarvisResult<ResponseChunk>> =
                        parts.iter().map(|p| Ok(ResponseChunk::text(*p))).collect();
                    Ok(Box::pin(stream::iter(chunks)) as ChunkStream)
                }
                Script::Fail => Err(JarvisError::ApiStatus {
                    status: 503,
                    body: "overloaded".to_string(),
                }),
                Script::Hang(first) => Ok(Box::pin(
                    stream::iter(vec![Ok::<_, JarvisError>(ResponseChunk::text(*first))])
                        .chain(stream::pending()),
                ) as ChunkStream),
            };
            Box::pin(async move { result })
        }
    }

    async fn test_state(script: Script, config: JarvisConfig) -> (Arc<AppState>, Arc<ScriptedStreamer>) {
        let streamer = Arc::new(ScriptedStreamer {
            script,
            requests: Mutex::new(Vec::new()),
        });
        let state =
            AppState::with_parts(config, streamer.clone(), Arc::new(MemoryStore::new())).await;
        (state, streamer)
    }

    fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn call(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, String) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn sse_events(body: &str) -> Vec<(String, Value)> {
        body.split("\n\n")
            .filter_map(|frame| {
                let mut name = None;
                let mut data = String::new();
                for line in frame.lines() {
                    if let Some(value) = line.strip_prefix("event:") {
                        name = Some(value.trim().to_string());
                    } else if let Some(value) = line.strip_prefix("data:") {
                        data.push_str(value.trim_start());
                    }
                }
                Some((name?, serde_json::from_str(&data).ok()?))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = test_state(Script::Fail, JarvisConfig::default()).await;
        let (status, body) = call(&state, empty_request("GET", "/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"ok\""));
    }

    #[tokio::test]
    async fn test_chat_response_is_event_stream() {
        let (state, _) = test_state(Script::Reply(vec!["At your service."]), JarvisConfig::default()).await;
        let response = create_router(state)
            .oneshot(json_request("POST", "/api/chat", &json!({"message": "Hello"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("text/event-stream"), "{content_type}");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(sse_events(&body).last().unwrap().0, "done");
    }

    #[tokio::test]
    async fn test_chat_streams_updates_and_applies_task() {
        let (state, streamer) = test_state(
            Script::Reply(vec![
                "Right away, Sir.\n@@JARVIS_",
                "TASK@@::{\"action\":\"add\",\"task\":\"Buy milk\"}",
            ]),
            JarvisConfig::default(),
        )
        .await;

        let (status, body) = call(
            &state,
            json_request("POST", "/api/chat", &json!({"message": "Remind me to buy milk"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let events = sse_events(&body);
        let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["update", "update", "update", "tasks", "speak", "done"]);
        for (_, update) in &events[..2] {
            assert!(!update["rendered_html"].as_str().unwrap().contains("@@"));
        }
        assert_eq!(events[2].1["raw_text"], "Right away, Sir.");
        assert_eq!(events[2].1["phase"], "final");
        assert_eq!(events[3].1[0]["text"], "Buy milk");
        assert_eq!(events[4].1["text"], "Right away, Sir.");
        assert_eq!(events[5].1["status"], "complete");

        let requests = streamer.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].history.last().map(|h| h.text.as_str()),
            Some("Remind me to buy milk")
        );
        assert!(!requests[0].search_enabled);
        drop(requests);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.tasks.pending_texts(), vec!["Buy milk".to_string()]);
        let last = snapshot.messages.last().unwrap();
        assert_eq!(last.status, MessageStatus::Complete);
        assert_eq!(last.raw_text, "Right away, Sir.");
    }

    #[tokio::test]
    async fn test_chat_failure_publishes_apology() {
        let (state, _) = test_state(Script::Fail, JarvisConfig::default()).await;
        state.with_session(|s| s.settings.tts_enabled = false);

        let (status, body) = call(
            &state,
            json_request("POST", "/api/chat", &json!({"message": "Status report"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let events = sse_events(&body);
        let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["update", "done"]);
        assert_eq!(events[0].1["raw_text"], APOLOGY_MESSAGE);
        assert_eq!(events[1].1["status"], "failed");
    }

    #[tokio::test]
    async fn test_chat_idle_timeout_fails_turn() {
        let mut config = JarvisConfig::default();
        config.stream.idle_timeout = Duration::from_millis(50);
        let (state, _) = test_state(Script::Hang("Thinking"), config).await;

        let (_, body) = call(
            &state,
            json_request("POST", "/api/chat", &json!({"message": "Hello"})),
        )
        .await;
        let events = sse_events(&body);
        assert_eq!(events[0].1["raw_text"], "Thinking");
        assert_eq!(events[1].1["raw_text"], APOLOGY_MESSAGE);
        assert_eq!(events.last().unwrap().1["status"], "failed");
    }

    #[tokio::test]
    async fn test_chat_rejects_bad_input() {
        let (state, streamer) = test_state(Script::Reply(vec!["ok"]), JarvisConfig::default()).await;

        let (status, _) = call(
            &state,
            json_request("POST", "/api/chat", &json!({"message": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &state,
            json_request(
                "POST",
                "/api/chat",
                &json!({"message": "look", "attachments": [{"mime_type": "image/png", "base64_data": "%%%"}]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(streamer.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_busy_conversation_conflicts() {
        let (state, _) = test_state(Script::Reply(vec!["ok"]), JarvisConfig::default()).await;
        state.with_session(|s| s.conversation.begin_assistant_turn());

        let (status, _) = call(
            &state,
            json_request("POST", "/api/chat", &json!({"message": "Hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&state, empty_request("POST", "/api/chat/clear")).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_turn() {
        let (state, _) = test_state(Script::Hang("Working on it"), JarvisConfig::default()).await;
        let id = state.with_session(|s| {
            s.conversation.push_user("Long job");
            s.conversation.begin_assistant_turn()
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let turn = tokio::spawn(run_turn(state.clone(), id, StreamRequest::default(), tx));
        assert!(rx.recv().await.is_some());
        drop(rx);
        turn.await.unwrap();

        let message = state
            .with_session(|s| s.conversation.get(id).cloned())
            .unwrap();
        assert_eq!(message.status, MessageStatus::Cancelled);
        assert_eq!(message.raw_text, "Working on it");
        assert!(!message.rendered_html.contains('█'));
    }

    #[tokio::test]
    async fn test_task_endpoints() {
        let (state, _) = test_state(Script::Fail, JarvisConfig::default()).await;

        let (status, body) = call(
            &state,
            json_request("POST", "/api/tasks", &json!({"text": "  Calibrate repulsors "})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let item: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(item["text"], "Calibrate repulsors");
        let id = item["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &state,
            json_request("POST", "/api/tasks", &json!({"text": " "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &state,
            empty_request("POST", &format!("/api/tasks/{id}/toggle")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["completed"], true);

        let (status, _) = call(
            &state,
            empty_request("POST", &format!("/api/tasks/{}/toggle", TaskId::new())),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(&state, empty_request("POST", "/api/tasks/clear-completed")).await;
        let cleared: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(cleared["removed"], 1);
        assert_eq!(cleared["tasks"], json!([]));
    }

    #[tokio::test]
    async fn test_settings_and_session() {
        let (state, _) = test_state(Script::Fail, JarvisConfig::default()).await;

        let (status, body) = call(
            &state,
            json_request("PUT", "/api/settings", &json!({"web_search_enabled": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_str::<Value>(&body).unwrap(),
            json!({"tts_enabled": true, "web_search_enabled": true})
        );

        let (_, body) = call(&state, empty_request("GET", "/api/session")).await;
        let session: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(session["messages"].as_array().unwrap().len(), 1);
        assert_eq!(session["messages"][0]["sender"], "assistant");
        assert_eq!(session["settings"]["web_search_enabled"], true);
        assert_eq!(session["streaming"], false);
    }
}
