//! Streaming client for the hosted generative-language API.
//!
//! Requests go to `:streamGenerateContent?alt=sse`; every SSE `data:` payload
//! is one `GenerateContentResponse`, which maps to one [`ResponseChunk`].

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::assistant::types::{Attachment, CitationRecord, ResponseChunk};
use crate::core::config::ModelConfig;
use crate::core::errors::{JarvisError, JarvisResult};

use super::prompt::{role_for, system_instruction, trim_leading_assistant};
use super::streamer::{ChunkStream, ResponseStreamer, StreamFuture, StreamRequest};

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Request body of `generateContent`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// Conversation turns.
    pub contents: Vec<Content>,
    /// Persona and conventions.
    pub system_instruction: Content,
    /// Enabled tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

/// One turn, or the system instruction when `role` is absent.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Content {
    /// `user` or `model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Turn parts.
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Text or inline binary data.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    /// Set by the API on reasoning parts, which are not shown.
    #[serde(default, skip_serializing)]
    pub thought: Option<bool>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    fn inline(attachment: &Attachment) -> Self {
        Self {
            inline_data: Some(InlineData {
                mime_type: attachment.mime_type.clone(),
                data: attachment.base64_data.clone(),
            }),
            ..Self::default()
        }
    }
}

/// Base64 payload with its MIME type.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// MIME type.
    pub mime_type: String,
    /// Base64 data.
    pub data: String,
}

/// Tool declaration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Live web search grounding.
    pub google_search: GoogleSearch,
}

/// Marker for the search tool; serialized as `{}`.
#[derive(Debug, Serialize)]
pub struct GoogleSearch {}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Debug, Default, Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// Streaming client for the generative-language API.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    /// Returns an error if no API key is configured or the HTTP client cannot
    /// be built.
    pub fn new(config: &ModelConfig) -> JarvisResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                JarvisError::InvalidConfig("API key not set (JARVIS_API_KEY)".to_string())
            })?;

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Streaming endpoint for the configured model.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    /// Build the request body for `request`.
    #[must_use]
    pub fn build_request_body(&self, request: &StreamRequest) -> GenerateContentRequest {
        let mut contents: Vec<Content> = trim_leading_assistant(&request.history)
            .iter()
            .map(|entry| Content {
                role: Some(role_for(entry.sender).to_string()),
                parts: vec![Part::text(entry.text.clone())],
            })
            .collect();

        if !request.attachments.is_empty() {
            let ends_with_user = contents
                .last()
                .is_some_and(|c| c.role.as_deref() == Some("user"));
            if !ends_with_user {
                contents.push(Content {
                    role: Some("user".to_string()),
                    parts: Vec::new(),
                });
            }
            if let Some(last) = contents.last_mut() {
                last.parts
                    .extend(request.attachments.iter().map(Part::inline));
            }
        }

        GenerateContentRequest {
            contents,
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(system_instruction(&request.pending_tasks))],
            },
            tools: request.search_enabled.then(|| {
                vec![Tool {
                    google_search: GoogleSearch {},
                }]
            }),
        }
    }
}

impl ResponseStreamer for GeminiClient {
    fn stream_response(&self, request: StreamRequest) -> StreamFuture<'_> {
        Box::pin(async move {
            let body = self.build_request_body(&request);
            tracing::info!(
                model = %self.model,
                turns = body.contents.len(),
                search = request.search_enabled,
                attachments = request.attachments.len(),
                "opening response stream"
            );

            let response = self
                .client
                .post(self.endpoint())
                .header(API_KEY_HEADER, &self.api_key)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(JarvisError::ApiStatus {
                    status: status.as_u16(),
                    body,
                });
            }

            let chunks = response
                .bytes_stream()
                .eventsource()
                .filter_map(|event| async move {
                    match event {
                        Ok(event) => parse_sse_payload(&event.data).transpose(),
                        Err(e) => Some(Err(JarvisError::Stream(e.to_string()))),
                    }
                });

            Ok(Box::pin(chunks) as ChunkStream)
        })
    }
}

/// Decode one SSE `data:` payload. Blank payloads yield `None`.
///
/// # Errors
/// Returns an error for undecodable payloads and for API error objects.
pub fn parse_sse_payload(data: &str) -> JarvisResult<Option<ResponseChunk>> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let response: GenerateContentResponse = serde_json::from_str(data)
        .map_err(|e| JarvisError::Stream(format!("undecodable payload: {e}")))?;

    if let Some(error) = response.error {
        return Err(JarvisError::Api(format!(
            "{} (code {})",
            error.message.unwrap_or_else(|| "unknown error".to_string()),
            error.code.unwrap_or_default()
        )));
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(Some(ResponseChunk::default()));
    };

    let text_delta: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|part| part.thought != Some(true))
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    let citations = candidate
        .grounding_metadata
        .map(|meta| meta.grounding_chunks)
        .filter(|chunks| !chunks.is_empty())
        .map(|chunks| {
            chunks
                .into_iter()
                .map(|chunk| {
                    let web = chunk.web.unwrap_or_default();
                    CitationRecord {
                        uri: web.uri,
                        title: web.title,
                    }
                })
                .collect()
        });

    Ok(Some(ResponseChunk {
        text_delta,
        citations,
    }))
}
