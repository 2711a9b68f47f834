//! Minimal OpenAI-compatible chat completions client.
//!
//! This crate provides a focused client for the `/chat/completions` endpoint
//! exposed by most local and hosted model servers, with:
//! - Non-streaming and streaming completions
//! - Sampling controls (temperature, repetition penalty, token budget)
//! - Proper SSE parsing for streaming responses

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;

/// Default API base URL (a local Ollama server's OpenAI-compatible API).
pub const DEFAULT_API_BASE: &str = "http://localhost:11434/v1";

/// Default model name.
pub const DEFAULT_MODEL: &str = "llama3.1";

/// Errors that can occur when using the chat client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Stream of events from a streaming completion.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>;

/// Chat completions client.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl Client {
    /// Create a new client for the given API base URL (e.g. `http://host:8000/v1`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create a client from environment variables.
    ///
    /// Uses `SAGA_API_BASE`, `SAGA_API_KEY` and `SAGA_MODEL`, falling back to
    /// the local defaults when unset.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("SAGA_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let mut client = Self::new(base_url);

        if let Ok(key) = std::env::var("SAGA_API_KEY") {
            if !key.is_empty() {
                client.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var("SAGA_MODEL") {
            if !model.is_empty() {
                client.model = model;
            }
        }

        client
    }

    /// Set the bearer token sent with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Point the client at another API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The API base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a completion request and return the full response.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let api_request = self.build_api_request(&request, false);
        let response = self.send(&api_request).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        parse_response(api_response)
    }

    /// Send a completion request and stream the response.
    pub async fn stream(&self, request: Request) -> Result<EventStream, Error> {
        let api_request = self.build_api_request(&request, true);
        let response = self.send(&api_request).await?;

        // Keep a buffer so SSE events split across network chunks are reassembled
        let stream = response
            .bytes_stream()
            .scan((String::new(), Vec::new()), |(buffer, pending), result| {
                let events = match result {
                    Ok(bytes) => {
                        push_utf8(buffer, pending, &bytes);
                        parse_sse_events_buffered(buffer)
                    }
                    Err(e) => vec![Err(Error::Network(e.to_string()))],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }

    async fn send(&self, api_request: &ApiRequest) -> Result<reqwest::Response, Error> {
        let headers = self.build_headers()?;

        tracing::debug!(
            model = %api_request.model,
            max_tokens = api_request.max_tokens,
            stream = api_request.stream,
            "Sending chat completion request"
        );

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .headers(headers)
            .json(api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        Ok(response)
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ref key) = self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
            );
        }
        Ok(headers)
    }

    fn build_api_request(&self, request: &Request, stream: bool) -> ApiRequest {
        ApiRequest {
            model: self.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            repetition_penalty: request.repetition_penalty,
            stream,
        }
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A completion request.
#[derive(Debug, Clone)]
pub struct Request {
    pub messages: Vec<Message>,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
    pub repetition_penalty: Option<f32>,
}

impl Request {
    /// Create a new request with the given messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: 1024,
            temperature: None,
            repetition_penalty: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = Some(penalty);
        self
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
        }
    }
}

/// A completion response.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

impl Response {
    /// Get the generated text.
    pub fn text(&self) -> &str {
        &self.content
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other,
}

impl FinishReason {
    fn parse(s: &str) -> Self {
        match s {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

// ============================================================================
// Streaming types
// ============================================================================

/// Events from a streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of generated text.
    TextDelta(String),
    /// The model reported why it stopped.
    Finish(FinishReason),
    /// The server closed the stream with `[DONE]`.
    Done,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ApiChunk {
    choices: Vec<ApiChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChunkChoice {
    #[serde(default)]
    delta: ApiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiDelta {
    #[serde(default)]
    content: Option<String>,
}

fn parse_response(api_response: ApiResponse) -> Result<Response, Error> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Parse("No choices in response".to_string()))?;

    Ok(Response {
        id: api_response.id,
        model: api_response.model,
        content: choice.message.content.unwrap_or_default(),
        finish_reason: choice
            .finish_reason
            .as_deref()
            .map(FinishReason::parse)
            .unwrap_or(FinishReason::Other),
        usage: api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }),
    })
}

/// Append decoded bytes to `buffer`, holding back a multi-byte character cut
/// at the end of the chunk until the next chunk completes it.
fn push_utf8(buffer: &mut String, pending: &mut Vec<u8>, bytes: &[u8]) {
    pending.extend_from_slice(bytes);
    let valid = match std::str::from_utf8(pending) {
        Ok(text) => text.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => {
            buffer.push_str(&String::from_utf8_lossy(pending));
            pending.clear();
            return;
        }
    };
    buffer.push_str(&String::from_utf8_lossy(&pending[..valid]));
    pending.drain(..valid);
}

/// Parse SSE events from a buffer, consuming complete lines and leaving incomplete data.
///
/// Only `data:` lines carry payloads; comments, `event:` lines and blank
/// separators are skipped. Text after the last newline stays in the buffer
/// until the next chunk completes the line; a complete line with invalid JSON
/// is reported as a parse error and consumed.
fn parse_sse_events_buffered(buffer: &mut String) -> Vec<Result<StreamEvent, Error>> {
    let mut events = Vec::new();

    loop {
        let Some(newline_pos) = buffer.find('\n') else {
            break;
        };

        let line = buffer[..newline_pos].trim_end_matches('\r');

        if let Some(payload) = line.strip_prefix("data:") {
            let payload = payload.trim_start();
            if payload == "[DONE]" {
                events.push(Ok(StreamEvent::Done));
            } else if !payload.is_empty() {
                match serde_json::from_str::<ApiChunk>(payload) {
                    Ok(chunk) => events.extend(convert_chunk(chunk).into_iter().map(Ok)),
                    Err(e) => events.push(Err(Error::Parse(format!("SSE parse error: {e}")))),
                }
            }
        }

        buffer.drain(..=newline_pos);
    }

    events
}

fn convert_chunk(chunk: ApiChunk) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                events.push(StreamEvent::TextDelta(text));
            }
        }
        if let Some(reason) = choice.finish_reason {
            events.push(StreamEvent::Finish(FinishReason::parse(&reason)));
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Client::new("http://localhost:8000/v1/");
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(client.base_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn test_client_with_model() {
        let client = Client::new(DEFAULT_API_BASE)
            .with_model("mistral")
            .with_base_url("http://gpu-box:8080/v1/");
        assert_eq!(client.model(), "mistral");
        assert_eq!(client.base_url(), "http://gpu-box:8080/v1");
    }

    #[test]
    fn test_request_builder() {
        let request = Request::new(vec![Message::system("narrator"), Message::user("Hello")])
            .with_max_tokens(250)
            .with_temperature(0.7)
            .with_repetition_penalty(1.2);

        assert_eq!(request.max_tokens, 250);
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.repetition_penalty, Some(1.2));
        assert_eq!(request.messages[0].role, Role::System);
    }

    #[test]
    fn test_api_request_serialization() {
        let client = Client::new(DEFAULT_API_BASE).with_model("qwen");
        let request = Request::new(vec![Message::user("Bonjour")])
            .with_max_tokens(150)
            .with_repetition_penalty(1.2);

        let body = serde_json::to_value(client.build_api_request(&request, true)).unwrap();
        assert_eq!(body["model"], "qwen");
        assert_eq!(body["max_tokens"], 150);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("temperature").is_none());
        assert!((body["repetition_penalty"].as_f64().unwrap() - 1.2).abs() < 1e-6);
    }

    #[test]
    fn test_parse_response() {
        let json = r#"{
            "id": "chatcmpl-1",
            "model": "llama3.1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Il était une fois"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
        }"#;
        let api: ApiResponse = serde_json::from_str(json).unwrap();
        let response = parse_response(api).unwrap();

        assert_eq!(response.text(), "Il était une fois");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.unwrap().completion_tokens, 4);
    }

    #[test]
    fn test_parse_response_without_choices() {
        let api: ApiResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(parse_response(api), Err(Error::Parse(_))));
    }

    #[test]
    fn test_sse_split_across_chunks() {
        let mut buffer = String::from("data: {\"choices\":[{\"delta\":{\"content\":\"La for");
        let events = parse_sse_events_buffered(&mut buffer);
        assert!(events.is_empty());

        buffer.push_str("êt\"}}]}\n\ndata: [DONE]\n\n");
        let events: Vec<_> = parse_sse_events_buffered(&mut buffer)
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(
            events,
            vec![StreamEvent::TextDelta("La forêt".to_string()), StreamEvent::Done]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let bytes = "forêt".as_bytes();
        let (head, tail) = bytes.split_at(4);
        let mut buffer = String::new();
        let mut pending = Vec::new();

        push_utf8(&mut buffer, &mut pending, head);
        assert_eq!(buffer, "for");
        assert_eq!(pending.len(), 1);

        push_utf8(&mut buffer, &mut pending, tail);
        assert_eq!(buffer, "forêt");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_sse_finish_reason_and_comments() {
        let mut buffer = String::from(
            ": keep-alive\r\ndata: {\"choices\":[{\"delta\":{},\"finish_reason\":\"length\"}]}\r\n",
        );
        let events: Vec<_> = parse_sse_events_buffered(&mut buffer)
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(events, vec![StreamEvent::Finish(FinishReason::Length)]);
    }

    #[test]
    fn test_sse_malformed_event() {
        let mut buffer = String::from("data: {\"choices\": 7}\n");
        let events = parse_sse_events_buffered(&mut buffer);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(Error::Parse(_))));
    }

    #[test]
    fn test_sse_cut_off_line_does_not_block_later_events() {
        let mut buffer = String::from(
            "data: {\"choices\":[{\"delta\":{\"content\":\"cut\"\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"after\"}}]}\n\n\
             data: [DONE]\n\n",
        );
        let events = parse_sse_events_buffered(&mut buffer);

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Err(Error::Parse(_))));
        assert_eq!(events[1].as_ref().ok(), Some(&StreamEvent::TextDelta("after".to_string())));
        assert_eq!(events[2].as_ref().ok(), Some(&StreamEvent::Done));
        assert!(buffer.is_empty());
    }
}
