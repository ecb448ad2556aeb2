//! OpenAI-family adapters.
//!
//! One client, two wire protocols: the classic `/chat/completions` SSE
//! protocol (API-key auth) and the ChatGPT-backend `/responses` SSE
//! protocol (bearer access token). The auth mode on the stream options
//! selects the protocol.

mod chat;
mod responses;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::provider::{AuthMode, ProviderClient, StreamOptions};
use crate::stream::EventStream;
use crate::types::{Conversation, Model};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_CHATGPT_BACKEND_BASE_URL: &str = "https://chatgpt.com/backend-api/codex";

const BODY_EXCERPT_LIMIT: usize = 8 * 1024;

pub struct OpenAIClient {
    base_url: String,
    http: reqwest::Client,
}

impl OpenAIClient {
    /// Client against the public OpenAI API. The HTTP client carries no
    /// total request timeout: SSE responses are long-lived.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_OPENAI_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Replace the HTTP client. The replacement must not set a total
    /// request timeout, or streaming requests will be cut short.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

impl Default for OpenAIClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for OpenAIClient {
    async fn stream(
        &self,
        cancel: CancellationToken,
        model: &Model,
        conversation: Conversation,
        options: StreamOptions,
    ) -> Result<Box<dyn EventStream>, ProviderError> {
        if model.id.trim().is_empty() {
            return Err(ProviderError::Validation("model id is required".to_string()));
        }
        match options.auth_mode {
            AuthMode::ChatGpt => responses::stream(self, cancel, model, conversation, options).await,
            AuthMode::OpenAiApiKey => chat::stream(self, cancel, model, conversation, options).await,
        }
    }
}

/// Decode an accumulated tool-call argument string.
///
/// A JSON object is used directly; any other JSON value is wrapped as
/// `{"value": ...}`; malformed JSON becomes `{"_raw": ...}`; empty input
/// yields an empty mapping.
pub fn parse_tool_arguments(raw: &str) -> Map<String, Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(object)) => object,
        Ok(other) => {
            let mut wrapped = Map::new();
            wrapped.insert("value".to_string(), other);
            wrapped
        }
        Err(_) => {
            let mut wrapped = Map::new();
            wrapped.insert("_raw".to_string(), Value::String(trimmed.to_string()));
            wrapped
        }
    }
}

pub(crate) fn body_excerpt(body: &str) -> String {
    if body.len() <= BODY_EXCERPT_LIMIT {
        return body.to_string();
    }
    let mut cut = BODY_EXCERPT_LIMIT;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body[..cut].to_string()
}
