//! Provider client contract consumed by the turn runner.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::stream::EventStream;
use crate::types::{Conversation, Model};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    #[default]
    #[serde(rename = "openai_api_key")]
    OpenAiApiKey,
    #[serde(rename = "chatgpt")]
    ChatGpt,
}

impl AuthMode {
    /// Anything other than the literal `"chatgpt"` (trimmed,
    /// case-insensitive) means API-key auth.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("chatgpt") {
            Self::ChatGpt
        } else {
            Self::OpenAiApiKey
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAiApiKey => "openai_api_key",
            Self::ChatGpt => "chatgpt",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    pub auth_mode: AuthMode,
    pub api_key: String,
    pub access_token: String,
    pub account_id: String,
    pub session_id: String,
    pub base_url: String,
    pub headers: HashMap<String, String>,
    pub temperature: Option<f64>,
    pub max_tokens: u32,
}

/// A streaming inference backend.
///
/// `stream` posts one request for the given conversation snapshot and
/// returns the normalized event stream. The token cancels the request and
/// any in-flight SSE read.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn stream(
        &self,
        cancel: CancellationToken,
        model: &Model,
        conversation: Conversation,
        options: StreamOptions,
    ) -> Result<Box<dyn EventStream>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_mode_parse_is_lossy() {
        assert_eq!(AuthMode::parse("chatgpt"), AuthMode::ChatGpt);
        assert_eq!(AuthMode::parse("  ChatGPT  "), AuthMode::ChatGpt);
        assert_eq!(AuthMode::parse("openai_api_key"), AuthMode::OpenAiApiKey);
        assert_eq!(AuthMode::parse(""), AuthMode::OpenAiApiKey);
        assert_eq!(AuthMode::parse("anything-else"), AuthMode::OpenAiApiKey);
    }
}
