//! OpenAI-compatible provider for DeepSeek, Qwen (DashScope), Doubao (Ark), Zhipu and OpenAI.
//!
//! All of them accept the same `chat/completions` wire format; they only differ in endpoint,
//! model identifier and display label, which the registry supplies.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LlmError;

use super::types::{GenerationResult, LlmProvider, ProviderId, resolve_credential};

/// Longest backend error body kept in a [`LlmError::Backend`]
const MAX_ERROR_DETAIL: usize = 512;

/// OpenAI-compatible provider
pub struct OpenAiCompatProvider {
    id: ProviderId,
    client: Client,
    url: String,
    model: String,
    label: String,
    server_key: Option<String>,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("model", &self.model)
            .field("label", &self.label)
            .finish()
    }
}

impl OpenAiCompatProvider {
    /// - `url`: full `chat/completions` endpoint
    /// - `label`: human-readable model label returned with every result
    /// - `server_key`: server-configured secret, used when the caller supplies none
    pub fn new(
        id: ProviderId,
        client: Client,
        url: String,
        model: String,
        label: String,
        server_key: Option<String>,
    ) -> Self {
        Self {
            id,
            client,
            url,
            model,
            label,
            server_key,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        credential: Option<&str>,
    ) -> Result<GenerationResult, LlmError> {
        let key = resolve_credential(self.id, credential, self.server_key.as_deref())?;

        debug!(
            "{} request: model={}, prompt_chars={}",
            self.id,
            self.model,
            prompt.chars().count()
        );

        let response = send_chat_request(
            &self.client,
            self.id,
            &self.url,
            key,
            &ChatRequest::new(&self.model, prompt),
        )
        .await?;

        let api_response: ChatCompletionResponse =
            response.json().await.map_err(|e| LlmError::Decode {
                provider: self.id,
                reason: format!("invalid chat completion JSON: {e}"),
            })?;

        debug!(
            "{} response: choices={}",
            self.id,
            api_response.choices.len()
        );

        Ok(GenerationResult {
            text: completion_text(self.id, api_response)?,
            model: self.label.clone(),
        })
    }
}

/// POST a chat request and turn any non-2xx status into [`LlmError::Backend`]
pub(crate) async fn send_chat_request(
    client: &Client,
    provider: ProviderId,
    url: &str,
    key: &str,
    body: &ChatRequest<'_>,
) -> Result<Response, LlmError> {
    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {}", key))
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| transport_failure(provider, &e))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(LlmError::Backend {
            provider,
            status: Some(status.as_u16()),
            detail: truncate_detail(&error_text),
        });
    }

    Ok(response)
}

/// Map a reqwest send/read error into a status-less (or status-carrying) backend failure
pub(crate) fn transport_failure(provider: ProviderId, err: &reqwest::Error) -> LlmError {
    LlmError::Backend {
        provider,
        status: err.status().map(|s| s.as_u16()),
        detail: err.to_string(),
    }
}

pub(crate) fn truncate_detail(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_ERROR_DETAIL {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(MAX_ERROR_DETAIL).collect();
    cut.push_str("...");
    cut
}

/// Pull `choices[0].message.content` out of a decoded completion
pub(crate) fn completion_text(
    provider: ProviderId,
    response: ChatCompletionResponse,
) -> Result<String, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Decode {
            provider,
            reason: "response had no choices".to_string(),
        })?;

    choice
        .message
        .and_then(|m| m.content)
        .ok_or_else(|| LlmError::Decode {
            provider,
            reason: "first choice carried no message content".to_string(),
        })
}

// ── OpenAI wire types ──

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatRequestMessage<'a>; 1],
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    pub(crate) fn new(model: &'a str, prompt: &'a str) -> Self {
        Self {
            model,
            messages: [ChatRequestMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub(crate) choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatChoice {
    #[serde(default)]
    pub(crate) message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatChoiceMessage {
    #[serde(default)]
    pub(crate) content: Option<String>,
}
