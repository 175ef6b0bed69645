//! Google Gemini provider (native `generateContent` API)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LlmError;

use super::openai_compat::{transport_failure, truncate_detail};
use super::types::{GenerationResult, LlmProvider, ProviderId, resolve_credential};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini provider
pub struct GoogleProvider {
    client: Client,
    base_url: String,
    model: String,
    label: String,
    server_key: Option<String>,
}

impl std::fmt::Debug for GoogleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("label", &self.label)
            .finish()
    }
}

impl GoogleProvider {
    pub fn new(
        client: Client,
        base_url: String,
        model: String,
        label: String,
        server_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            label,
            server_key,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Concatenate every text part of the first candidate
    fn from_gemini_response(resp: GeminiApiResponse) -> Result<String, LlmError> {
        let Some(candidate) = resp.candidates.into_iter().next() else {
            let reason = match resp.prompt_feedback.and_then(|f| f.block_reason) {
                Some(block) => format!("response had no candidates (blocked: {block})"),
                None => "response had no candidates".to_string(),
            };
            return Err(LlmError::Decode {
                provider: ProviderId::Gemini,
                reason,
            });
        };

        let parts: Vec<String> = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect();

        if parts.is_empty() {
            return Err(LlmError::Decode {
                provider: ProviderId::Gemini,
                reason: format!(
                    "first candidate had no text parts (finish_reason={})",
                    candidate.finish_reason.as_deref().unwrap_or("unknown")
                ),
            });
        }

        Ok(parts.concat())
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        credential: Option<&str>,
    ) -> Result<GenerationResult, LlmError> {
        let key = resolve_credential(ProviderId::Gemini, credential, self.server_key.as_deref())?;

        let body = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
        };

        debug!("Gemini request: model={}", self.model);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_failure(ProviderId::Gemini, &e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Backend {
                provider: ProviderId::Gemini,
                status: Some(status.as_u16()),
                detail: truncate_detail(&error_text),
            });
        }

        let api_response: GeminiApiResponse =
            response.json().await.map_err(|e| LlmError::Decode {
                provider: ProviderId::Gemini,
                reason: format!("invalid generateContent JSON: {e}"),
            })?;

        debug!(
            "Gemini response: candidates={}",
            api_response.candidates.len()
        );

        Ok(GenerationResult {
            text: Self::from_gemini_response(api_response)?,
            model: self.label.clone(),
        })
    }
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}
