//! Relay provider: a server-configured OpenAI-compatible gateway.
//!
//! The relay is the zero-configuration default path. It only ever uses the server secret, and
//! some relays force `text/event-stream` replies even when `stream: false` is requested, so the
//! body is sniffed and parsed either way.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::debug;

use crate::error::LlmError;

use super::openai_compat::{
    ChatChoiceMessage, ChatCompletionResponse, ChatRequest, completion_text, send_chat_request,
    transport_failure,
};
use super::types::{GenerationResult, LlmProvider, ProviderId, resolve_credential};

const DONE_SENTINEL: &str = "[DONE]";

pub struct RelayProvider {
    client: Client,
    url: String,
    model: String,
    label: String,
    server_key: Option<String>,
}

impl std::fmt::Debug for RelayProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayProvider")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

impl RelayProvider {
    pub fn new(client: Client, base_url: &str, model: String, server_key: Option<String>) -> Self {
        Self {
            client,
            url: chat_completions_url(base_url),
            label: format!("Relay ({model})"),
            model,
            server_key,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// `https://host/` → `https://host/v1/chat/completions`, `https://host/v1/` → `https://host/v1/chat/completions`
pub fn chat_completions_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

/// Whether a reply body should be read as `data:` lines rather than a JSON document
pub fn is_event_stream(content_type: Option<&str>, body: &str) -> bool {
    content_type.is_some_and(|ct| ct.contains("text/event-stream"))
        || body.trim_start().starts_with("data:")
}

/// Concatenate the content fragments of an event stream, in order, and trim the result.
///
/// Each `data:` line holds a chunk with either `delta.content` or `message.content`;
/// `data: [DONE]` ends the stream. Lines that fail to parse are skipped.
pub fn parse_event_stream(body: &str) -> String {
    let mut content = String::new();
    for line in body.lines() {
        let Some(payload) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            break;
        }
        let Ok(chunk) = serde_json::from_str::<StreamChunk>(payload) else {
            continue;
        };
        let Some(choice) = chunk.choices.into_iter().next() else {
            continue;
        };
        if let Some(fragment) = choice.delta.and_then(|d| d.content) {
            content.push_str(&fragment);
        }
        if let Some(full) = choice.message.and_then(|m| m.content) {
            content.push_str(&full);
        }
    }
    content.trim().to_string()
}

#[async_trait]
impl LlmProvider for RelayProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Relay
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        _credential: Option<&str>,
    ) -> Result<GenerationResult, LlmError> {
        let key = resolve_credential(ProviderId::Relay, None, self.server_key.as_deref())?;

        debug!("Relay request: url={}, model={}", self.url, self.model);

        let response = send_chat_request(
            &self.client,
            ProviderId::Relay,
            &self.url,
            key,
            &ChatRequest::new(&self.model, prompt),
        )
        .await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| transport_failure(ProviderId::Relay, &e))?;

        let text = if is_event_stream(content_type.as_deref(), &body) {
            debug!("Relay replied with an event stream ({} bytes)", body.len());
            let text = parse_event_stream(&body);
            if text.is_empty() {
                return Err(LlmError::Decode {
                    provider: ProviderId::Relay,
                    reason: "event stream carried no content".to_string(),
                });
            }
            text
        } else {
            let api_response: ChatCompletionResponse =
                serde_json::from_str(&body).map_err(|e| LlmError::Decode {
                    provider: ProviderId::Relay,
                    reason: format!("invalid chat completion JSON: {e}"),
                })?;
            completion_text(ProviderId::Relay, api_response)?
        };

        Ok(GenerationResult {
            text,
            model: self.label.clone(),
        })
    }
}

// ── Stream wire types ──

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_chat_completions_url() {
        assert_eq!(
            chat_completions_url("https://relay.example.com"),
            "https://relay.example.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("https://relay.example.com///"),
            "https://relay.example.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("https://relay.example.com/v1/"),
            "https://relay.example.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("https://relay.example.com/openai/v1"),
            "https://relay.example.com/openai/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_event_stream_concatenates_deltas() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\
                    data: [DONE]\n";
        assert_eq!(parse_event_stream(body), "Hello");
    }

    #[test]
    fn test_parse_event_stream_skips_malformed_and_stops_at_done() {
        let body = "\n: keep-alive\n\
                    data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
                    data: {not json\n\
                    data:{\"choices\":[{\"delta\":{\"content\":\"  ok \"}}]}\n\
                    data: {\"choices\":[]}\n\
                    data: [DONE]\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"after\"}}]}\n";
        assert_eq!(parse_event_stream(body), "ok");
    }

    #[test]
    fn test_parse_event_stream_full_message_chunk() {
        let body = "data: {\"choices\":[{\"message\":{\"content\":\"whole reply\"}}]}\n\ndata: [DONE]";
        assert_eq!(parse_event_stream(body), "whole reply");
    }

    #[test]
    fn test_is_event_stream_detection() {
        assert!(is_event_stream(Some("text/event-stream; charset=utf-8"), "{}"));
        assert!(is_event_stream(Some("application/json"), "  \ndata: {}"));
        assert!(!is_event_stream(Some("application/json"), "{\"choices\":[]}"));
        assert!(!is_event_stream(None, ""));
    }

    #[tokio::test]
    async fn test_generate_parses_forced_event_stream() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                    data: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer relay-key"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let relay = RelayProvider::new(
            Client::new(),
            &server.uri(),
            "gpt-4o".to_string(),
            Some("relay-key".to_string()),
        );
        let result = relay.generate("hi", Some("ignored-caller-key")).await.unwrap();
        assert_eq!(result.text, "Hello");
        assert_eq!(result.model, "Relay (gpt-4o)");
    }

    #[tokio::test]
    async fn test_generate_plain_json_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "plain"}}]
            })))
            .mount(&server)
            .await;

        let relay = RelayProvider::new(
            Client::new(),
            &format!("{}/v1", server.uri()),
            "gpt-4o-mini".to_string(),
            Some("relay-key".to_string()),
        );
        let result = relay.generate("hi", None).await.unwrap();
        assert_eq!(result.text, "plain");
        assert_eq!(result.model, "Relay (gpt-4o-mini)");
    }

    #[tokio::test]
    async fn test_generate_empty_stream_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("data: [DONE]\n", "text/event-stream"))
            .mount(&server)
            .await;

        let relay = RelayProvider::new(Client::new(), &server.uri(), "gpt-4o".to_string(), Some("k".to_string()));
        let err = relay.generate("hi", None).await.unwrap_err();
        assert!(matches!(err, LlmError::Decode { provider: ProviderId::Relay, .. }));
    }

    #[tokio::test]
    async fn test_generate_without_server_key_fails_before_network() {
        let relay = RelayProvider::new(
            Client::new(),
            "http://127.0.0.1:9",
            "gpt-4o".to_string(),
            None,
        );
        let err = relay.generate("hi", Some("caller-key")).await.unwrap_err();
        assert!(matches!(err, LlmError::MissingCredential { provider: ProviderId::Relay }));
    }
}
