//! Request-level entry point: build the pool, dispatch, optionally extract JSON

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::error::LlmError;
use crate::extract::extract;
use crate::providers::{
    CredentialSet, Dispatcher, EligiblePool, GenerationResult, ProviderSettings, build_pool,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A model reply reduced to its JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredReply {
    pub value: Value,
    /// Label of the model that produced the reply
    pub model: String,
}

impl StructuredReply {
    /// The extracted object with `"model"` set to the model label.
    /// Non-object payloads are wrapped as `{"value": ..., "model": ...}`.
    pub fn into_json(self) -> Value {
        match self.value {
            Value::Object(mut map) => {
                map.insert("model".to_string(), Value::String(self.model));
                Value::Object(map)
            }
            other => serde_json::json!({ "value": other, "model": self.model }),
        }
    }
}

/// Routes prompts across the configured backends.
///
/// Holds the read-only server settings and one HTTP client whose connection pool lives as long
/// as the generator. Provider adapters are rebuilt for every request from the caller's
/// credentials.
#[derive(Debug, Clone)]
pub struct Generator {
    settings: ProviderSettings,
    client: Client,
    dispatcher: Dispatcher,
}

impl Generator {
    pub fn new(settings: ProviderSettings) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(LlmError::HttpClient)?;
        Ok(Self::with_client(settings, client))
    }

    pub fn with_client(settings: ProviderSettings, client: Client) -> Self {
        let dispatcher = Dispatcher::new(settings.timeout());
        Self {
            settings,
            client,
            dispatcher,
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Eligible providers for a request carrying `credentials`
    pub fn pool(&self, credentials: &CredentialSet) -> Result<EligiblePool, LlmError> {
        build_pool(&self.settings, credentials, &self.client)
    }

    /// Generate text with one random provider, falling back once on failure
    pub async fn generate(
        &self,
        prompt: &str,
        credentials: &CredentialSet,
    ) -> Result<GenerationResult, LlmError> {
        let pool = self.pool(credentials)?;
        self.dispatcher.dispatch(&pool, prompt).await
    }

    /// [`Self::generate`] followed by JSON extraction of the reply
    pub async fn generate_structured(
        &self,
        prompt: &str,
        credentials: &CredentialSet,
    ) -> Result<StructuredReply, LlmError> {
        let result = self.generate(prompt, credentials).await?;
        let value = extract(&result.text)?;
        Ok(StructuredReply {
            value,
            model: result.model,
        })
    }
}
