//! Server-side provider configuration, read-only after startup

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::types::{ProviderId, mask_secret};

/// Deadline applied to every provider invocation unless overridden
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Environment variable overriding the per-invocation deadline
pub const TIMEOUT_ENV_VAR: &str = "VERDICT_TIMEOUT_SECS";

/// Per-backend settings. Blank strings behave like absent values.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub api_key: Option<String>,
    /// Overrides the backend's default model identifier
    pub model: Option<String>,
    /// Overrides the backend's endpoint root
    pub base_url: Option<String>,
    /// Deployment id for backends that address models by endpoint (Doubao)
    pub endpoint_id: Option<String>,
}

impl std::fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSettings")
            .field("api_key", &self.api_key.as_deref().map(mask_secret))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("endpoint_id", &self.endpoint_id)
            .finish()
    }
}

impl BackendSettings {
    pub fn secret(&self) -> Option<&str> {
        non_blank(&self.api_key)
    }

    pub fn model(&self) -> Option<&str> {
        non_blank(&self.model)
    }

    pub fn base_url(&self) -> Option<&str> {
        non_blank(&self.base_url)
    }

    pub fn endpoint_id(&self) -> Option<&str> {
        non_blank(&self.endpoint_id)
    }

    fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::ApiKey => &mut self.api_key,
            Field::Model => &mut self.model,
            Field::BaseUrl => &mut self.base_url,
            Field::EndpointId => &mut self.endpoint_id,
        };
        *slot = Some(value);
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Settings for every known backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub timeout_secs: u64,
    pub relay: BackendSettings,
    pub gemini: BackendSettings,
    pub deepseek: BackendSettings,
    pub qwen: BackendSettings,
    pub doubao: BackendSettings,
    pub zhipu: BackendSettings,
    pub openai: BackendSettings,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            relay: BackendSettings::default(),
            gemini: BackendSettings::default(),
            deepseek: BackendSettings::default(),
            qwen: BackendSettings::default(),
            doubao: BackendSettings::default(),
            zhipu: BackendSettings::default(),
            openai: BackendSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    ApiKey,
    Model,
    BaseUrl,
    EndpointId,
}

/// Environment variables recognised by [`ProviderSettings::from_env`]
const ENV_BINDINGS: &[(ProviderId, Field, &str)] = &[
    (ProviderId::Relay, Field::BaseUrl, "RELAY_BASE_URL"),
    (ProviderId::Relay, Field::ApiKey, "RELAY_API_KEY"),
    (ProviderId::Relay, Field::Model, "RELAY_MODEL"),
    (ProviderId::Gemini, Field::ApiKey, "GOOGLE_API_KEY"),
    (ProviderId::DeepSeek, Field::ApiKey, "DEEPSEEK_API_KEY"),
    (ProviderId::Qwen, Field::ApiKey, "DASHSCOPE_API_KEY"),
    (ProviderId::Qwen, Field::Model, "DASHSCOPE_MODEL_ID"),
    (ProviderId::Doubao, Field::ApiKey, "DOUBAO_API_KEY"),
    (ProviderId::Doubao, Field::EndpointId, "DOUBAO_ENDPOINT_ID_TEXT"),
    (ProviderId::Zhipu, Field::ApiKey, "ZHIPU_API_KEY"),
    (ProviderId::OpenAi, Field::ApiKey, "OPENAI_API_KEY"),
    (ProviderId::OpenAi, Field::Model, "OPENAI_MODEL_ID"),
];

impl ProviderSettings {
    pub fn backend(&self, id: ProviderId) -> &BackendSettings {
        match id {
            ProviderId::Relay => &self.relay,
            ProviderId::Gemini => &self.gemini,
            ProviderId::DeepSeek => &self.deepseek,
            ProviderId::Qwen => &self.qwen,
            ProviderId::Doubao => &self.doubao,
            ProviderId::Zhipu => &self.zhipu,
            ProviderId::OpenAi => &self.openai,
        }
    }

    pub fn backend_mut(&mut self, id: ProviderId) -> &mut BackendSettings {
        match id {
            ProviderId::Relay => &mut self.relay,
            ProviderId::Gemini => &mut self.gemini,
            ProviderId::DeepSeek => &mut self.deepseek,
            ProviderId::Qwen => &mut self.qwen,
            ProviderId::Doubao => &mut self.doubao,
            ProviderId::Zhipu => &mut self.zhipu,
            ProviderId::OpenAi => &mut self.openai,
        }
    }

    /// Per-invocation deadline; zero falls back to the default
    pub fn timeout(&self) -> Duration {
        if self.timeout_secs == 0 {
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }

    /// Build settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        for (id, field, name) in ENV_BINDINGS {
            if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
                settings.backend_mut(*id).set(*field, value);
            }
        }
        if let Some(secs) = lookup(TIMEOUT_ENV_VAR).and_then(|v| v.trim().parse().ok()) {
            settings.timeout_secs = secs;
        }
        settings
    }

    /// Names of every environment variable the settings can be read from
    pub fn env_var_names() -> impl Iterator<Item = &'static str> {
        ENV_BINDINGS
            .iter()
            .map(|(_, _, name)| *name)
            .chain(std::iter::once(TIMEOUT_ENV_VAR))
    }
}
