//! Provider registry: which backends are usable for a request, built from one table.
//!
//! Adding a backend means adding a row to [`PROVIDER_TABLE`].

use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::LlmError;

use super::google::{DEFAULT_GEMINI_BASE_URL, GoogleProvider};
use super::openai_compat::OpenAiCompatProvider;
use super::relay::RelayProvider;
use super::settings::{BackendSettings, ProviderSettings};
use super::types::{
    CredentialSet, CredentialSource, GenerationResult, LlmProvider, ProviderId,
};

pub const DEFAULT_RELAY_MODEL: &str = "gpt-4o";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// One row of the provider table
struct ProviderSpec {
    id: ProviderId,
    /// Server-side settings that must exist whatever the credential source
    prerequisites: fn(&BackendSettings) -> bool,
    /// Whether a caller-supplied key can make the provider eligible
    accepts_caller_key: bool,
    build: fn(&BackendSettings, &Client) -> Arc<dyn LlmProvider>,
}

/// Registry order is pool order; the relay comes first
const PROVIDER_TABLE: [ProviderSpec; 7] = [
    ProviderSpec {
        id: ProviderId::Relay,
        prerequisites: relay_configured,
        accepts_caller_key: false,
        build: build_relay,
    },
    ProviderSpec {
        id: ProviderId::Gemini,
        prerequisites: no_prerequisites,
        accepts_caller_key: true,
        build: build_gemini,
    },
    ProviderSpec {
        id: ProviderId::DeepSeek,
        prerequisites: no_prerequisites,
        accepts_caller_key: true,
        build: build_deepseek,
    },
    ProviderSpec {
        id: ProviderId::Qwen,
        prerequisites: no_prerequisites,
        accepts_caller_key: true,
        build: build_qwen,
    },
    ProviderSpec {
        id: ProviderId::Doubao,
        prerequisites: doubao_endpoint_configured,
        accepts_caller_key: true,
        build: build_doubao,
    },
    ProviderSpec {
        id: ProviderId::Zhipu,
        prerequisites: no_prerequisites,
        accepts_caller_key: true,
        build: build_zhipu,
    },
    ProviderSpec {
        id: ProviderId::OpenAi,
        prerequisites: no_prerequisites,
        accepts_caller_key: true,
        build: build_openai,
    },
];

impl ProviderSpec {
    fn entry(
        &self,
        settings: &ProviderSettings,
        credentials: &CredentialSet,
        client: &Client,
    ) -> Option<PoolEntry> {
        let backend = settings.backend(self.id);
        if !(self.prerequisites)(backend) {
            return None;
        }
        let caller_key = credentials
            .get(self.id)
            .filter(|_| self.accepts_caller_key);
        if caller_key.is_none() && backend.secret().is_none() {
            return None;
        }
        Some(PoolEntry::new(
            (self.build)(backend, client),
            caller_key.map(str::to_string),
        ))
    }
}

fn no_prerequisites(_: &BackendSettings) -> bool {
    true
}

fn relay_configured(backend: &BackendSettings) -> bool {
    backend.base_url().is_some() && backend.secret().is_some()
}

fn doubao_endpoint_configured(backend: &BackendSettings) -> bool {
    backend.endpoint_id().is_some()
}

/// Fixed endpoint facts for an OpenAI-compatible backend
struct CompatEndpoint {
    id: ProviderId,
    /// Endpoint root; `/chat/completions` is appended
    root: &'static str,
    default_model: &'static str,
    family: &'static str,
    /// Label used while the default model is in effect; otherwise `family (model)`
    default_label: Option<&'static str>,
}

impl CompatEndpoint {
    fn label(&self, model: &str) -> String {
        match self.default_label {
            Some(label) if model == self.default_model => label.to_string(),
            _ => format!("{} ({})", self.family, model),
        }
    }

    fn build(&self, backend: &BackendSettings, client: &Client) -> Arc<dyn LlmProvider> {
        let model = backend.model().unwrap_or(self.default_model).to_string();
        let root = backend.base_url().unwrap_or(self.root).trim_end_matches('/');
        Arc::new(OpenAiCompatProvider::new(
            self.id,
            client.clone(),
            format!("{root}/chat/completions"),
            model.clone(),
            self.label(&model),
            backend.secret().map(str::to_string),
        ))
    }
}

const DEEPSEEK: CompatEndpoint = CompatEndpoint {
    id: ProviderId::DeepSeek,
    root: "https://api.deepseek.com",
    default_model: "deepseek-chat",
    family: "DeepSeek",
    default_label: Some("DeepSeek V3"),
};

const QWEN: CompatEndpoint = CompatEndpoint {
    id: ProviderId::Qwen,
    root: "https://dashscope.aliyuncs.com/compatible-mode/v1",
    default_model: "qwen-plus",
    family: "Qwen",
    default_label: None,
};

const DOUBAO_ROOT: &str = "https://ark.cn-beijing.volces.com/api/v3";

const ZHIPU: CompatEndpoint = CompatEndpoint {
    id: ProviderId::Zhipu,
    root: "https://open.bigmodel.cn/api/paas/v4",
    default_model: "glm-4-plus",
    family: "GLM",
    default_label: Some("GLM-4 Plus"),
};

const OPENAI: CompatEndpoint = CompatEndpoint {
    id: ProviderId::OpenAi,
    root: "https://api.openai.com/v1",
    default_model: "gpt-5",
    family: "OpenAI",
    default_label: None,
};

fn build_relay(backend: &BackendSettings, client: &Client) -> Arc<dyn LlmProvider> {
    Arc::new(RelayProvider::new(
        client.clone(),
        backend.base_url().unwrap_or_default(),
        backend.model().unwrap_or(DEFAULT_RELAY_MODEL).to_string(),
        backend.secret().map(str::to_string),
    ))
}

fn build_gemini(backend: &BackendSettings, client: &Client) -> Arc<dyn LlmProvider> {
    let model = backend.model().unwrap_or(DEFAULT_GEMINI_MODEL).to_string();
    let label = if model == DEFAULT_GEMINI_MODEL {
        "Gemini 2.5 Flash".to_string()
    } else {
        format!("Gemini ({model})")
    };
    Arc::new(GoogleProvider::new(
        client.clone(),
        backend
            .base_url()
            .unwrap_or(DEFAULT_GEMINI_BASE_URL)
            .to_string(),
        model,
        label,
        backend.secret().map(str::to_string),
    ))
}

fn build_deepseek(backend: &BackendSettings, client: &Client) -> Arc<dyn LlmProvider> {
    DEEPSEEK.build(backend, client)
}

fn build_qwen(backend: &BackendSettings, client: &Client) -> Arc<dyn LlmProvider> {
    QWEN.build(backend, client)
}

/// Doubao addresses models by deployment endpoint id, not by model name
fn build_doubao(backend: &BackendSettings, client: &Client) -> Arc<dyn LlmProvider> {
    let root = backend
        .base_url()
        .unwrap_or(DOUBAO_ROOT)
        .trim_end_matches('/');
    Arc::new(OpenAiCompatProvider::new(
        ProviderId::Doubao,
        client.clone(),
        format!("{root}/chat/completions"),
        backend.endpoint_id().unwrap_or_default().to_string(),
        "Doubao".to_string(),
        backend.secret().map(str::to_string),
    ))
}

fn build_zhipu(backend: &BackendSettings, client: &Client) -> Arc<dyn LlmProvider> {
    ZHIPU.build(backend, client)
}

fn build_openai(backend: &BackendSettings, client: &Client) -> Arc<dyn LlmProvider> {
    OPENAI.build(backend, client)
}

/// A usable provider plus the caller's key for it, if one was supplied
#[derive(Clone)]
pub struct PoolEntry {
    provider: Arc<dyn LlmProvider>,
    caller_credential: Option<String>,
}

impl std::fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEntry")
            .field("id", &self.id())
            .field("model", &self.provider.model())
            .field("source", &self.source())
            .finish()
    }
}

impl PoolEntry {
    pub fn new(provider: Arc<dyn LlmProvider>, caller_credential: Option<String>) -> Self {
        Self {
            provider,
            caller_credential,
        }
    }

    pub fn id(&self) -> ProviderId {
        self.provider.id()
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    pub fn source(&self) -> CredentialSource {
        if self.caller_credential.is_some() {
            CredentialSource::Caller
        } else {
            CredentialSource::Server
        }
    }

    /// Invoke the provider with this entry's caller credential
    pub async fn invoke(&self, prompt: &str) -> Result<GenerationResult, LlmError> {
        self.provider
            .generate(prompt, self.caller_credential.as_deref())
            .await
    }
}

/// Providers usable for the current request. Never empty.
#[derive(Debug, Clone)]
pub struct EligiblePool {
    entries: Vec<PoolEntry>,
}

impl EligiblePool {
    pub fn new(entries: Vec<PoolEntry>) -> Result<Self, LlmError> {
        if entries.is_empty() {
            return Err(LlmError::NoProviderConfigured);
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        self.entries.iter().map(PoolEntry::id).collect()
    }

    /// Members other than `id`, in pool order
    pub fn without(&self, id: ProviderId) -> Vec<&PoolEntry> {
        self.entries.iter().filter(|e| e.id() != id).collect()
    }
}

/// Build the eligible pool for one request.
///
/// A provider is eligible when its server prerequisites hold and either the server or the caller
/// has a key for it. If any eligible provider carries a caller key, only those are kept, which
/// lets a caller force a backend by supplying just that key.
pub fn build_pool(
    settings: &ProviderSettings,
    credentials: &CredentialSet,
    client: &Client,
) -> Result<EligiblePool, LlmError> {
    let eligible: Vec<PoolEntry> = PROVIDER_TABLE
        .iter()
        .filter_map(|spec| spec.entry(settings, credentials, client))
        .collect();

    if eligible.is_empty() {
        warn!(
            "No eligible LLM providers (caller keys for: {:?})",
            credentials.providers().collect::<Vec<_>>()
        );
        return Err(LlmError::NoProviderConfigured);
    }

    let caller_keyed = eligible
        .iter()
        .any(|e| e.source() == CredentialSource::Caller);
    let entries: Vec<PoolEntry> = if caller_keyed {
        eligible
            .into_iter()
            .filter(|e| e.source() == CredentialSource::Caller)
            .collect()
    } else {
        eligible
    };

    debug!(
        "Eligible pool: {:?} (narrowed to caller keys: {})",
        entries.iter().map(PoolEntry::id).collect::<Vec<_>>(),
        caller_keyed
    );

    EligiblePool::new(entries)
}
