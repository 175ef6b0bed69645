//! Multi-provider LLM layer
//!
//! Supports a server-side relay, Google Gemini and the OpenAI-compatible backends (DeepSeek,
//! Qwen, Doubao, Zhipu, OpenAI). Adapters implement the [`LlmProvider`] trait, the registry
//! builds an [`EligiblePool`] per request and the [`Dispatcher`] picks from it with one fallback.

pub mod google;
pub mod openai_compat;
pub mod registry;
pub mod relay;
pub mod router;
pub mod settings;
pub mod types;

pub use registry::{EligiblePool, PoolEntry, build_pool};
pub use router::Dispatcher;
pub use settings::{BackendSettings, ProviderSettings};
pub use types::{
    CredentialSet, CredentialSource, GenerationResult, LlmProvider, ProviderId, mask_secret,
};
