//! verdict-core - Provider routing and structured output recovery
//!
//! This crate provides:
//! - Adapters for a server-side relay, Gemini and OpenAI-compatible backends
//! - A table-driven registry that builds the eligible provider pool per request
//! - A dispatcher that picks a random provider and falls back once on failure
//! - An extractor that recovers JSON objects from free-form model replies

pub mod error;
pub mod extract;
pub mod generator;
pub mod providers;
pub mod repair;

// Re-export main types for convenience
pub use error::LlmError;
pub use extract::extract;
pub use generator::{Generator, StructuredReply};
pub use providers::{
    CredentialSet, Dispatcher, EligiblePool, GenerationResult, LlmProvider, ProviderId,
    ProviderSettings,
};
pub use repair::{RepairError, parse_lenient, parse_lenient_prefix};
