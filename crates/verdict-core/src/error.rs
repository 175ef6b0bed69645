//! Error taxonomy shared by adapters, the dispatcher and the extractor

use thiserror::Error;

use crate::providers::ProviderId;

/// Everything that can go wrong while generating or extracting a reply
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider was selected but neither the caller nor the server supplied a secret
    #[error("missing credential for provider {provider}")]
    MissingCredential { provider: ProviderId },

    /// Non-2xx status, transport failure or deadline exceeded
    #[error("{provider} request failed{}: {detail}", status_suffix(.status))]
    Backend {
        provider: ProviderId,
        status: Option<u16>,
        detail: String,
    },

    /// Backend answered 2xx with a payload we could not map to text
    #[error("{provider} returned an unexpected payload: {reason}")]
    Decode { provider: ProviderId, reason: String },

    #[error("no LLM providers configured; supply an API key or configure one on the server")]
    NoProviderConfigured,

    /// Every repair strategy failed; `raw` keeps the model text for diagnostics
    #[error("model output could not be parsed as JSON")]
    UnparsableOutput { raw: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

impl LlmError {
    /// HTTP status carried by a backend failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Backend { status, .. } => *status,
            _ => None,
        }
    }

    /// Provider the failure is attributed to, if any
    pub fn provider(&self) -> Option<ProviderId> {
        match self {
            Self::MissingCredential { provider }
            | Self::Backend { provider, .. }
            | Self::Decode { provider, .. } => Some(*provider),
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" with status {code}"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_display_includes_status() {
        let err = LlmError::Backend {
            provider: ProviderId::DeepSeek,
            status: Some(503),
            detail: "overloaded".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "deepseek request failed with status 503: overloaded"
        );
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.provider(), Some(ProviderId::DeepSeek));
    }

    #[test]
    fn test_backend_display_without_status() {
        let err = LlmError::Backend {
            provider: ProviderId::Relay,
            status: None,
            detail: "deadline of 60s exceeded".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "relay request failed: deadline of 60s exceeded"
        );
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_unparsable_output_has_no_provider() {
        let err = LlmError::UnparsableOutput {
            raw: "not json".to_string(),
        };
        assert!(err.provider().is_none());
        assert!(err.status().is_none());
    }
}
