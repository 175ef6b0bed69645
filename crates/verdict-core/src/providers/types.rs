//! Provider-agnostic types for multi-backend generation

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::LlmError;

/// Closed set of backends the registry knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Relay,
    Gemini,
    DeepSeek,
    Qwen,
    Doubao,
    Zhipu,
    OpenAi,
}

impl ProviderId {
    pub const ALL: [ProviderId; 7] = [
        Self::Relay,
        Self::Gemini,
        Self::DeepSeek,
        Self::Qwen,
        Self::Doubao,
        Self::Zhipu,
        Self::OpenAi,
    ];

    /// Stable lowercase identifier used in logs and config sections
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Gemini => "gemini",
            Self::DeepSeek => "deepseek",
            Self::Qwen => "qwen",
            Self::Doubao => "doubao",
            Self::Zhipu => "zhipu",
            Self::OpenAi => "openai",
        }
    }

    /// Key under which callers submit their own secret for this backend.
    /// The relay is server-only and has none.
    pub fn caller_key(&self) -> Option<&'static str> {
        match self {
            Self::Relay => None,
            Self::Gemini => Some("google"),
            Self::DeepSeek => Some("deepseek"),
            Self::Qwen => Some("qwen"),
            Self::Doubao => Some("doubao"),
            Self::Zhipu => Some("zhipu"),
            Self::OpenAi => Some("chatgpt"),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == lower || id.caller_key() == Some(lower.as_str()))
            .ok_or_else(|| format!("unknown provider '{s}'"))
    }
}

/// Secrets supplied by the caller for this request only
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    keys: BTreeMap<ProviderId, String>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; blank secrets are ignored
    pub fn with(mut self, provider: ProviderId, secret: impl Into<String>) -> Self {
        self.insert(provider, secret);
        self
    }

    /// Blank secrets are ignored, as are keys for server-only providers such as the relay
    pub fn insert(&mut self, provider: ProviderId, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return;
        }
        if provider.caller_key().is_none() {
            warn!("Ignoring caller key for {}: its key is server-only", provider);
            return;
        }
        self.keys.insert(provider, secret);
    }

    pub fn get(&self, provider: ProviderId) -> Option<&str> {
        self.keys.get(&provider).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn providers(&self) -> impl Iterator<Item = ProviderId> + '_ {
        self.keys.keys().copied()
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.keys.iter().map(|(id, key)| (id, mask_secret(key))))
            .finish()
    }
}

/// Accepts `{"google": "...", "chatgpt": "...", ...}`; unknown names and nulls are ignored
impl<'de> Deserialize<'de> for CredentialSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Option<String>>::deserialize(deserializer)?;
        let mut set = Self::new();
        for (name, secret) in raw {
            if let (Ok(id), Some(secret)) = (name.parse::<ProviderId>(), secret) {
                set.insert(id, secret);
            }
        }
        Ok(set)
    }
}

/// Where the secret used for an attempt came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Caller,
    Server,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller => f.write_str("user key"),
            Self::Server => f.write_str("server key"),
        }
    }
}

/// Canonical result of one successful generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    /// Human-readable model label, e.g. "DeepSeek V3"
    pub model: String,
}

/// Trait that all backend adapters implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Model identifier sent on the wire
    fn model(&self) -> &str;

    /// Issue exactly one completion request. `credential` is the caller's secret and wins over
    /// the server-configured one.
    async fn generate(
        &self,
        prompt: &str,
        credential: Option<&str>,
    ) -> Result<GenerationResult, LlmError>;
}

/// Caller credential over server credential, blank values count as absent
pub(crate) fn resolve_credential<'a>(
    provider: ProviderId,
    caller: Option<&'a str>,
    server: Option<&'a str>,
) -> Result<&'a str, LlmError> {
    caller
        .filter(|k| !k.trim().is_empty())
        .or(server.filter(|k| !k.trim().is_empty()))
        .ok_or(LlmError::MissingCredential { provider })
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_parse_accepts_caller_keys() {
        assert_eq!("google".parse::<ProviderId>().unwrap(), ProviderId::Gemini);
        assert_eq!("chatgpt".parse::<ProviderId>().unwrap(), ProviderId::OpenAi);
        assert_eq!("OpenAI".parse::<ProviderId>().unwrap(), ProviderId::OpenAi);
        assert_eq!("relay".parse::<ProviderId>().unwrap(), ProviderId::Relay);
        assert!("mistral".parse::<ProviderId>().is_err());
    }

    #[test]
    fn test_credential_set_ignores_blank_secrets() {
        let creds = CredentialSet::new()
            .with(ProviderId::DeepSeek, "sk-deep")
            .with(ProviderId::Qwen, "   ");
        assert_eq!(creds.get(ProviderId::DeepSeek), Some("sk-deep"));
        assert_eq!(creds.get(ProviderId::Qwen), None);
        assert_eq!(creds.providers().collect::<Vec<_>>(), vec![ProviderId::DeepSeek]);
    }

    #[test]
    fn test_credential_set_deserialize_caller_shape() {
        let creds: CredentialSet = serde_json::from_value(serde_json::json!({
            "google": "g-key-123456",
            "chatgpt": "sk-openai-123",
            "zhipu": null,
            "unknown": "ignored",
            "qwen": ""
        }))
        .unwrap();
        assert_eq!(
            creds.providers().collect::<Vec<_>>(),
            vec![ProviderId::Gemini, ProviderId::OpenAi]
        );
    }

    #[test]
    fn test_credential_set_drops_server_only_keys() {
        let creds = CredentialSet::new().with(ProviderId::Relay, "caller-relay");
        assert!(creds.is_empty());

        let creds: CredentialSet = serde_json::from_value(serde_json::json!({
            "relay": "caller-relay",
            "deepseek": "sk-deep"
        }))
        .unwrap();
        assert_eq!(
            creds.providers().collect::<Vec<_>>(),
            vec![ProviderId::DeepSeek]
        );
    }

    #[test]
    fn test_credential_set_debug_hides_secrets() {
        let creds = CredentialSet::new().with(ProviderId::Zhipu, "zhipu-super-secret");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("zhipu-super-secret"));
        assert!(debug.contains("zhi...cret"));
    }

    #[test]
    fn test_resolve_credential_prefers_caller() {
        assert_eq!(
            resolve_credential(ProviderId::Qwen, Some("user"), Some("server")).unwrap(),
            "user"
        );
        assert_eq!(
            resolve_credential(ProviderId::Qwen, Some(""), Some("server")).unwrap(),
            "server"
        );
        assert!(matches!(
            resolve_credential(ProviderId::Qwen, None, None),
            Err(LlmError::MissingCredential {
                provider: ProviderId::Qwen
            })
        ));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-abcdefgh1234"), "sk-...1234");
    }

    #[test]
    fn test_credential_source_display() {
        assert_eq!(CredentialSource::Caller.to_string(), "user key");
        assert_eq!(CredentialSource::Server.to_string(), "server key");
    }
}
