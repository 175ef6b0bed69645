use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use verdict_core::providers::settings::TIMEOUT_ENV_VAR;
use verdict_core::{ProviderId, ProviderSettings};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictConfig {
    #[serde(default)]
    pub providers: ProviderSettings,
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".verdict")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

impl VerdictConfig {
    /// Load the config file, or read provider settings from the environment when no file was
    /// requested and none exists at the default location.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path.clone().unwrap_or_else(default_config_path);

        if custom_path.is_none() && !path.exists() {
            debug!(
                "No config at {}, reading provider settings from the environment",
                path.display()
            );
            return Ok(Self {
                providers: ProviderSettings::from_env(),
            });
        }

        Self::load_from(&path, |name| std::env::var(name).ok())
    }

    fn load_from(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Refuse group/world-readable config files (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow::anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `verdict init` first.",
                path.display()
            )
        })?;

        let raw: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        for id in hardcoded_keys(&raw) {
            warn!(
                "{} API key is hardcoded in config file. For security, use environment variables: api_key = \"${{VAR}}\"",
                id
            );
        }

        // Expand environment variables before the real parse
        let expanded = expand_env_vars(&content, &lookup);
        let mut config: Self = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        if !sets_timeout(&content) {
            if let Some(secs) = lookup(TIMEOUT_ENV_VAR).and_then(|v| v.trim().parse().ok()) {
                config.providers.timeout_secs = secs;
            }
        }

        Ok(config)
    }
}

/// Providers whose `api_key` is a literal value rather than a `${VAR}` reference
fn hardcoded_keys(raw: &VerdictConfig) -> Vec<ProviderId> {
    ProviderId::ALL
        .into_iter()
        .filter(|id| {
            raw.providers
                .backend(*id)
                .secret()
                .is_some_and(|key| !key.contains("${"))
        })
        .collect()
}

/// Whether the file sets `providers.timeout_secs` itself; otherwise the env var applies
fn sets_timeout(content: &str) -> bool {
    toml::from_str::<toml::Table>(content).is_ok_and(|table| {
        table
            .get("providers")
            .and_then(|providers| providers.get("timeout_secs"))
            .is_some()
    })
}

/// Escape a value for the inside of a TOML basic string
fn escape_toml_basic(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Names that may be expanded in config files: the provider variables plus a few basics.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
fn is_allowed_env_var(name: &str) -> bool {
    matches!(name, "HOME" | "USER") || ProviderSettings::env_var_names().any(|n| n == name)
}

/// Values are escaped for TOML basic strings, the form `"${VAR}"` placeholders take.
fn expand_env_vars(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !is_allowed_env_var(&var_name) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = escape_toml_basic(&lookup(&var_name).unwrap_or_default());
        let value_len = value.len();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value_len; // Skip past the expanded value
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600)).unwrap();
        }
        file
    }

    #[test]
    fn test_expand_env_vars_allowlisted() {
        let lookup = lookup_from(&[("DEEPSEEK_API_KEY", "sk-ds"), ("SECRET_THING", "nope")]);
        assert_eq!(
            expand_env_vars("key = \"${DEEPSEEK_API_KEY}\"", &lookup),
            "key = \"sk-ds\""
        );
        assert_eq!(
            expand_env_vars("key = \"${SECRET_THING}\"", &lookup),
            "key = \"${SECRET_THING}\""
        );
        assert_eq!(expand_env_vars("a ${RELAY_API_KEY} b", &lookup), "a  b");
        assert_eq!(expand_env_vars("unterminated ${HOME", &lookup), "unterminated ${HOME");
    }

    #[test]
    fn test_expanded_secret_with_quotes_and_backslashes() {
        let file = write_config(
            r#"
[providers.zhipu]
api_key = "${ZHIPU_API_KEY}"
"#,
        );
        let secret = r#"ab"c\d\n"#;
        let config =
            VerdictConfig::load_from(file.path(), lookup_from(&[("ZHIPU_API_KEY", secret)]))
                .unwrap();
        assert_eq!(config.providers.zhipu.secret(), Some(secret));
    }

    #[test]
    fn test_timeout_env_applies_only_when_file_omits_it() {
        let lookup = lookup_from(&[("VERDICT_TIMEOUT_SECS", "15")]);

        let file = write_config("[providers.deepseek]\napi_key = \"${DEEPSEEK_API_KEY}\"\n");
        let config = VerdictConfig::load_from(file.path(), &lookup).unwrap();
        assert_eq!(config.providers.timeout_secs, 15);

        let file = write_config(include_str!("../../../config/default.toml"));
        let config = VerdictConfig::load_from(file.path(), &lookup).unwrap();
        assert_eq!(config.providers.timeout_secs, 15);

        let file = write_config("[providers]\ntimeout_secs = 30\n");
        let config = VerdictConfig::load_from(file.path(), &lookup).unwrap();
        assert_eq!(config.providers.timeout_secs, 30);
    }

    #[test]
    fn test_load_from_file_with_expansion() {
        let file = write_config(
            r#"
[providers]
timeout_secs = 30

[providers.relay]
base_url = "https://relay.example.com"
api_key = "${RELAY_API_KEY}"
model = "gpt-4o-mini"

[providers.doubao]
api_key = "${DOUBAO_API_KEY}"
endpoint_id = "ep-123"
"#,
        );
        let config = VerdictConfig::load_from(
            file.path(),
            lookup_from(&[("RELAY_API_KEY", "relay-secret")]),
        )
        .unwrap();
        assert_eq!(config.providers.timeout_secs, 30);
        assert_eq!(config.providers.relay.secret(), Some("relay-secret"));
        assert_eq!(config.providers.relay.model(), Some("gpt-4o-mini"));
        assert_eq!(config.providers.doubao.secret(), None);
        assert_eq!(config.providers.doubao.endpoint_id(), Some("ep-123"));
    }

    #[test]
    fn test_empty_file_is_default_config() {
        let file = write_config("");
        let config = VerdictConfig::load_from(file.path(), |_| None).unwrap();
        assert_eq!(config, VerdictConfig::default());
    }

    #[test]
    fn test_missing_custom_path_is_an_error() {
        let path = Some(PathBuf::from("/definitely/not/here/verdict.toml"));
        assert!(VerdictConfig::load(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_permissive_config_is_refused() {
        use std::os::unix::fs::PermissionsExt;
        let file = write_config("[providers]\n");
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = VerdictConfig::load_from(file.path(), |_| None).unwrap_err();
        assert!(err.to_string().contains("overly permissive"));
    }

    #[test]
    fn test_hardcoded_keys_detected() {
        let raw: VerdictConfig = toml::from_str(
            r#"
[providers.openai]
api_key = "sk-literal"

[providers.zhipu]
api_key = "${ZHIPU_API_KEY}"
"#,
        )
        .unwrap();
        assert_eq!(hardcoded_keys(&raw), vec![ProviderId::OpenAi]);
    }

    #[test]
    fn test_bundled_default_config_parses() {
        let config: VerdictConfig =
            toml::from_str(include_str!("../../../config/default.toml")).unwrap();
        assert!(hardcoded_keys(&config).is_empty());
    }
}
