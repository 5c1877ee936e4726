use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Root configuration for crmbot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub upload: UploadConfig,
    pub query: QueryConfig,
    pub proposal: ProposalConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub model: String,
    /// Maximum agent-loop iterations per turn.
    pub max_steps: u32,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_steps: 5,
            max_tokens: 4096,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadConfig {
    /// Payloads above this many base64 bytes take the chunked path.
    pub chunk_threshold: usize,
    /// Maximum size of a single chunk.
    pub max_chunk_size: usize,
    /// Sessions still collecting after this many seconds are swept.
    pub session_ttl_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: 1024 * 1024,
            max_chunk_size: 256 * 1024,
            session_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProposalConfig {
    /// Timeout per bulk dispatch during proposal execution.
    pub execution_timeout_secs: u64,
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_base: Option<String>,
}

impl Config {
    /// Default config file location: `~/.crmbot/config.json`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".crmbot")
            .join("config.json")
    }

    /// Load config from a file, falling back to defaults when the file
    /// does not exist. API keys may be supplied via `OPENAI_API_KEY`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(|p| p.to_path_buf()).unwrap_or_else(Self::default_path);

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))?;
            serde_json::from_str(&content)?
        } else {
            Self::default()
        };

        if config.provider.api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                config.provider.api_key = key;
            }
        }

        Ok(config)
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        if self.provider.api_key.is_empty() {
            Err(ConfigError::NoApiKey)
        } else {
            Ok(&self.provider.api_key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agent.max_steps, 5);
        assert_eq!(config.query.default_limit, 100);
        assert_eq!(config.query.max_limit, 200);
        assert_eq!(config.upload.chunk_threshold, 1024 * 1024);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"agent": {"model": "gpt-4o-mini", "maxSteps": 3}, "query": {"maxLimit": 50}}"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.agent.model, "gpt-4o-mini");
        assert_eq!(config.agent.max_steps, 3);
        assert_eq!(config.query.max_limit, 50);
        // Untouched sections keep defaults
        assert_eq!(config.upload.session_ttl_secs, 600);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(config.agent.max_steps, 5);
    }

    #[test]
    fn test_api_key_missing() {
        let config = Config::default();
        if std::env::var("OPENAI_API_KEY").is_err() {
            assert!(config.api_key().is_err());
        }
    }
}
