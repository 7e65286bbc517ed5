//! Run configuration.
//!
//! Loaded once at startup from a TOML file and handed to each component by
//! reference. Nothing mutates it afterwards.

use crate::error::{LitscoutError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default Google Scholar URL
pub const DEFAULT_SCHOLAR_URL: &str = "https://scholar.google.com";

/// Default local Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Largest accepted `retry.base_delay_secs`
pub const MAX_BASE_DELAY_SECS: f64 = 3600.0;

/// Smallest accepted `llm.calls_per_second` (one call per hour)
pub const MIN_CALLS_PER_SECOND: f64 = 1.0 / 3600.0;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub search: SearchConfig,
    pub llm: LlmConfig,
    pub zotero: ZoteroConfig,
    pub retry: RetryConfig,
}

/// Primary search source settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Hits drawn from the result sequence per keyword
    pub max_results: usize,
    /// Scholar base URL (mirror sites allowed)
    pub base_url: String,
    /// Egress pool used for identity rotation (e.g. "http://127.0.0.1:7890")
    pub proxies: Vec<String>,
    /// Per-request network timeout
    pub request_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            base_url: DEFAULT_SCHOLAR_URL.to_string(),
            proxies: Vec::new(),
            request_timeout_secs: 30,
        }
    }
}

/// Which response generator implementation to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Local Ollama daemon (`/api/generate`)
    #[default]
    Ollama,
    /// OpenAI-compatible `/chat/completions`
    OpenAi,
}

/// Language model settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub calls_per_second: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Ollama,
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            api_key: String::new(),
            model: "llama3.2".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
            calls_per_second: 2.0,
        }
    }
}

/// Zotero library settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ZoteroConfig {
    pub library_id: String,
    /// "user" or "group"
    pub library_type: String,
    pub api_key: String,
    pub collection_name: String,
    pub auto_tags: Vec<String>,
}

impl Default for ZoteroConfig {
    fn default() -> Self {
        Self {
            library_id: String::new(),
            library_type: "user".to_string(),
            api_key: String::new(),
            collection_name: "Research AI".to_string(),
            auto_tags: vec!["litscout".to_string()],
        }
    }
}

/// Retry ceiling and backoff base shared by all retrying call sites.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Delay after failed attempt `i` is `base_delay_secs * 2^i`
    pub base_delay_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1.0,
        }
    }
}

/// Default config file path: `<config_dir>/litscout/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join("litscout").join("config.toml"))
        .ok_or_else(|| LitscoutError::Config("Cannot determine config directory".to_string()))
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = ?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        debug!(path = ?path, "Loaded config");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Copy of this config with a different per-keyword result limit.
    pub fn with_max_results(&self, max_results: usize) -> Result<Self> {
        let mut config = self.clone();
        config.search.max_results = max_results;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.search.max_results == 0 {
            return Err(LitscoutError::Config(
                "search.max_results must be at least 1".to_string(),
            ));
        }
        let cps = self.llm.calls_per_second;
        if !cps.is_finite() || cps < MIN_CALLS_PER_SECOND {
            return Err(LitscoutError::Config(format!(
                "llm.calls_per_second must be a finite number of at least {}, got {}",
                MIN_CALLS_PER_SECOND, cps
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(LitscoutError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let delay = self.retry.base_delay_secs;
        if !(0.0..=MAX_BASE_DELAY_SECS).contains(&delay) {
            return Err(LitscoutError::Config(format!(
                "retry.base_delay_secs must be between 0 and {}, got {}",
                MAX_BASE_DELAY_SECS, delay
            )));
        }
        if !matches!(self.zotero.library_type.as_str(), "user" | "group") {
            return Err(LitscoutError::Config(format!(
                "zotero.library_type must be 'user' or 'group', got '{}'",
                self.zotero.library_type
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_gives_defaults() -> Result<()> {
        let config = Config::load(Path::new("/nonexistent/litscout.toml"))?;
        assert_eq!(config, Config::default());
        assert_eq!(config.search.max_results, 10);
        assert_eq!(config.retry.max_attempts, 3);
        Ok(())
    }

    #[test]
    fn test_load_partial_file() -> Result<()> {
        let mut temp = NamedTempFile::new()?;
        writeln!(
            temp,
            r#"
[search]
max_results = 5
proxies = ["http://127.0.0.1:7890"]

[llm]
backend = "openai"
model = "gpt-4o-mini"

[zotero]
library_id = "12345"
auto_tags = ["rag", "llm"]
"#
        )?;

        let config = Config::load(temp.path())?;
        assert_eq!(config.search.max_results, 5);
        assert_eq!(config.search.proxies.len(), 1);
        assert_eq!(config.search.base_url, DEFAULT_SCHOLAR_URL);
        assert_eq!(config.llm.backend, LlmBackend::OpenAi);
        assert_eq!(config.llm.calls_per_second, 2.0);
        assert_eq!(config.zotero.auto_tags, vec!["rag", "llm"]);
        assert_eq!(config.zotero.library_type, "user");
        Ok(())
    }

    #[test]
    fn test_rejects_zero_results() {
        let result = Config::from_toml("[search]\nmax_results = 0\n");
        assert!(matches!(result, Err(LitscoutError::Config(_))));
    }

    #[test]
    fn test_rejects_unusable_retry_delay() {
        for value in ["inf", "nan", "-1.0", "1e300"] {
            let result = Config::from_toml(&format!("[retry]\nbase_delay_secs = {}\n", value));
            assert!(matches!(result, Err(LitscoutError::Config(_))), "accepted {}", value);
        }
        assert!(Config::from_toml("[retry]\nbase_delay_secs = 0.5\n").is_ok());
    }

    #[test]
    fn test_rejects_unusable_call_rate() {
        for value in ["0.0", "inf", "nan", "1e-300"] {
            let result = Config::from_toml(&format!("[llm]\ncalls_per_second = {}\n", value));
            assert!(matches!(result, Err(LitscoutError::Config(_))), "accepted {}", value);
        }
    }

    #[test]
    fn test_rejects_bad_library_type() {
        let result = Config::from_toml("[zotero]\nlibrary_type = \"team\"\n");
        assert!(matches!(result, Err(LitscoutError::Config(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = Config::from_toml("[search\nmax_results = ");
        assert!(matches!(result, Err(LitscoutError::Toml(_))));
    }

    #[test]
    fn test_with_max_results_leaves_original() -> Result<()> {
        let base = Config::default();
        let narrowed = base.with_max_results(3)?;
        assert_eq!(narrowed.search.max_results, 3);
        assert_eq!(base.search.max_results, 10);
        Ok(())
    }
}
