//! Configuration loading, validation, and management for storyloom.
//!
//! Loads configuration from `~/.storyloom/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.storyloom/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider used when a model id names no configured provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Provider-specific configurations, keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Embedding service
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking, retrieval and recency policy
    #[serde(default)]
    pub rag: RagConfig,

    /// Chat turn behaviour
    #[serde(default)]
    pub chat: ChatConfig,

    /// Persistence backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_provider() -> String {
    "openai".into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("default_provider", &self.default_provider)
            .field("providers", &self.providers)
            .field("embedding", &self.embedding)
            .field("rag", &self.rag)
            .field("chat", &self.chat)
            .field("storage", &self.storage)
            .field("gateway", &self.gateway)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Upstream model used when a request names only the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_url")]
    pub api_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embedding_model() -> String {
    "text-embedding-v4".into()
}
fn default_embedding_timeout() -> u64 {
    60
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_embedding_url(),
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters carried from one chunk into the next
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Chunks shorter than this are dropped
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    /// Turns shorter than this are never indexed
    #[serde(default = "default_min_index_chars")]
    pub min_index_chars: usize,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Top-K used when building chat context
    #[serde(default = "default_context_top_k")]
    pub context_top_k: usize,

    /// A hit survives only if `similarity * recency_weight` exceeds this
    #[serde(default = "default_min_weighted_score")]
    pub min_weighted_score: f32,

    #[serde(default)]
    pub recency: RecencyConfig,
}

fn default_true() -> bool {
    true
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_min_chunk_size() -> usize {
    100
}
fn default_min_index_chars() -> usize {
    50
}
fn default_top_k() -> usize {
    5
}
fn default_context_top_k() -> usize {
    8
}
fn default_min_weighted_score() -> f32 {
    0.3
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
            min_index_chars: default_min_index_chars(),
            default_top_k: default_top_k(),
            context_top_k: default_context_top_k(),
            min_weighted_score: default_min_weighted_score(),
            recency: RecencyConfig::default(),
        }
    }
}

/// Recency decay: full weight while fresh, then linear down to a floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecencyConfig {
    #[serde(default = "default_full_weight_hours")]
    pub full_weight_hours: f64,

    /// Age at which the floor is reached
    #[serde(default = "default_floor_days")]
    pub floor_days: f64,

    #[serde(default = "default_floor_weight")]
    pub floor_weight: f32,
}

fn default_full_weight_hours() -> f64 {
    24.0
}
fn default_floor_days() -> f64 {
    30.0
}
fn default_floor_weight() -> f32 {
    0.5
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            full_weight_hours: default_full_weight_hours(),
            floor_days: default_floor_days(),
            floor_weight: default_floor_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Prior turns replayed into the prompt
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Buffered assistant output is persisted once it reaches this size
    #[serde(default = "default_persist_threshold")]
    pub persist_threshold_chars: usize,

    /// Streamed output size that triggers one early index of the reply
    #[serde(default = "default_index_threshold")]
    pub index_threshold_chars: usize,

    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,

    /// Title used when the first message has no usable text
    #[serde(default = "default_title")]
    pub default_title: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Optional preamble for dialogue-mode prompts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_history_limit() -> usize {
    5
}
fn default_persist_threshold() -> usize {
    100
}
fn default_index_threshold() -> usize {
    500
}
fn default_title_max_chars() -> usize {
    50
}
fn default_title() -> String {
    "新对话".into()
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            persist_threshold_chars: default_persist_threshold(),
            index_threshold_chars: default_index_threshold(),
            title_max_chars: default_title_max_chars(),
            default_title: default_title(),
            temperature: default_temperature(),
            max_tokens: None,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_backend() -> String {
    "sqlite".into()
}
fn default_db_path() -> String {
    "storyloom.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path, then apply environment
    /// overrides (highest priority).
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        for (name, key_var, url_var) in [
            ("openai", "OPENAI_API_KEY", "OPENAI_BASE_URL"),
            ("anthropic", "ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL"),
        ] {
            let key = var(key_var);
            let url = var(url_var);
            if key.is_none() && url.is_none() {
                continue;
            }
            let entry = self.providers.entry(name.to_string()).or_default();
            if key.is_some() {
                entry.api_key = key;
            }
            if url.is_some() {
                entry.api_url = url;
            }
        }

        if let Some(key) = var("EMBEDDING_API_KEY").or_else(|| var("OPENAI_API_KEY")) {
            self.embedding.api_key = Some(key);
        }
        if let Some(url) = var("EMBEDDING_BASE_URL") {
            self.embedding.api_url = url;
        }
        if let Some(model) = var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(enabled) = var("ENABLE_RAG") {
            self.rag.enabled = matches!(enabled.trim(), "1" | "true" | "TRUE" | "yes");
        }
        if let Some(path) = var("DATABASE_PATH") {
            self.storage.path = path;
        }
        if let Some(port) = var("PORT").and_then(|p| p.trim().parse().ok()) {
            self.gateway.port = port;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".storyloom")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rag = &self.rag;
        if rag.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "rag.chunk_size must be > 0".into(),
            ));
        }
        if rag.min_chunk_size > rag.chunk_size {
            return Err(ConfigError::ValidationError(
                "rag.min_chunk_size must not exceed rag.chunk_size".into(),
            ));
        }

        let recency = &rag.recency;
        if !(recency.floor_weight > 0.0 && recency.floor_weight <= 1.0) {
            return Err(ConfigError::ValidationError(
                "rag.recency.floor_weight must be in (0, 1]".into(),
            ));
        }
        if recency.floor_days * 24.0 <= recency.full_weight_hours {
            return Err(ConfigError::ValidationError(
                "rag.recency.floor_days must come after full_weight_hours".into(),
            ));
        }

        if self.chat.persist_threshold_chars == 0 || self.chat.index_threshold_chars == 0 {
            return Err(ConfigError::ValidationError(
                "chat thresholds must be > 0".into(),
            ));
        }
        if self.chat.temperature < 0.0 || self.chat.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "chat.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !matches!(self.storage.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown storage backend: {}",
                self.storage.backend
            )));
        }

        if self.gateway.port == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.port must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Retrieval runs only when enabled and a non-blank embedding key is
    /// present.
    pub fn rag_active(&self) -> bool {
        self.rag.enabled
            && self
                .embedding
                .api_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            providers: HashMap::new(),
            embedding: EmbeddingConfig::default(),
            rag: RagConfig::default(),
            chat: ChatConfig::default(),
            storage: StorageConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.rag.chunk_size, 1000);
        assert_eq!(config.rag.chunk_overlap, 200);
        assert_eq!(config.chat.persist_threshold_chars, 100);
        assert_eq!(config.chat.index_threshold_chars, 500);
        assert_eq!(config.gateway.port, 8080);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.rag.context_top_k, 8);
        assert_eq!(parsed.chat.default_title, "新对话");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
[rag]
chunk_size = 500

[rag.recency]
floor_weight = 0.25
"#,
        )
        .unwrap();
        assert_eq!(parsed.rag.chunk_size, 500);
        assert_eq!(parsed.rag.chunk_overlap, 200);
        assert_eq!(parsed.rag.recency.floor_weight, 0.25);
        assert_eq!(parsed.rag.recency.full_weight_hours, 24.0);
    }

    #[test]
    fn invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.rag.min_chunk_size = 2000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rag.recency.floor_weight = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.backend = "postgres".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_provider, "openai");
    }

    #[test]
    fn config_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nport = 9090\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.gateway.port, 9090);
    }

    #[test]
    fn env_overrides_providers_and_embedding() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env(&[
            ("OPENAI_API_KEY", "sk-openai"),
            ("ANTHROPIC_BASE_URL", "https://proxy.local"),
            ("EMBEDDING_MODEL", "text-embedding-3-small"),
            ("ENABLE_RAG", "false"),
            ("PORT", "9000"),
        ]));

        let openai = &config.providers["openai"];
        assert_eq!(openai.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(
            config.providers["anthropic"].api_url.as_deref(),
            Some("https://proxy.local")
        );
        // Embedding key falls back to the OpenAI key
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert!(!config.rag.enabled);
        assert_eq!(config.gateway.port, 9000);
    }

    #[test]
    fn rag_requires_embedding_key() {
        let mut config = AppConfig::default();
        assert!(!config.rag_active());
        config.embedding.api_key = Some("k".into());
        assert!(config.rag_active());
        config.embedding.api_key = Some("  ".into());
        assert!(!config.rag_active());
    }

    #[test]
    fn debug_output_redacts_keys() {
        let mut config = AppConfig::default();
        config.embedding.api_key = Some("super-secret".into());
        let out = format!("{config:?}");
        assert!(!out.contains("super-secret"));
        assert!(out.contains("[REDACTED]"));
    }
}
