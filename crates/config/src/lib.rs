//! Configuration loading, validation, and management for Tether.
//!
//! Loads configuration from `~/.tether/config.toml` with environment
//! variable overrides. Validates all settings at startup, so a bad
//! embedding catalog fails before the first request instead of during it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tether_core::SearchMode;

/// The root configuration structure.
///
/// Maps directly to `~/.tether/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage backend settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Embedding model catalog
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Search defaults
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Conversation memory settings
    #[serde(default)]
    pub conversation: ConversationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path; `":memory:"` for an ephemeral store
    #[serde(default = "default_store_path")]
    pub path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Upper bound for a single store query, in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

fn default_store_path() -> String {
    "~/.tether/tether.sqlite".into()
}
fn default_max_connections() -> u32 {
    4
}
fn default_query_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            max_connections: default_max_connections(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// The database path with a leading `~/` expanded.
    pub fn resolved_path(&self) -> String {
        match self.path.strip_prefix("~/") {
            Some(rest) => dirs_home().join(rest).to_string_lossy().into_owned(),
            None => self.path.clone(),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model used for new collections when none is named
    #[serde(default = "default_embedding_model")]
    pub default_model: String,

    /// Every model the process may load, keyed by `name`
    #[serde(default = "default_embedding_models")]
    pub models: Vec<EmbeddingModelConfig>,
}

fn default_embedding_model() -> String {
    "multilingual-e5-small".into()
}
fn default_embedding_models() -> Vec<EmbeddingModelConfig> {
    vec![EmbeddingModelConfig {
        name: default_embedding_model(),
        dimensions: 384,
        provider: EmbeddingProviderConfig::Local {
            model: None,
            cache_dir: None,
        },
    }]
}

/// Models the in-process provider can download and run, with their
/// output dimension.
pub const LOCAL_MODELS: &[(&str, usize)] = &[
    ("all-minilm-l6-v2", 384),
    ("bge-small-en-v1.5", 384),
    ("bge-base-en-v1.5", 768),
    ("bge-large-en-v1.5", 1024),
    ("nomic-embed-text-v1", 768),
    ("nomic-embed-text-v1.5", 768),
    ("multilingual-e5-small", 384),
    ("multilingual-e5-base", 768),
    ("multilingual-e5-large", 1024),
];

/// Output dimension of a supported local model.
pub fn local_model_dimensions(model: &str) -> Option<usize> {
    LOCAL_MODELS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, dims)| *dims)
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            default_model: default_embedding_model(),
            models: default_embedding_models(),
        }
    }
}

impl EmbeddingConfig {
    /// Look up a model entry by name.
    pub fn model(&self, name: &str) -> Option<&EmbeddingModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingModelConfig {
    pub name: String,
    pub dimensions: usize,
    pub provider: EmbeddingProviderConfig,
}

/// Supported embedding providers, one strongly-typed variant each.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingProviderConfig {
    /// ONNX model run in-process; weights are downloaded once and cached
    Local {
        /// Model to run; the catalog entry name when omitted
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        /// Where downloaded weights are kept
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_dir: Option<String>,
    },
    /// Offline feature-hashing encoder for tests and air-gapped setups.
    /// Lexical overlap only; it carries no semantics.
    Hashing {
        #[serde(default = "default_true")]
        instruction_tuned: bool,
    },
    /// Any server speaking the OpenAI `/embeddings` wire format
    OpenaiCompat {
        base_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key_env: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

impl EmbeddingProviderConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            EmbeddingProviderConfig::Local { .. } => "local",
            EmbeddingProviderConfig::Hashing { .. } => "hashing",
            EmbeddingProviderConfig::OpenaiCompat { .. } => "openai_compat",
        }
    }

    /// Local model to load for the catalog entry `entry_name`.
    pub fn local_model<'a>(&'a self, entry_name: &'a str) -> Option<&'a str> {
        match self {
            EmbeddingProviderConfig::Local { model, .. } => {
                Some(model.as_deref().unwrap_or(entry_name))
            }
            _ => None,
        }
    }

    /// API key from the config file, falling back to the named env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        match self {
            EmbeddingProviderConfig::Local { .. } | EmbeddingProviderConfig::Hashing { .. } => None,
            EmbeddingProviderConfig::OpenaiCompat {
                api_key,
                api_key_env,
                ..
            } => api_key.clone().or_else(|| {
                api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
            }),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for EmbeddingProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingProviderConfig::Local { model, cache_dir } => f
                .debug_struct("Local")
                .field("model", model)
                .field("cache_dir", cache_dir)
                .finish(),
            EmbeddingProviderConfig::Hashing { instruction_tuned } => f
                .debug_struct("Hashing")
                .field("instruction_tuned", instruction_tuned)
                .finish(),
            EmbeddingProviderConfig::OpenaiCompat {
                base_url,
                api_key,
                api_key_env,
            } => f
                .debug_struct("OpenaiCompat")
                .field("base_url", base_url)
                .field("api_key", &redact(api_key))
                .field("api_key_env", api_key_env)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub default_mode: SearchMode,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Each per-field knn query fetches `top_k * candidate_multiplier`
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    #[serde(default = "default_true")]
    pub include_questions: bool,

    /// Rank constant `k` for hybrid reciprocal rank fusion
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
}

fn default_top_k() -> usize {
    10
}
fn default_rrf_k() -> u32 {
    60
}
fn default_candidate_multiplier() -> usize {
    2
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_mode: SearchMode::default(),
            top_k: default_top_k(),
            candidate_multiplier: default_candidate_multiplier(),
            include_questions: true,
            rrf_k: default_rrf_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Token ceiling for the history window handed to the model
    #[serde(default = "default_max_history_tokens")]
    pub max_history_tokens: usize,
}

fn default_max_history_tokens() -> usize {
    2000
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history_tokens: default_max_history_tokens(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.tether/config.toml).
    ///
    /// Environment overrides:
    /// - `TETHER_DB_PATH` replaces `store.path`
    /// - `TETHER_EMBEDDING_MODEL` replaces `embedding.default_model`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, apply environment overrides, and validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("TETHER_DB_PATH") {
            self.store.path = path;
        }
        if let Some(model) = lookup("TETHER_EMBEDDING_MODEL") {
            self.embedding.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tether")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "store.max_connections must be > 0".into(),
            ));
        }
        if self.store.query_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "store.query_timeout_ms must be > 0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for model in &self.embedding.models {
            if model.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "embedding model names must not be empty".into(),
                ));
            }
            if !seen.insert(model.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "embedding model '{}' is declared more than once",
                    model.name
                )));
            }
            if model.dimensions == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "embedding model '{}' must have dimensions > 0",
                    model.name
                )));
            }
            if let EmbeddingProviderConfig::OpenaiCompat { base_url, .. } = &model.provider
                && base_url.trim().is_empty()
            {
                return Err(ConfigError::ValidationError(format!(
                    "embedding model '{}' needs a base_url",
                    model.name
                )));
            }
            if let Some(local) = model.provider.local_model(&model.name) {
                match local_model_dimensions(local) {
                    None => {
                        let supported: Vec<&str> = LOCAL_MODELS.iter().map(|(n, _)| *n).collect();
                        return Err(ConfigError::ValidationError(format!(
                            "unknown local embedding model '{local}'; supported: {}",
                            supported.join(", ")
                        )));
                    }
                    Some(dims) if dims != model.dimensions => {
                        return Err(ConfigError::ValidationError(format!(
                            "local model '{local}' produces {dims} dimensions, '{}' declares {}",
                            model.name, model.dimensions
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        if self.embedding.model(&self.embedding.default_model).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "default embedding model '{}' is not in the model catalog",
                self.embedding.default_model
            )));
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.top_k must be > 0".into(),
            ));
        }
        if self.retrieval.candidate_multiplier == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.candidate_multiplier must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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
