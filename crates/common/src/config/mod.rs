//! Configuration management for ProposalForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values
//!
//! Model profiles and schema bounds are operator-tunable at runtime, so the
//! pipeline never holds on to an `AppConfig`. It asks a [`ConfigSource`] for a
//! fresh snapshot on every call that needs one.

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote inference service configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Semantic index configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Output schema bounds
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

/// Per-model generation defaults
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelProfile {
    /// Base output token budget for the first attempt
    pub token_budget: u32,

    /// Per-call timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Reasoning effort knob (minimal, low, medium, high)
    #[serde(default)]
    pub reasoning_effort: Option<String>,

    /// Verbosity knob (low, medium, high)
    #[serde(default)]
    pub verbosity: Option<String>,
}

impl ModelProfile {
    /// Per-call timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Responses endpoint of the inference service
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Currently selected model
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Per-model defaults keyed by model name
    #[serde(default = "default_model_profiles")]
    pub models: HashMap<String, ModelProfile>,

    /// Attempts per generation request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Token budget added per retry
    #[serde(default = "default_budget_step")]
    pub budget_step: u32,

    /// Pause after a transport failure, in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Primary semantic index endpoint
    pub primary_index_url: Option<String>,

    /// Secondary semantic index endpoint (required by some modes)
    pub secondary_index_url: Option<String>,

    /// Candidates fetched per query before thresholding
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,

    /// Minimum similarity score
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,

    /// Query variants added by expansion
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,

    /// Index request timeout in seconds
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,

    /// Lifetime of cached index responses (0 disables the cache)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SchemaConfig {
    /// Minimum length of bounded string fields
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    /// Maximum length of bounded string fields
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 300 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/responses".to_string() }
fn default_llm_model() -> String { "gpt-5-mini".to_string() }
fn default_llm_timeout() -> u64 { 120 }
fn default_max_retries() -> u32 { 3 }
fn default_budget_step() -> u32 { 1000 }
fn default_backoff_ms() -> u64 { 2000 }
fn default_fetch_k() -> usize { 40 }
fn default_score_threshold() -> f32 { 0.2 }
fn default_max_expansions() -> usize { 3 }
fn default_index_timeout() -> u64 { 15 }
fn default_cache_ttl() -> u64 { 300 }
fn default_min_length() -> usize { 5 }
fn default_max_length() -> usize { 100 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "proposalforge".to_string() }

fn default_model_profiles() -> HashMap<String, ModelProfile> {
    let mut models = HashMap::new();
    models.insert(
        "gpt-5-mini".to_string(),
        ModelProfile {
            token_budget: 6000,
            timeout_secs: 120,
            reasoning_effort: Some("low".to_string()),
            verbosity: Some("medium".to_string()),
        },
    );
    models.insert(
        "gpt-5".to_string(),
        ModelProfile {
            token_budget: 8000,
            timeout_secs: 180,
            reasoning_effort: Some("medium".to_string()),
            verbosity: Some("medium".to_string()),
        },
    );
    models.insert(
        "gpt-4.1".to_string(),
        ModelProfile {
            token_budget: 4000,
            timeout_secs: 90,
            reasoning_effort: None,
            verbosity: None,
        },
    );
    models
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            models: default_model_profiles(),
            max_retries: default_max_retries(),
            budget_step: default_budget_step(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            primary_index_url: None,
            secondary_index_url: None,
            fetch_k: default_fetch_k(),
            score_threshold: default_score_threshold(),
            max_expansions: default_max_expansions(),
            timeout_secs: default_index_timeout(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            max_length: default_max_length(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__LLM__MODEL=gpt-5
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Resolve the generation defaults for a model name
    pub fn model_profile(&self, model: &str) -> Result<ModelProfile> {
        self.llm.models.get(model).cloned().ok_or_else(|| AppError::Configuration {
            message: format!("no model profile configured for '{}'", model),
        })
    }

    /// Resolve the generation defaults for the currently selected model
    pub fn active_model_profile(&self) -> Result<(String, ModelProfile)> {
        let profile = self.model_profile(&self.llm.model)?;
        Ok((self.llm.model.clone(), profile))
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

/// A live view of the configuration.
///
/// Implementations must return the current settings on every call; callers
/// never cache the snapshot beyond a single operation.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> Result<AppConfig>;
}

/// Re-reads the layered files and environment on every snapshot
#[derive(Debug, Clone, Default)]
pub struct LayeredConfigSource {
    path: Option<String>,
}

impl LayeredConfigSource {
    /// Use the standard `config/` layering
    pub fn new() -> Self {
        Self { path: None }
    }

    /// Use a single explicit file plus environment overrides
    pub fn with_file(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

impl ConfigSource for LayeredConfigSource {
    fn snapshot(&self) -> Result<AppConfig> {
        let config = match &self.path {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::load()?,
        };
        Ok(config)
    }
}

/// In-memory configuration that can be changed while the process runs
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    inner: RwLock<AppConfig>,
}

impl StaticConfigSource {
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Apply an operator change; later snapshots observe it
    pub fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self.inner.write().map_err(|_| AppError::Internal {
            message: "configuration lock poisoned".to_string(),
        })?;
        change(&mut guard);
        Ok(())
    }
}

impl ConfigSource for StaticConfigSource {
    fn snapshot(&self) -> Result<AppConfig> {
        self.inner
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| AppError::Internal {
                message: "configuration lock poisoned".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.llm.budget_step, 1000);
        assert_eq!(config.llm.backoff_ms, 2000);
        assert_eq!(config.schema, SchemaConfig { min_length: 5, max_length: 100 });
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.observability.service_name, "proposalforge");
    }

    #[test]
    fn test_active_model_profile() {
        let config = AppConfig::default();
        let (name, profile) = config.active_model_profile().unwrap();
        assert_eq!(name, "gpt-5-mini");
        assert!(profile.token_budget > 0);
    }

    #[test]
    fn test_unknown_model_is_configuration_error() {
        let config = AppConfig::default();
        let err = config.model_profile("no-such-model").unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_static_source_sees_updates() {
        let source = StaticConfigSource::new(AppConfig::default());
        assert_eq!(source.snapshot().unwrap().schema.max_length, 100);

        source.update(|c| c.schema.max_length = 400).unwrap();
        assert_eq!(source.snapshot().unwrap().schema.max_length, 400);
    }
}
