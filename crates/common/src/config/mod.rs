//! Configuration management for LexForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values
//!
//! Everything here is read once at startup. The exclusion rule set is the
//! only thing reloaded at runtime, from `exclusion.rules_path`.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (postgres corpus backend)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Corpus store selection
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Resolution pipeline tuning
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// Excluded-area rule source
    #[serde(default)]
    pub exclusion: ExclusionConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
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

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: http, hash
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model used for corpus and queries alike
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorpusConfig {
    /// Corpus backend: memory, postgres
    #[serde(default = "default_corpus_backend")]
    pub backend: String,

    /// JSON fixture loaded into the memory backend
    pub fixture_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolutionConfig {
    /// Candidates fetched from the corpus per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Accepted chunks inspected by the source-count rule (defaults to top_k)
    pub validation_window: Option<usize>,

    /// Distinct documents required for sufficient confidence
    #[serde(default = "default_min_distinct_sources")]
    pub min_distinct_sources: usize,

    /// Accepted chunks required after provenance filtering
    #[serde(default = "default_min_surviving_chunks")]
    pub min_surviving_chunks: usize,

    /// Fewer accepted chunks than this (but at least one) adds a sparse-results warning
    #[serde(default = "default_sparse_result_threshold")]
    pub sparse_result_threshold: usize,

    /// Downgrade confidence whenever a chunk is rejected
    #[serde(default)]
    pub strict_confidence: bool,

    /// Multiplier per norm level, keyed by kebab-case level name
    #[serde(default = "default_norm_level_boosts")]
    pub norm_level_boosts: BTreeMap<String, f32>,

    /// Maximum concurrently resolving queries
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Upper bound for one classification call
    #[serde(default = "default_classifier_timeout")]
    pub classifier_timeout_ms: u64,

    /// Upper bound for one embedding or store call
    #[serde(default = "default_collaborator_timeout")]
    pub collaborator_timeout_ms: u64,

    /// Longest accepted query
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,

    /// Total time the HTTP caller spends retrying retryable failures
    #[serde(default = "default_retry_max_elapsed")]
    pub retry_max_elapsed_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExclusionConfig {
    /// Rules file (extension optional; yaml, toml and json are accepted)
    #[serde(default = "default_rules_path")]
    pub rules_path: String,

    /// Seconds between rule reloads
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,
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

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_database_url() -> String { "postgres://localhost/lexforge".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "hash".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_corpus_backend() -> String { "memory".to_string() }
fn default_top_k() -> usize { 10 }
fn default_min_distinct_sources() -> usize { 2 }
fn default_min_surviving_chunks() -> usize { 1 }
fn default_sparse_result_threshold() -> usize { 2 }
fn default_max_concurrent() -> usize { 32 }
fn default_classifier_timeout() -> u64 { 2_000 }
fn default_collaborator_timeout() -> u64 { 10_000 }
fn default_max_query_chars() -> usize { 2_000 }
fn default_retry_max_elapsed() -> u64 { 5_000 }
fn default_rules_path() -> String { "config/excluded_areas".to_string() }
fn default_reload_interval() -> u64 { 86_400 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "lexforge".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

/// Default multipliers, highest authority first
pub fn default_norm_level_boosts() -> BTreeMap<String, f32> {
    [
        ("constitution", 1.30),
        ("statute", 1.20),
        ("regulation", 1.12),
        ("administrative-rule", 1.06),
        ("precedent", 1.00),
        ("preparatory-work", 0.92),
        ("doctrine", 0.85),
    ]
    .into_iter()
    .map(|(level, boost)| (level.to_string(), boost))
    .collect()
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RESOLUTION__TOP_K=20
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
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

impl ResolutionConfig {
    /// Window inspected by the source-count rule
    pub fn effective_validation_window(&self) -> usize {
        self.validation_window.unwrap_or(self.top_k)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    pub fn retry_max_elapsed(&self) -> Duration {
        Duration::from_millis(self.retry_max_elapsed_ms)
    }
}

impl ExclusionConfig {
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }
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

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            backend: default_corpus_backend(),
            fixture_path: None,
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            validation_window: None,
            min_distinct_sources: default_min_distinct_sources(),
            min_surviving_chunks: default_min_surviving_chunks(),
            sparse_result_threshold: default_sparse_result_threshold(),
            strict_confidence: false,
            norm_level_boosts: default_norm_level_boosts(),
            max_concurrent: default_max_concurrent(),
            classifier_timeout_ms: default_classifier_timeout(),
            collaborator_timeout_ms: default_collaborator_timeout(),
            max_query_chars: default_max_query_chars(),
            retry_max_elapsed_ms: default_retry_max_elapsed(),
        }
    }
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            rules_path: default_rules_path(),
            reload_interval_secs: default_reload_interval(),
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

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.resolution.top_k, 10);
        assert_eq!(config.resolution.min_distinct_sources, 2);
        assert!(!config.resolution.strict_confidence);
        assert_eq!(config.exclusion.reload_interval_secs, 86_400);
        assert_eq!(config.embedding.model, crate::DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn test_validation_window_falls_back_to_top_k() {
        let mut resolution = ResolutionConfig::default();
        assert_eq!(resolution.effective_validation_window(), 10);
        resolution.validation_window = Some(4);
        assert_eq!(resolution.effective_validation_window(), 4);
    }

    #[test]
    fn test_default_boosts_cover_every_level() {
        let boosts = default_norm_level_boosts();
        assert_eq!(boosts.len(), 7);
        assert!(boosts["constitution"] > boosts["statute"]);
        assert!(boosts["preparatory-work"] > boosts["doctrine"]);
    }

    #[test]
    fn test_partial_source_fills_defaults() {
        let config: AppConfig = Config::builder()
            .add_source(config::File::from_str(
                "[resolution]\ntop_k = 20\nstrict_confidence = true\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.resolution.top_k, 20);
        assert!(config.resolution.strict_confidence);
        assert_eq!(config.resolution.min_surviving_chunks, 1);
        assert_eq!(config.server.port, 8080);
    }
}
