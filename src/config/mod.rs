//! Configuration management for ragindex
//!
//! Handles loading, saving, and validating configuration from TOML files,
//! with environment overrides for provider selection.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::provider;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Batch indexing and change watching
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Code chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Directory scanning configuration
    #[serde(default)]
    pub scan: ScanConfig,

    /// Remote page fetching configuration
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Embedding model
    #[serde(default)]
    pub embed: ModelConfig,

    /// LLM used for answer synthesis
    #[serde(default)]
    pub llm: ModelConfig,

    /// Corpus backend configuration
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP API binds to
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Batch indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Documents per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches processed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Debounce window for change events, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Debounce entries idle for this many windows are evicted
    #[serde(default = "default_debounce_evict_windows")]
    pub debounce_evict_windows: u32,

    /// Printable-character ratio a document must exceed
    #[serde(default = "default_printable_threshold")]
    pub printable_threshold: f64,

    /// Characters of an invalid document logged for diagnosis
    #[serde(default = "default_sample_chars")]
    pub sample_chars: usize,
}

/// Code chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum lines per chunk
    #[serde(default = "default_chunk_lines")]
    pub lines: usize,

    /// Lines shared between consecutive chunks
    #[serde(default = "default_chunk_overlap_lines")]
    pub overlap_lines: usize,

    /// Maximum characters per chunk
    #[serde(default = "default_chunk_max_chars")]
    pub max_chars: usize,
}

/// Directory scanning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Extensions (without dot) that are indexed; empty means all non-binary files
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

/// Remote page fetching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// User agent string
    #[serde(default = "default_crawl_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "default_crawl_timeout")]
    pub timeout_secs: u64,

    /// Requests per second per host
    #[serde(default = "default_crawl_rate_limit")]
    pub rate_limit_per_host: f64,

    /// Maximum linked pages fetched per resource
    #[serde(default = "default_crawl_max_links")]
    pub max_links: usize,
}

/// Embedding or LLM model selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider name (openai, ollama, dashscope, openrouter)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model name; the provider default when unset
    #[serde(default)]
    pub model: Option<String>,

    /// API base URL; the provider default when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding the API key; `<PROVIDER>_API_KEY` when unset
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

/// Corpus backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// `local` (persisted in the data directory) or `qdrant`
    #[serde(default = "default_corpus_backend")]
    pub backend: String,

    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Qdrant collection name
    #[serde(default = "default_collection_name")]
    pub collection: String,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Sources returned when the request omits `top_k`
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Largest accepted `top_k`
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Corpus candidates fetched before scoping
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for ragindex data
    pub data_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Leader lock file
    pub lock_file: PathBuf,

    /// Local corpus snapshot
    pub corpus_file: PathBuf,

    /// Embedding provider fingerprint
    pub fingerprint_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let mut config = Self {
            server: ServerConfig::default(),
            indexing: IndexingConfig::default(),
            chunk: ChunkConfig::default(),
            scan: ScanConfig::default(),
            crawl: CrawlConfig::default(),
            embed: ModelConfig::default(),
            llm: ModelConfig::default(),
            corpus: CorpusConfig::default(),
            retrieval: RetrievalConfig::default(),
            paths: PathsConfig::default(),
        };
        config.init_paths(None);
        config
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            debounce_ms: default_debounce_ms(),
            debounce_evict_windows: default_debounce_evict_windows(),
            printable_threshold: default_printable_threshold(),
            sample_chars: default_sample_chars(),
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            lines: default_chunk_lines(),
            overlap_lines: default_chunk_overlap_lines(),
            max_chars: default_chunk_max_chars(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            user_agent: default_crawl_user_agent(),
            timeout_secs: default_crawl_timeout(),
            rate_limit_per_host: default_crawl_rate_limit(),
            max_links: default_crawl_max_links(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            endpoint: None,
            api_key_env: None,
            timeout_secs: default_model_timeout(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            backend: default_corpus_backend(),
            qdrant_url: default_qdrant_url(),
            collection: default_collection_name(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            candidate_k: default_candidate_k(),
        }
    }
}

impl IndexingConfig {
    /// Debounce window as a duration
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl ModelConfig {
    /// Environment variable consulted for the API key
    pub fn api_key_var(&self) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| format!("{}_API_KEY", self.provider.to_uppercase()))
    }

    /// Get the API key from environment
    pub fn api_key(&self) -> Option<String> {
        std::env::var(self.api_key_var())
            .ok()
            .filter(|key| !key.is_empty())
    }

    /// Request timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Initialize paths configuration
    fn init_paths(&mut self, data_dir: Option<PathBuf>) {
        let base = data_dir.unwrap_or_else(default_data_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("rag.db"),
            lock_file: base.join("leader.lock"),
            corpus_file: base.join("corpus.json"),
            fingerprint_file: base.join("rag_config.json"),
            data_dir: base,
        };
    }

    /// Load configuration from a data directory, falling back to defaults
    /// when no config file exists, then apply environment overrides
    pub fn load_from(data_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(data_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Apply provider overrides from environment-style lookups
    ///
    /// `RAG_PROVIDER` selects both providers, `RAG_EMBED_PROVIDER` and
    /// `RAG_LLM_PROVIDER` select them individually, `RAG_EMBED_MODEL` and
    /// `RAG_LLM_MODEL` pick models, and `<PROVIDER>_API_BASE` sets the endpoint.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = get("RAG_PROVIDER") {
            self.embed.provider = provider.clone();
            self.llm.provider = provider;
        }
        if let Some(provider) = get("RAG_EMBED_PROVIDER") {
            self.embed.provider = provider;
        }
        if let Some(provider) = get("RAG_LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Some(model) = get("RAG_EMBED_MODEL") {
            self.embed.model = Some(model);
        }
        if let Some(model) = get("RAG_LLM_MODEL") {
            self.llm.model = Some(model);
        }

        for model in [&mut self.embed, &mut self.llm] {
            let key = format!("{}_API_BASE", model.provider.to_uppercase());
            if let Some(endpoint) = get(&key) {
                model.endpoint = Some(endpoint);
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.indexing.batch_size == 0 {
            return Err(Error::Config(
                "indexing.batch_size must be positive".to_string(),
            ));
        }

        if self.indexing.workers == 0 {
            return Err(Error::Config("indexing.workers must be positive".to_string()));
        }

        if self.indexing.printable_threshold <= 0.0 || self.indexing.printable_threshold > 1.0 {
            return Err(Error::Config(
                "indexing.printable_threshold must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.chunk.lines == 0 || self.chunk.max_chars == 0 {
            return Err(Error::Config(
                "chunk.lines and chunk.max_chars must be positive".to_string(),
            ));
        }

        if self.chunk.overlap_lines >= self.chunk.lines {
            return Err(Error::Config(
                "chunk.overlap_lines must be < chunk.lines".to_string(),
            ));
        }

        if self.crawl.rate_limit_per_host <= 0.0 {
            return Err(Error::Config(
                "crawl.rate_limit_per_host must be positive".to_string(),
            ));
        }

        match provider::lookup(&self.embed.provider) {
            None => {
                return Err(Error::Config(format!(
                    "Unknown embedding provider '{}'; expected one of: {}",
                    self.embed.provider,
                    provider::provider_names().join(", ")
                )))
            }
            Some(spec) if spec.embed.is_none() => {
                return Err(Error::Config(format!(
                    "Provider '{}' does not offer embedding models",
                    self.embed.provider
                )))
            }
            Some(_) => {}
        }

        if provider::lookup(&self.llm.provider).is_none() {
            return Err(Error::Config(format!(
                "Unknown LLM provider '{}'; expected one of: {}",
                self.llm.provider,
                provider::provider_names().join(", ")
            )));
        }

        if !matches!(self.corpus.backend.as_str(), "local" | "qdrant") {
            return Err(Error::Config(format!(
                "corpus.backend must be 'local' or 'qdrant', got '{}'",
                self.corpus.backend
            )));
        }

        if self.retrieval.max_top_k == 0 || self.retrieval.max_top_k > 20 {
            return Err(Error::Config(
                "retrieval.max_top_k must be between 1 and 20".to_string(),
            ));
        }

        if self.retrieval.default_top_k == 0
            || self.retrieval.default_top_k > self.retrieval.max_top_k
        {
            return Err(Error::Config(
                "retrieval.default_top_k must be between 1 and retrieval.max_top_k".to_string(),
            ));
        }

        if self.retrieval.candidate_k < self.retrieval.max_top_k {
            return Err(Error::Config(
                "retrieval.candidate_k must be >= retrieval.max_top_k".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.indexing.batch_size, 40);
        assert_eq!(config.indexing.debounce_ms, 1000);
        assert_eq!(config.chunk.lines, 80);
        assert_eq!(config.chunk.overlap_lines, 15);
        assert_eq!(config.chunk.max_chars, 1500);
        assert_eq!(config.embed.provider, "openai");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_paths_derive_from_data_dir() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(config.paths.db_file, tmp.path().join("rag.db"));
        assert_eq!(config.paths.lock_file, tmp.path().join("leader.lock"));
        assert_eq!(
            config.paths.fingerprint_file,
            tmp.path().join("rag_config.json")
        );
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.indexing.batch_size = 10;
        config.corpus.collection = "test_collection".to_string();

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.indexing.batch_size, 10);
        assert_eq!(loaded.corpus.collection, "test_collection");
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.chunk.overlap_lines = config.chunk.lines;
        assert!(config.validate().is_err());
        config.chunk.overlap_lines = 15;
        assert!(config.validate().is_ok());

        config.retrieval.max_top_k = 21;
        assert!(config.validate().is_err());
        config.retrieval.max_top_k = 20;

        config.indexing.printable_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_provider_rejected_at_validation() {
        let mut config = Config::default();
        config.embed.provider = "nonexistent".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        config.embed.provider = "openrouter".to_string();
        assert!(config.validate().is_err(), "openrouter has no embeddings");

        config.embed.provider = "ollama".to_string();
        config.llm.provider = "openrouter".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RAG_PROVIDER", "ollama"),
            ("RAG_EMBED_MODEL", "mxbai-embed-large"),
            ("OLLAMA_API_BASE", "http://gpu-box:11434"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.embed.provider, "ollama");
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.embed.model.as_deref(), Some("mxbai-embed-large"));
        assert_eq!(config.llm.model, None);
        assert_eq!(
            config.embed.endpoint.as_deref(),
            Some("http://gpu-box:11434")
        );
        assert_eq!(config.llm.endpoint.as_deref(), Some("http://gpu-box:11434"));
    }

    #[test]
    fn test_api_key_var_defaults_to_provider() {
        let mut model = ModelConfig::default();
        model.provider = "dashscope".to_string();
        assert_eq!(model.api_key_var(), "DASHSCOPE_API_KEY");

        model.api_key_env = Some("MY_KEY".to_string());
        assert_eq!(model.api_key_var(), "MY_KEY");
    }
}
