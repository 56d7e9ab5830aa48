//! Embedding and LLM providers
//!
//! Providers are resolved by name from a static registry. Each entry knows
//! its default endpoint and models and how to build the embedding model
//! (when offered) and the LLM used for answer synthesis.

mod ollama;
mod openai;

pub use ollama::{OllamaEmbed, OllamaLlm};
pub use openai::{OpenAiEmbed, OpenAiLlm};

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Trait for embedding models
#[async_trait]
pub trait EmbedModel: Send + Sync {
    /// Embed a batch of texts, one vector per input in order
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Trait for text-generation models
#[async_trait]
pub trait LlmModel: Send + Sync {
    /// Complete a single prompt
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Connection settings resolved from a [`ModelConfig`] and provider defaults
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

pub type EmbedFactory = fn(&ModelSettings) -> Result<Arc<dyn EmbedModel>>;
pub type LlmFactory = fn(&ModelSettings) -> Result<Arc<dyn LlmModel>>;

/// Embedding capability of a provider
pub struct EmbedSpec {
    pub default_model: &'static str,
    pub build: EmbedFactory,
}

/// A registered provider
pub struct ProviderSpec {
    pub name: &'static str,
    pub default_endpoint: &'static str,
    pub embed: Option<EmbedSpec>,
    pub default_llm_model: &'static str,
    pub build_llm: LlmFactory,
}

fn build_openai_embed(settings: &ModelSettings) -> Result<Arc<dyn EmbedModel>> {
    Ok(Arc::new(OpenAiEmbed::new(settings)?))
}

fn build_openai_llm(settings: &ModelSettings) -> Result<Arc<dyn LlmModel>> {
    Ok(Arc::new(OpenAiLlm::new(settings)?))
}

fn build_ollama_embed(settings: &ModelSettings) -> Result<Arc<dyn EmbedModel>> {
    Ok(Arc::new(OllamaEmbed::new(settings)?))
}

fn build_ollama_llm(settings: &ModelSettings) -> Result<Arc<dyn LlmModel>> {
    Ok(Arc::new(OllamaLlm::new(settings)?))
}

static PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "openai",
        default_endpoint: "https://api.openai.com/v1",
        embed: Some(EmbedSpec {
            default_model: "text-embedding-3-small",
            build: build_openai_embed,
        }),
        default_llm_model: "gpt-4o-mini",
        build_llm: build_openai_llm,
    },
    ProviderSpec {
        name: "ollama",
        default_endpoint: "http://localhost:11434",
        embed: Some(EmbedSpec {
            default_model: "nomic-embed-text",
            build: build_ollama_embed,
        }),
        default_llm_model: "llama3",
        build_llm: build_ollama_llm,
    },
    // OpenAI-compatible mode
    ProviderSpec {
        name: "dashscope",
        default_endpoint: "https://dashscope.aliyuncs.com/compatible-mode/v1",
        embed: Some(EmbedSpec {
            default_model: "text-embedding-v3",
            build: build_openai_embed,
        }),
        default_llm_model: "qwen-plus",
        build_llm: build_openai_llm,
    },
    ProviderSpec {
        name: "openrouter",
        default_endpoint: "https://openrouter.ai/api/v1",
        embed: None,
        default_llm_model: "openai/gpt-4o-mini",
        build_llm: build_openai_llm,
    },
];

/// Look up a provider by name (case-insensitive)
pub fn lookup(name: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
}

/// Names of every registered provider
pub fn provider_names() -> Vec<&'static str> {
    PROVIDERS.iter().map(|p| p.name).collect()
}

fn require(name: &str) -> Result<&'static ProviderSpec> {
    lookup(name).ok_or_else(|| {
        Error::Config(format!(
            "Unknown provider '{}'; expected one of: {}",
            name,
            provider_names().join(", ")
        ))
    })
}

fn settings(spec: &ProviderSpec, config: &ModelConfig, default_model: &str) -> ModelSettings {
    ModelSettings {
        endpoint: config
            .endpoint
            .clone()
            .unwrap_or_else(|| spec.default_endpoint.to_string()),
        model: config
            .model
            .clone()
            .unwrap_or_else(|| default_model.to_string()),
        api_key: config.api_key(),
        timeout: config.timeout(),
    }
}

/// Embedding model name after applying the provider default
pub fn resolved_embed_model(config: &ModelConfig) -> Result<String> {
    if let Some(model) = &config.model {
        return Ok(model.clone());
    }
    let spec = require(&config.provider)?;
    spec.embed
        .as_ref()
        .map(|e| e.default_model.to_string())
        .ok_or_else(|| {
            Error::Config(format!(
                "Provider '{}' does not offer embedding models",
                spec.name
            ))
        })
}

/// Build the configured embedding model
pub fn build_embed_model(config: &ModelConfig) -> Result<Arc<dyn EmbedModel>> {
    let spec = require(&config.provider)?;
    let embed = spec.embed.as_ref().ok_or_else(|| {
        Error::Config(format!(
            "Provider '{}' does not offer embedding models",
            spec.name
        ))
    })?;
    let settings = settings(spec, config, embed.default_model);
    debug!(
        "Embedding model: {} via {} ({})",
        settings.model, spec.name, settings.endpoint
    );
    (embed.build)(&settings)
}

/// Build the configured LLM
pub fn build_llm_model(config: &ModelConfig) -> Result<Arc<dyn LlmModel>> {
    let spec = require(&config.provider)?;
    let settings = settings(spec, config, spec.default_llm_model);
    debug!(
        "LLM: {} via {} ({})",
        settings.model, spec.name, settings.endpoint
    );
    (spec.build_llm)(&settings)
}

/// HTTP client shared by the provider implementations
pub(crate) fn http_client(settings: &ModelSettings) -> Result<Client> {
    Ok(Client::builder().timeout(settings.timeout).build()?)
}

/// Join a relative API path onto a base endpoint
pub(crate) fn endpoint_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Send a request, retrying transport and server errors, and decode JSON
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    retries: usize,
) -> Result<T> {
    let mut last_err: Option<Error> = None;
    for attempt in 0..=retries {
        let req = request
            .try_clone()
            .ok_or_else(|| Error::Provider("Failed to clone provider request".to_string()))?;

        match req.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json::<T>()
                        .await
                        .map_err(|e| Error::Provider(format!("Invalid provider response: {}", e)));
                }
                let body = response.text().await.unwrap_or_default();
                let err = Error::Provider(format!("HTTP {}: {}", status, body.trim()));
                if !status.is_server_error() {
                    return Err(err);
                }
                last_err = Some(err);
            }
            Err(e) => last_err = Some(Error::Provider(e.to_string())),
        }

        if attempt < retries {
            tokio::time::sleep(Duration::from_millis(200 * (attempt + 1) as u64)).await;
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Provider("Provider request failed".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        assert_eq!(lookup("OpenAI").unwrap().name, "openai");
        assert!(lookup("openrouter").unwrap().embed.is_none());
        assert!(lookup("nope").is_none());
        assert_eq!(
            provider_names(),
            vec!["openai", "ollama", "dashscope", "openrouter"]
        );
    }

    #[test]
    fn test_provider_defaults_apply() {
        let config = ModelConfig {
            provider: "ollama".to_string(),
            ..ModelConfig::default()
        };
        assert_eq!(resolved_embed_model(&config).unwrap(), "nomic-embed-text");

        let spec = lookup("ollama").unwrap();
        let s = settings(spec, &config, spec.default_llm_model);
        assert_eq!(s.endpoint, "http://localhost:11434");
        assert_eq!(s.model, "llama3");

        let custom = ModelConfig {
            provider: "dashscope".to_string(),
            model: Some("my-embed".to_string()),
            endpoint: Some("http://proxy:8080/v1".to_string()),
            ..ModelConfig::default()
        };
        assert_eq!(resolved_embed_model(&custom).unwrap(), "my-embed");
        let spec = lookup("dashscope").unwrap();
        assert_eq!(settings(spec, &custom, "x").endpoint, "http://proxy:8080/v1");
    }

    #[test]
    fn test_build_rejects_llm_only_provider_for_embedding() {
        let config = ModelConfig {
            provider: "openrouter".to_string(),
            ..ModelConfig::default()
        };
        assert!(matches!(build_embed_model(&config), Err(Error::Config(_))));
        assert!(build_llm_model(&config).is_ok());
        assert!(resolved_embed_model(&config).is_err());
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(
            endpoint_url("https://api.openai.com/v1/", "/embeddings"),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            endpoint_url("http://localhost:11434", "api/embed"),
            "http://localhost:11434/api/embed"
        );
    }
}
