//! Ollama `/api/embed` and `/api/generate` clients

use super::{endpoint_url, http_client, send_json, EmbedModel, LlmModel, ModelSettings};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const RETRIES: usize = 2;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaEmbed {
    client: Client,
    url: String,
    model: String,
}

impl OllamaEmbed {
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        Ok(Self {
            client: http_client(settings)?,
            url: endpoint_url(&settings.endpoint, "api/embed"),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl EmbedModel for OllamaEmbed {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();

        let request = self.client.post(&self.url).json(&EmbedRequest {
            model: &self.model,
            input: texts,
        });
        let response: EmbedResponse = send_json(request, RETRIES).await?;

        if response.embeddings.len() != expected {
            return Err(Error::Provider(format!(
                "Expected {} embeddings from '{}', got {}",
                expected,
                self.model,
                response.embeddings.len()
            )));
        }
        Ok(response.embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

pub struct OllamaLlm {
    client: Client,
    url: String,
    model: String,
}

impl OllamaLlm {
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        Ok(Self {
            client: http_client(settings)?,
            url: endpoint_url(&settings.endpoint, "api/generate"),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl LlmModel for OllamaLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = self.client.post(&self.url).json(&GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        });
        let response: GenerateResponse = send_json(request, RETRIES).await?;
        Ok(response.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer, model: &str) -> ModelSettings {
        ModelSettings {
            endpoint: server.uri(),
            model: model.to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(json!({"model": "nomic-embed-text", "input": ["x"]})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.5, 0.5]]})),
            )
            .mount(&server)
            .await;

        let model = OllamaEmbed::new(&settings(&server, "nomic-embed-text")).unwrap();
        assert_eq!(
            model.embed(vec!["x".to_string()]).await.unwrap(),
            vec![vec![0.5, 0.5]]
        );
        assert!(model.embed(Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embed_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": []})))
            .mount(&server)
            .await;

        let model = OllamaEmbed::new(&settings(&server, "nomic-embed-text")).unwrap();
        assert!(matches!(
            model.embed(vec!["x".to_string()]).await,
            Err(Error::Provider(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_disables_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"model": "llama3", "stream": false})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"response": "answer", "done": true})),
            )
            .mount(&server)
            .await;

        let llm = OllamaLlm::new(&settings(&server, "llama3")).unwrap();
        assert_eq!(llm.complete("q").await.unwrap(), "answer");
        assert_eq!(llm.model_name(), "llama3");
    }
}
