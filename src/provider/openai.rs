//! OpenAI-compatible `/embeddings` and `/chat/completions` clients

use super::{endpoint_url, http_client, send_json, EmbedModel, LlmModel, ModelSettings};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const RETRIES: usize = 2;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn authorized(request: reqwest::RequestBuilder, api_key: Option<&str>) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

/// Embedding model behind an OpenAI-compatible API
pub struct OpenAiEmbed {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbed {
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        Ok(Self {
            client: http_client(settings)?,
            url: endpoint_url(&settings.endpoint, "embeddings"),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl EmbedModel for OpenAiEmbed {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();

        let request = self.client.post(&self.url).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        let mut response: EmbeddingResponse =
            send_json(authorized(request, self.api_key.as_deref()), RETRIES).await?;

        response.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        if response.data.len() != expected {
            return Err(Error::Provider(format!(
                "Expected {} embeddings from '{}', got {}",
                expected,
                self.model,
                response.data.len()
            )));
        }
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Chat model behind an OpenAI-compatible API
pub struct OpenAiLlm {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiLlm {
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        Ok(Self {
            client: http_client(settings)?,
            url: endpoint_url(&settings.endpoint, "chat/completions"),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl LlmModel for OpenAiLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = self.client.post(&self.url).json(&ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        });
        let response: ChatResponse =
            send_json(authorized(request, self.api_key.as_deref()), RETRIES).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Provider(format!("Empty completion from '{}'", self.model)))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
