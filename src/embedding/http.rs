//! HTTP embedding providers: Ollama and OpenAI-compatible servers.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{apply_prefix, check_count, check_dimensions, Embedder, EmbeddingRole};
use crate::{EmbeddingModelConfig, Error, Provider, Result};

/// Embedder that calls a remote model server.
///
/// | Provider | Request | Response |
/// |----------|---------|----------|
/// | `Ollama` | `POST {endpoint}/api/embed` `{model, input}` | `{embeddings}` |
/// | `OpenAiCompatible` | `POST {endpoint}/embeddings` `{model, input}` | `{data: [{embedding, index}]}` |
///
/// For OpenAI-style servers the endpoint includes the API version prefix,
/// e.g. `http://localhost:1234/v1`.
pub struct HttpEmbedder {
    client: Client,
    model: EmbeddingModelConfig,
    api_key: Option<String>,
}

impl HttpEmbedder {
    /// Create an embedder for an HTTP provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModelConfig`] for [`Provider::Local`] models.
    pub fn new(model: EmbeddingModelConfig, api_key: Option<String>) -> Result<Self> {
        if model.provider() == Provider::Local {
            return Err(Error::InvalidModelConfig(format!(
                "model {:?} is local; use LocalEmbedder",
                model.name()
            )));
        }
        Ok(Self {
            client: Client::new(),
            model,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    async fn post_ollama(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: self.model.name(),
            input,
        };
        let response = self
            .client
            .post(format!("{}/api/embed", self.model.endpoint()))
            .json(&request)
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let parsed: OllamaEmbedResponse = response.json().await?;
        Ok(parsed.embeddings)
    }

    async fn post_openai(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: self.model.name(),
            input,
        };
        let mut builder = self
            .client
            .post(format!("{}/embeddings", self.model.endpoint()))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = error_for_status(builder.send().await?).await?;
        let mut parsed: OpenAiEmbedResponse = response.json().await?;

        // Servers may answer out of order
        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String], role: EmbeddingRole) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let input = apply_prefix(&self.model, texts, role);
        debug!(model = self.model.name(), count = texts.len(), ?role, "embedding batch");

        let vectors = match self.model.provider() {
            Provider::Ollama => self.post_ollama(input).await?,
            Provider::OpenAiCompatible => self.post_openai(input).await?,
            Provider::Local => {
                return Err(Error::InvalidModelConfig("local model behind HttpEmbedder".into()))
            }
        };

        check_count(texts.len(), vectors.len())?;
        check_dimensions(self.model.dimensions(), &vectors)?;
        Ok(vectors)
    }

    fn model(&self) -> &EmbeddingModelConfig {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedItem>,
}

#[derive(Deserialize)]
struct OpenAiEmbedItem {
    embedding: Vec<f32>,
    index: usize,
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Embedding(format!("{status}: {body}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_local_model() {
        let model = EmbeddingModelConfig::builder("bge-small", Provider::Local, 384)
            .build()
            .unwrap();
        assert!(matches!(
            HttpEmbedder::new(model, None),
            Err(Error::InvalidModelConfig(_))
        ));
    }

    #[test]
    fn test_dimension_check() {
        assert!(check_dimensions(3, &[vec![0.0; 3], vec![1.0; 3]]).is_ok());
        assert!(matches!(
            check_dimensions(3, &[vec![0.0; 3], vec![1.0; 2]]),
            Err(Error::DimensionMismatch { left: 3, right: 2 })
        ));
    }

    #[test]
    fn test_openai_response_order_restored() {
        let json = r#"{"data":[{"embedding":[2.0],"index":1},{"embedding":[1.0],"index":0}]}"#;
        let mut parsed: OpenAiEmbedResponse = serde_json::from_str(json).unwrap();
        parsed.data.sort_by_key(|item| item.index);
        assert_eq!(parsed.data[0].embedding, [1.0]);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_request() {
        let model = EmbeddingModelConfig::builder("nomic-embed-text", Provider::Ollama, 768)
            .endpoint("http://127.0.0.1:9")
            .build()
            .unwrap();
        let embedder = HttpEmbedder::new(model, None).unwrap();
        assert!(embedder.embed(&[], EmbeddingRole::Query).await.unwrap().is_empty());
    }
}
