use crate::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;

    /// Questions go through the same mapping as chunks so distances compare.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.embed(text).await
    }
}

/// Rejects vectors that would poison distance computations.
pub fn check_embedding(vector: &[f32], expected: usize) -> Result<(), ModelError> {
    if vector.len() != expected {
        return Err(ModelError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|value| !value.is_finite()) {
        return Err(ModelError::NonFinite);
    }
    Ok(())
}

/// Joins `path` under `base_url`, keeping any path prefix the base already has.
pub(crate) fn api_url(base_url: &str, path: &str) -> Result<Url, ModelError> {
    let base = if base_url.ends_with('/') {
        Url::parse(base_url)?
    } else {
        Url::parse(&format!("{base_url}/"))?
    };
    Ok(base.join(path)?)
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        Ok(self.embed_sync(text))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Embeddings from an Ollama-compatible `/api/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let endpoint = api_url(base_url, "api/embeddings")?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
            dimensions,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Asks the backend for one vector without checking its length.
    pub async fn probe_dimensions(&self) -> Result<usize, ModelError> {
        Ok(self.request("dimension probe").await?.len())
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbedRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ModelError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: EmbedResponse = response.json().await?;
        Ok(parsed.embedding)
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let vector = self.request(text).await?;
        check_embedding(&vector, self.dimensions)?;
        Ok(vector)
    }
}
