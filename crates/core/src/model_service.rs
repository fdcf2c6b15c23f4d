use crate::embeddings::{
    check_embedding, CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
use crate::error::ModelError;
use crate::generation::{ExtractiveGenerator, Generator, GroundedPrompt, OllamaGenerator};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Ngram {
        dimensions: usize,
    },
    Ollama {
        base_url: String,
        model: String,
        /// Probed from the backend when absent.
        dimensions: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GenerationBackend {
    Extractive,
    Ollama { base_url: String, model: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub embedding: EmbeddingBackend,
    pub generation: GenerationBackend,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingBackend::Ngram {
                dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            },
            generation: GenerationBackend::Extractive,
            request_timeout_secs: 120,
        }
    }
}

pub struct ModelService {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    running: AtomicBool,
}

impl ModelService {
    pub async fn init(config: &ModelConfig) -> Result<Self, ModelError> {
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));

        let embedder: Arc<dyn Embedder> = match &config.embedding {
            EmbeddingBackend::Ngram { dimensions } => Arc::new(CharacterNgramEmbedder {
                dimensions: *dimensions,
            }),
            EmbeddingBackend::Ollama {
                base_url,
                model,
                dimensions,
            } => {
                let client =
                    OllamaEmbedder::new(base_url, model.as_str(), dimensions.unwrap_or(0), timeout)?;
                let dimensions = match dimensions {
                    Some(dimensions) => *dimensions,
                    None => client.probe_dimensions().await?,
                };
                Arc::new(client.with_dimensions(dimensions))
            }
        };

        let generator: Arc<dyn Generator> = match &config.generation {
            GenerationBackend::Extractive => Arc::new(ExtractiveGenerator),
            GenerationBackend::Ollama { base_url, model } => {
                Arc::new(OllamaGenerator::new(base_url, model.as_str(), timeout)?)
            }
        };

        info!(dimensions = embedder.dimensions(), "model service initialized");
        Ok(Self::from_parts(embedder, generator))
    }

    pub fn from_parts(embedder: Arc<dyn Embedder>, generator: Arc<dyn Generator>) -> Self {
        Self {
            embedder,
            generator,
            running: AtomicBool::new(true),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("model service shut down");
        }
    }

    fn ensure_running(&self) -> Result<(), ModelError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ModelError::ShutDown)
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.ensure_running()?;
        let vector = self.embedder.embed(text).await?;
        check_embedding(&vector, self.dimensions())?;
        Ok(vector)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.ensure_running()?;
        let vector = self.embedder.embed_query(text).await?;
        check_embedding(&vector, self.dimensions())?;
        Ok(vector)
    }

    pub async fn generate(&self, prompt: &GroundedPrompt, max_tokens: usize) -> Result<String, ModelError> {
        self.ensure_running()?;
        self.generator.generate(prompt, max_tokens).await
    }
}
