use crate::error::RagError;
use crate::generation::{GroundedPrompt, DEFAULT_MAX_ANSWER_TOKENS};
use crate::model_service::ModelService;
use crate::models::{Answer, Chunk, Document, RetrievedPassage};
use crate::processing::DocumentProcessor;
use crate::search::{search, DEFAULT_TOP_K};
use crate::traits::ChunkStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub top_k: usize,
    pub max_answer_tokens: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_answer_tokens: DEFAULT_MAX_ANSWER_TOKENS,
        }
    }
}

impl QueryOptions {
    pub fn validate(&self) -> Result<(), RagError> {
        if self.top_k == 0 {
            return Err(RagError::InvalidConfig("top_k must be positive".to_string()));
        }
        if self.max_answer_tokens == 0 {
            return Err(RagError::InvalidConfig("max_answer_tokens must be positive".to_string()));
        }
        Ok(())
    }
}

/// Reads a stored embedding back into a vector.
///
/// Accepts a JSON array of numbers, or a JSON string holding such an array.
/// Anything else (empty, non-numeric, non-finite) is `None`.
pub fn parse_embedding(value: &Value) -> Option<Vec<f32>> {
    match value {
        Value::Array(items) => numbers(items),
        Value::String(text) => match serde_json::from_str::<Value>(text).ok()? {
            Value::Array(items) => numbers(&items),
            _ => None,
        },
        _ => None,
    }
}

fn numbers(items: &[Value]) -> Option<Vec<f32>> {
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|item| {
            let number = item.as_f64()? as f32;
            number.is_finite().then_some(number)
        })
        .collect()
}

/// Answers questions about one document from its stored chunks.
pub struct QueryEngine {
    chunks: Arc<dyn ChunkStore>,
    processor: Arc<DocumentProcessor>,
    models: Arc<ModelService>,
    options: QueryOptions,
}

impl QueryEngine {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        processor: Arc<DocumentProcessor>,
        models: Arc<ModelService>,
        options: QueryOptions,
    ) -> Self {
        Self {
            chunks,
            processor,
            models,
            options,
        }
    }

    pub fn options(&self) -> QueryOptions {
        self.options
    }

    pub async fn answer(&self, document: &Document, question: &str) -> Result<Answer, RagError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidArgument("question is empty".to_string()));
        }

        if !self.chunks.has_chunks(document.id).await? {
            info!(document_id = %document.id, "document has no chunks, processing before answering");
            self.processor.trigger_processing(document.id).await?;
        }

        let (chunks, vectors) = self.searchable_chunks(document).await?;
        if vectors.is_empty() {
            return Err(RagError::NoValidEmbeddings);
        }

        let query_vector = self
            .models
            .embed_query(question)
            .await
            .map_err(|error| RagError::EmbeddingFailure(error.to_string()))?;

        let neighbors = search(&query_vector, &vectors, self.options.top_k)
            .map_err(|error| RagError::Internal(error.to_string()))?;

        let passages: Vec<RetrievedPassage> = neighbors
            .iter()
            .map(|neighbor| {
                let chunk = &chunks[neighbor.index];
                RetrievedPassage {
                    order: chunk.order,
                    page_number: chunk.page_number,
                    distance: neighbor.distance,
                    text: chunk.chunk_text.clone(),
                }
            })
            .collect();
        debug!(
            document_id = %document.id,
            retrieved = ?passages.iter().map(|passage| passage.order).collect::<Vec<_>>(),
            "passages retrieved"
        );

        let prompt = GroundedPrompt::new(
            passages.iter().map(|passage| passage.text.clone()).collect(),
            question,
        );
        let answer = self
            .models
            .generate(&prompt, self.options.max_answer_tokens)
            .await
            .map_err(|error| RagError::GenerationFailure(error.to_string()))?;

        Ok(Answer { answer, passages })
    }

    /// Chunks with a usable embedding of the model's dimension, paired with their vectors.
    async fn searchable_chunks(&self, document: &Document) -> Result<(Vec<Chunk>, Vec<Vec<f32>>), RagError> {
        let dimensions = self.models.dimensions();
        let mut kept = Vec::new();
        let mut vectors = Vec::new();

        for chunk in self.chunks.list_chunks(document.id).await? {
            let Some(vector) = chunk.embedding.as_ref().and_then(parse_embedding) else {
                warn!(document_id = %document.id, chunk = chunk.order, "skipping chunk with malformed embedding");
                continue;
            };
            if vector.len() != dimensions {
                warn!(
                    document_id = %document.id,
                    chunk = chunk.order,
                    expected = dimensions,
                    actual = vector.len(),
                    "skipping chunk embedded with another dimension"
                );
                continue;
            }
            vectors.push(vector);
            kept.push(chunk);
        }

        Ok((kept, vectors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{CharacterNgramEmbedder, Embedder};
    use crate::error::{ModelError, StoreError};
    use crate::extractor::{PageText, TextExtractor};
    use crate::generation::Generator;
    use crate::ingest::IngestionPipeline;
    use crate::models::{DocumentId, NewChunk, OwnerId, ProcessingStatus};
    use crate::source::{BlobStore, ByteSource, MemoryBlobStore};
    use crate::stores::MemoryStore;
    use crate::traits::DocumentStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    struct FixedText(String);

    impl TextExtractor for FixedText {
        fn extract_pages(&self, _source: &dyn ByteSource) -> Vec<PageText> {
            vec![PageText {
                number: 1,
                text: self.0.clone(),
            }]
        }
    }

    /// Embeds "a", "b", "c"... as one-hot vectors so distances are predictable.
    struct Letters;

    #[async_trait]
    impl Embedder for Letters {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
            Ok(match text.trim().chars().next() {
                Some('a') => vec![1.0, 0.0, 0.0],
                Some('b') => vec![0.0, 1.0, 0.0],
                _ => vec![0.0, 0.0, 1.0],
            })
        }
    }

    #[derive(Default)]
    struct Recording {
        prompts: Mutex<Vec<GroundedPrompt>>,
    }

    #[async_trait]
    impl Generator for Recording {
        async fn generate(&self, prompt: &GroundedPrompt, _max_tokens: usize) -> Result<String, ModelError> {
            self.prompts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(prompt.clone());
            Ok(format!("answered from {} passages", prompt.passages.len()))
        }
    }

    struct Broken;

    #[async_trait]
    impl Generator for Broken {
        async fn generate(&self, _prompt: &GroundedPrompt, _max_tokens: usize) -> Result<String, ModelError> {
            Err(ModelError::BackendResponse {
                backend: "test".to_string(),
                details: "out of memory".to_string(),
            })
        }
    }

    /// Chunk store whose rows are written by hand, malformed ones included.
    struct HandWritten(Vec<Chunk>);

    #[async_trait]
    impl ChunkStore for HandWritten {
        async fn replace_chunks(&self, _id: DocumentId, _chunks: &[NewChunk]) -> Result<usize, StoreError> {
            Ok(0)
        }

        async fn list_chunks(&self, _id: DocumentId) -> Result<Vec<Chunk>, StoreError> {
            Ok(self.0.clone())
        }

        async fn has_chunks(&self, _id: DocumentId) -> Result<bool, StoreError> {
            Ok(!self.0.is_empty())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        document: Document,
        processor: Arc<DocumentProcessor>,
        models: Arc<ModelService>,
    }

    async fn fixture(text: &str, embedder: Arc<dyn Embedder>, generator: Arc<dyn Generator>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let file = blobs.put("notes.pdf", b"%PDF".to_vec()).await.expect("blob stored");
        let document = Document {
            id: DocumentId::new(),
            owner: OwnerId::new("ana"),
            file,
            title: "notes.pdf".to_string(),
            checksum: String::new(),
            uploaded_at: Utc::now(),
            processing_status: ProcessingStatus::Pending,
            processing_error: None,
            processed_at: None,
        };
        store.insert_document(&document).await.expect("document stored");

        let models = Arc::new(ModelService::from_parts(embedder, generator));
        let pipeline = IngestionPipeline::new(
            Arc::new(FixedText(text.to_string())),
            Arc::clone(&models),
            store.clone(),
            blobs,
        );
        let processor = Arc::new(DocumentProcessor::new(store.clone(), store.clone(), Arc::new(pipeline)));
        Fixture {
            store,
            document,
            processor,
            models,
        }
    }

    fn chunk(order: u32, text: &str, embedding: Option<Value>) -> Chunk {
        Chunk {
            id: i64::from(order) + 1,
            document_id: DocumentId::new(),
            chunk_text: text.to_string(),
            embedding,
            order,
            page_number: Some(1),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn parse_embedding_accepts_arrays_and_json_strings() {
        assert_eq!(parse_embedding(&json!([1, 2.5, -3])), Some(vec![1.0, 2.5, -3.0]));
        assert_eq!(parse_embedding(&json!("[0.5, 0.25]")), Some(vec![0.5, 0.25]));
    }

    #[test]
    fn parse_embedding_rejects_malformed_values() {
        for value in [
            json!([]),
            json!("[]"),
            json!(["a", "b"]),
            json!([1.0, null]),
            json!("not-a-vector"),
            json!({"values": [1.0]}),
            json!(3.0),
            json!([1e300]),
            Value::Null,
        ] {
            assert_eq!(parse_embedding(&value), None, "{value} should be rejected");
        }
    }

    #[tokio::test]
    async fn question_without_chunks_triggers_processing_first() -> Result<(), RagError> {
        let fixture = fixture(
            "the answer is forty two",
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(Recording::default()),
        )
        .await;
        let engine = QueryEngine::new(
            fixture.store.clone(),
            fixture.processor.clone(),
            fixture.models.clone(),
            QueryOptions::default(),
        );

        let answer = engine.answer(&fixture.document, "what is the answer?").await?;
        assert_eq!(answer.answer, "answered from 1 passages");
        assert_eq!(answer.passages.len(), 1);

        let stored = fixture
            .store
            .get_document(fixture.document.id)
            .await?
            .expect("document exists");
        assert_eq!(stored.processing_status, ProcessingStatus::Done);
        Ok(())
    }

    #[tokio::test]
    async fn failed_recovery_is_surfaced() {
        let fixture = fixture(" ", Arc::new(CharacterNgramEmbedder::default()), Arc::new(Recording::default())).await;
        let engine = QueryEngine::new(
            fixture.store.clone(),
            fixture.processor.clone(),
            fixture.models.clone(),
            QueryOptions::default(),
        );

        let error = engine
            .answer(&fixture.document, "anything?")
            .await
            .expect_err("nothing to answer from");
        assert_eq!(error.to_string(), "no extractable text");
    }

    #[tokio::test]
    async fn malformed_embeddings_are_skipped_and_top_k_bounds_the_prompt() -> Result<(), RagError> {
        let recording = Arc::new(Recording::default());
        let fixture = fixture("unused", Arc::new(Letters), recording.clone()).await;
        let rows = HandWritten(vec![
            chunk(0, "a first", Some(json!([1.0, 0.0, 0.0]))),
            chunk(1, "broken", Some(json!("not-a-vector"))),
            chunk(2, "b second", Some(json!("[0.0, 1.0, 0.0]"))),
            chunk(3, "wrong size", Some(json!([1.0, 0.0]))),
            chunk(4, "c third", Some(json!([0.0, 0.0, 1.0]))),
            chunk(5, "missing", None),
        ]);
        let engine = QueryEngine::new(
            Arc::new(rows),
            fixture.processor.clone(),
            fixture.models.clone(),
            QueryOptions {
                top_k: 2,
                max_answer_tokens: 50,
            },
        );

        let answer = engine.answer(&fixture.document, "b?").await?;
        let orders: Vec<u32> = answer.passages.iter().map(|passage| passage.order).collect();
        assert_eq!(orders[0], 2);
        assert_eq!(orders.len(), 2);
        assert_eq!(answer.passages[0].distance, 0.0);

        let prompts = recording.prompts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].passages[0], "b second");
        assert!(!prompts[0].passages.iter().any(|text| text == "broken" || text == "wrong size"));
        Ok(())
    }

    #[tokio::test]
    async fn only_malformed_embeddings_means_no_valid_embeddings() {
        let fixture = fixture("unused", Arc::new(Letters), Arc::new(Recording::default())).await;
        let rows = HandWritten(vec![
            chunk(0, "one", Some(json!("not-a-vector"))),
            chunk(1, "two", Some(json!([]))),
        ]);
        let engine = QueryEngine::new(
            Arc::new(rows),
            fixture.processor.clone(),
            fixture.models.clone(),
            QueryOptions::default(),
        );

        let error = engine.answer(&fixture.document, "a?").await.expect_err("nothing searchable");
        assert!(matches!(error, RagError::NoValidEmbeddings));
        assert_eq!(error.to_string(), "no valid embeddings");
    }

    #[tokio::test]
    async fn generator_failures_are_structured() -> Result<(), RagError> {
        let fixture = fixture("some text here", Arc::new(CharacterNgramEmbedder::default()), Arc::new(Broken)).await;
        fixture.processor.trigger_processing(fixture.document.id).await?;
        let engine = QueryEngine::new(
            fixture.store.clone(),
            fixture.processor.clone(),
            fixture.models.clone(),
            QueryOptions::default(),
        );

        let error = engine.answer(&fixture.document, "text?").await.expect_err("generator is down");
        assert!(matches!(error, RagError::GenerationFailure(_)));
        assert!(error.is_retriable());
        Ok(())
    }

    #[tokio::test]
    async fn blank_questions_are_rejected_before_any_work() {
        let fixture = fixture(" ", Arc::new(CharacterNgramEmbedder::default()), Arc::new(Recording::default())).await;
        let engine = QueryEngine::new(
            fixture.store.clone(),
            fixture.processor.clone(),
            fixture.models.clone(),
            QueryOptions::default(),
        );

        let error = engine.answer(&fixture.document, "   ").await.expect_err("blank question");
        assert!(matches!(error, RagError::InvalidArgument(_)));
        let stored = fixture.store.get_document(fixture.document.id).await.ok().flatten();
        assert_eq!(
            stored.map(|document| document.processing_status),
            Some(ProcessingStatus::Pending)
        );
    }

    #[test]
    fn options_reject_zero_top_k_and_token_budget() {
        assert!(QueryOptions::default().validate().is_ok());
        assert!(matches!(
            QueryOptions { top_k: 0, ..QueryOptions::default() }.validate(),
            Err(RagError::InvalidConfig(_))
        ));
        assert!(matches!(
            QueryOptions { max_answer_tokens: 0, ..QueryOptions::default() }.validate(),
            Err(RagError::InvalidConfig(_))
        ));
    }
}
