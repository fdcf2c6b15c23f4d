use crate::chunking::{chunk_pages, ChunkingConfig};
use crate::error::RagError;
use crate::extractor::{join_pages, PageText, TextExtractor};
use crate::model_service::ModelService;
use crate::models::{Document, IngestOutcome, NewChunk};
use crate::source::BlobStore;
use crate::traits::ChunkStore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if has_pdf_extension(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Extract, chunk, embed and store one document.
///
/// Each step gates the next; the chunk store is only written once every
/// chunk has an embedding, so a failed run leaves the previous chunk set
/// in place.
pub struct IngestionPipeline {
    extractor: Arc<dyn TextExtractor>,
    models: Arc<ModelService>,
    chunks: Arc<dyn ChunkStore>,
    blobs: Arc<dyn BlobStore>,
    chunking: ChunkingConfig,
}

impl IngestionPipeline {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        models: Arc<ModelService>,
        chunks: Arc<dyn ChunkStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            extractor,
            models,
            chunks,
            blobs,
            chunking: ChunkingConfig::default(),
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Result<Self, RagError> {
        chunking.validate()?;
        self.chunking = chunking;
        Ok(self)
    }

    pub fn chunking(&self) -> ChunkingConfig {
        self.chunking
    }

    pub async fn ingest(&self, document: &Document) -> Result<IngestOutcome, RagError> {
        let started = Instant::now();

        let pages = self.extract(document).await;
        if join_pages(&pages).is_empty() {
            return Err(RagError::ExtractionEmpty);
        }

        let pieces = chunk_pages(&pages, self.chunking);
        if pieces.is_empty() {
            return Err(RagError::ChunkingEmpty);
        }
        debug!(document_id = %document.id, chunks = pieces.len(), "chunked document");

        let mut embedded = Vec::with_capacity(pieces.len());
        for (position, piece) in pieces.into_iter().enumerate() {
            let embedding = self.models.embed(&piece.text).await.map_err(|error| {
                warn!(document_id = %document.id, chunk = position, %error, "embedding failed");
                RagError::EmbeddingFailure(error.to_string())
            })?;
            embedded.push(NewChunk {
                text: piece.text,
                embedding,
                page_number: piece.page_number,
            });
        }

        let chunks_created = self.chunks.replace_chunks(document.id, &embedded).await?;

        info!(
            document_id = %document.id,
            chunks_created,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "document ingested"
        );
        Ok(IngestOutcome { chunks_created })
    }

    /// Unreadable or missing files come back as no pages.
    async fn extract(&self, document: &Document) -> Vec<PageText> {
        let source = match self.blobs.source(&document.file).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                warn!(document_id = %document.id, file = document.file.as_str(), "file missing from blob store");
                return Vec::new();
            }
            Err(error) => {
                warn!(document_id = %document.id, %error, "could not open file");
                return Vec::new();
            }
        };

        let extractor = Arc::clone(&self.extractor);
        tokio::task::spawn_blocking(move || extractor.extract_pages(source.as_ref()))
            .await
            .unwrap_or_else(|error| {
                warn!(document_id = %document.id, %error, "extraction task failed");
                Vec::new()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{CharacterNgramEmbedder, Embedder};
    use crate::error::ModelError;
    use crate::generation::ExtractiveGenerator;
    use crate::models::{DocumentId, FileRef, OwnerId, ProcessingStatus};
    use crate::source::{ByteSource, MemoryBlobStore};
    use crate::stores::MemoryStore;
    use crate::traits::DocumentStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::fs::{self, File};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct FixedPages(Vec<PageText>);

    impl TextExtractor for FixedPages {
        fn extract_pages(&self, _source: &dyn ByteSource) -> Vec<PageText> {
            self.0.clone()
        }
    }

    /// Fails on the n-th call (1-based).
    struct FailingEmbedder {
        fail_on: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn dimensions(&self) -> usize {
            8
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(ModelError::BackendResponse {
                    backend: "test".to_string(),
                    details: "model crashed".to_string(),
                });
            }
            Ok(CharacterNgramEmbedder { dimensions: 8 }.embed_sync(text))
        }
    }

    fn words(count: usize) -> String {
        (0..count).map(|index| format!("w{index}")).collect::<Vec<_>>().join(" ")
    }

    async fn setup(
        pages: Vec<PageText>,
        embedder: Arc<dyn Embedder>,
    ) -> (IngestionPipeline, Arc<MemoryStore>, Document) {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let file = blobs.put("doc.pdf", b"%PDF".to_vec()).await.expect("blob stored");
        let document = Document {
            id: DocumentId::new(),
            owner: OwnerId::new("ana"),
            file,
            title: "doc.pdf".to_string(),
            checksum: digest_bytes(b"%PDF"),
            uploaded_at: Utc::now(),
            processing_status: ProcessingStatus::Pending,
            processing_error: None,
            processed_at: None,
        };
        store.insert_document(&document).await.expect("document stored");

        let models = Arc::new(ModelService::from_parts(embedder, Arc::new(ExtractiveGenerator)));
        let pipeline = IngestionPipeline::new(
            Arc::new(FixedPages(pages)),
            models,
            store.clone(),
            blobs,
        );
        (pipeline, store, document)
    }

    fn page(number: u32, text: String) -> PageText {
        PageText { number, text }
    }

    #[tokio::test]
    async fn ingest_stores_ordered_chunks_with_pages() -> Result<(), RagError> {
        let (pipeline, store, document) = setup(
            vec![page(1, words(150)), page(2, words(150))],
            Arc::new(CharacterNgramEmbedder::default()),
        )
        .await;

        let outcome = pipeline.ingest(&document).await?;
        assert_eq!(outcome.chunks_created, 2);

        let chunks = store.list_chunks(document.id).await?;
        assert_eq!(chunks.iter().map(|chunk| chunk.order).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(chunks[0].page_number, Some(1));
        assert_eq!(chunks[1].page_number, Some(2));
        assert_eq!(chunks[0].chunk_text.split_whitespace().count(), 200);
        Ok(())
    }

    #[tokio::test]
    async fn ingest_is_idempotent() -> Result<(), RagError> {
        let (pipeline, store, document) = setup(
            vec![page(1, words(500))],
            Arc::new(CharacterNgramEmbedder::default()),
        )
        .await;

        pipeline.ingest(&document).await?;
        let first = store.list_chunks(document.id).await?;
        pipeline.ingest(&document).await?;
        let second = store.list_chunks(document.id).await?;

        let view = |chunks: &[crate::models::Chunk]| {
            chunks
                .iter()
                .map(|chunk| (chunk.order, chunk.chunk_text.clone(), chunk.embedding.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(view(&first), view(&second));
        Ok(())
    }

    #[tokio::test]
    async fn blank_extraction_fails_and_leaves_previous_chunks() -> Result<(), RagError> {
        let (pipeline, store, document) =
            setup(vec![page(1, "  \n ".to_string())], Arc::new(CharacterNgramEmbedder::default())).await;
        store
            .replace_chunks(
                document.id,
                &[NewChunk {
                    text: "earlier".to_string(),
                    embedding: vec![0.0; 128],
                    page_number: None,
                }],
            )
            .await?;

        let error = pipeline.ingest(&document).await.expect_err("blank text must fail");
        assert!(matches!(error, RagError::ExtractionEmpty));
        assert!(!error.is_retriable());
        assert_eq!(error.to_string(), "no extractable text");
        assert_eq!(store.list_chunks(document.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn first_embedding_failure_aborts_without_writing() -> Result<(), RagError> {
        let embedder = Arc::new(FailingEmbedder {
            fail_on: 3,
            calls: AtomicUsize::new(0),
        });
        let (pipeline, store, document) = setup(vec![page(1, words(700))], embedder).await;

        let error = pipeline.ingest(&document).await.expect_err("embedding must fail");
        assert!(matches!(error, RagError::EmbeddingFailure(_)));
        assert!(error.is_retriable());
        assert!(error.to_string().starts_with("embedding failed: "));
        assert!(!store.has_chunks(document.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_counts_as_no_text() {
        let (pipeline, _store, mut document) =
            setup(vec![page(1, words(10))], Arc::new(CharacterNgramEmbedder::default())).await;
        document.file = FileRef("gone.pdf".to_string());

        // The fixed extractor is never reached: the blob lookup comes back empty.
        let error = pipeline.ingest(&document).await.expect_err("missing file must fail");
        assert!(matches!(error, RagError::ExtractionEmpty));
    }

    #[test]
    fn zero_word_chunks_are_refused() {
        let store = Arc::new(MemoryStore::new());
        let models = Arc::new(ModelService::from_parts(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(ExtractiveGenerator),
        ));
        let pipeline = IngestionPipeline::new(
            Arc::new(FixedPages(Vec::new())),
            models,
            store,
            Arc::new(MemoryBlobStore::new()),
        );
        assert!(pipeline
            .with_chunking(ChunkingConfig {
                chunk_size_words: 0,
                overlap_words: 0
            })
            .is_err());
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }
}
