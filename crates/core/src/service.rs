use crate::chunking::ChunkingConfig;
use crate::error::{RagError, StoreError};
use crate::extractor::TextExtractor;
use crate::ingest::{digest_bytes, has_pdf_extension, IngestionPipeline};
use crate::model_service::ModelService;
use crate::models::{
    Answer, ChunkView, Document, DocumentId, DocumentSummary, OwnerId, ProcessingMode,
    ProcessingStatus,
};
use crate::processing::{BackfillEntry, DocumentProcessor};
use crate::query::{QueryEngine, QueryOptions};
use crate::source::BlobStore;
use crate::traits::{ChunkStore, DocumentStore};
use crate::worker::{ProcessingQueue, QueueOptions, QueueStats};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub chunking: ChunkingConfig,
    pub query: QueryOptions,
    pub queue: QueueOptions,
}

pub struct DocumentService {
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    blobs: Arc<dyn BlobStore>,
    models: Arc<ModelService>,
    processor: Arc<DocumentProcessor>,
    queries: QueryEngine,
    queue: ProcessingQueue,
}

impl DocumentService {
    /// Must be called inside a tokio runtime; the queue workers start here.
    pub fn start<S>(
        store: Arc<S>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        models: Arc<ModelService>,
        config: ServiceConfig,
    ) -> Result<Self, RagError>
    where
        S: DocumentStore + ChunkStore + 'static,
    {
        config.query.validate()?;
        let documents: Arc<dyn DocumentStore> = store.clone();
        let chunks: Arc<dyn ChunkStore> = store;

        let pipeline = IngestionPipeline::new(
            extractor,
            Arc::clone(&models),
            Arc::clone(&chunks),
            Arc::clone(&blobs),
        )
        .with_chunking(config.chunking)?;
        let processor = Arc::new(DocumentProcessor::new(
            Arc::clone(&documents),
            Arc::clone(&chunks),
            Arc::new(pipeline),
        ));
        let queries = QueryEngine::new(
            Arc::clone(&chunks),
            Arc::clone(&processor),
            Arc::clone(&models),
            config.query,
        );
        let queue = ProcessingQueue::start(Arc::clone(&processor), config.queue)?;

        Ok(Self {
            documents,
            chunks,
            blobs,
            models,
            processor,
            queries,
            queue,
        })
    }

    fn identity<'a>(requester: Option<&'a OwnerId>) -> Result<&'a OwnerId, RagError> {
        requester.ok_or(RagError::Unauthorized)
    }

    async fn authorize(&self, id: DocumentId, requester: Option<&OwnerId>) -> Result<Document, RagError> {
        let owner = Self::identity(requester)?;
        match self.documents.get_document(id).await? {
            Some(document) if &document.owner == owner => Ok(document),
            _ => Err(RagError::NotFound(format!("document {id}"))),
        }
    }

    pub async fn create_document(
        &self,
        requester: Option<&OwnerId>,
        file_bytes: Vec<u8>,
        title: &str,
    ) -> Result<Document, RagError> {
        let owner = Self::identity(requester)?;
        let title = title.trim();
        if file_bytes.is_empty() {
            return Err(RagError::InvalidArgument("file is empty".to_string()));
        }
        if !has_pdf_extension(Path::new(title)) {
            return Err(RagError::InvalidArgument(format!("{title:?} is not a .pdf file")));
        }

        let checksum = digest_bytes(&file_bytes);
        let file = self.blobs.put(title, file_bytes).await?;
        let document = Document {
            id: DocumentId::new(),
            owner: owner.clone(),
            file,
            title: title.to_string(),
            checksum,
            uploaded_at: Utc::now(),
            processing_status: ProcessingStatus::Pending,
            processing_error: None,
            processed_at: None,
        };
        self.documents.insert_document(&document).await?;

        info!(document_id = %document.id, owner = %owner, title, "document created");
        Ok(document)
    }

    /// Creates the document and queues it for background processing, waiting
    /// for room when the queue is full.
    ///
    /// After shutdown the document is still created, stays `pending`, and the
    /// call returns `QueueClosed`.
    pub async fn upload(
        &self,
        requester: Option<&OwnerId>,
        file_bytes: Vec<u8>,
        title: &str,
    ) -> Result<Document, RagError> {
        let document = self.create_document(requester, file_bytes, title).await?;
        if let Err(error) = self.queue.enqueue(document.id).await {
            warn!(document_id = %document.id, %error, "could not queue processing");
            return Err(error);
        }
        Ok(document)
    }

    pub async fn trigger_processing(
        &self,
        id: DocumentId,
        mode: ProcessingMode,
        requester: Option<&OwnerId>,
    ) -> Result<ProcessingStatus, RagError> {
        self.authorize(id, requester).await?;
        match mode {
            ProcessingMode::Sync => {
                self.processor.trigger_processing(id).await?;
                Ok(ProcessingStatus::Done)
            }
            ProcessingMode::Background => {
                self.queue.submit(id)?;
                Ok(ProcessingStatus::Pending)
            }
        }
    }

    pub async fn document(&self, id: DocumentId, requester: Option<&OwnerId>) -> Result<Document, RagError> {
        self.authorize(id, requester).await
    }

    pub async fn list_chunks(
        &self,
        id: DocumentId,
        requester: Option<&OwnerId>,
    ) -> Result<Vec<ChunkView>, RagError> {
        self.authorize(id, requester).await?;
        let chunks = self.chunks.list_chunks(id).await?;
        Ok(chunks.iter().map(ChunkView::from).collect())
    }

    pub async fn list_documents(&self, requester: Option<&OwnerId>) -> Result<Vec<DocumentSummary>, RagError> {
        let owner = Self::identity(requester)?;
        let documents = self.documents.list_documents(owner).await?;
        Ok(documents.iter().map(DocumentSummary::from).collect())
    }

    pub async fn fetch_file(&self, id: DocumentId, requester: Option<&OwnerId>) -> Result<Vec<u8>, RagError> {
        let document = self.authorize(id, requester).await?;
        let Some(source) = self.blobs.source(&document.file).await? else {
            return Err(RagError::NotFound(format!("file of document {id}")));
        };

        let bytes = tokio::task::spawn_blocking(move || source.read_all())
            .await
            .map_err(|error| RagError::Internal(error.to_string()))?
            .map_err(StoreError::from)?;
        Ok(bytes)
    }

    pub async fn ask(
        &self,
        id: DocumentId,
        question: &str,
        requester: Option<&OwnerId>,
    ) -> Result<Answer, RagError> {
        let document = self.authorize(id, requester).await?;
        self.queries.answer(&document, question).await
    }

    pub async fn backfill(&self) -> Result<Vec<BackfillEntry>, RagError> {
        self.processor.backfill().await
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub async fn shutdown(&self) -> QueueStats {
        let stats = self.queue.shutdown().await;
        self.models.shutdown();
        stats
    }
}
