pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod model_service;
pub mod models;
pub mod processing;
pub mod query;
pub mod search;
pub mod service;
pub mod source;
pub mod stores;
pub mod traits;
pub mod worker;

pub use chunking::{chunk_pages, chunk_text, normalize_whitespace, ChunkingConfig, TextChunk};
pub use embeddings::{CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ExtractError, ModelError, RagError, SearchError, StoreError};
pub use extractor::{
    join_pages, FallbackExtractor, LopdfExtractor, PageExtractor, PageText, PdfExtractCrateExtractor,
    TextExtractor,
};
pub use generation::{ExtractiveGenerator, Generator, GroundedPrompt, OllamaGenerator};
pub use ingest::{digest_bytes, discover_pdf_files, IngestionPipeline};
pub use model_service::{EmbeddingBackend, GenerationBackend, ModelConfig, ModelService};
pub use models::{
    Answer, Chunk, ChunkView, Document, DocumentId, DocumentSummary, FileRef, IngestOutcome,
    NewChunk, OwnerId, ProcessingMode, ProcessingStatus, RetrievedPassage, StatusUpdate,
};
pub use processing::{BackfillEntry, DocumentProcessor};
pub use query::{parse_embedding, QueryEngine, QueryOptions};
pub use search::{search, FlatL2Index, Neighbor};
pub use service::{DocumentService, ServiceConfig};
pub use source::{BlobStore, ByteSource, FileSource, FsBlobStore, MemoryBlobStore, MemorySource};
pub use stores::{MemoryStore, SqliteStore};
pub use traits::{ChunkStore, DocumentStore};
pub use worker::{ProcessingQueue, QueueOptions, QueueStats};
