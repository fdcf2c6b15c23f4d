use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("no extractable text")]
    ExtractionEmpty,

    #[error("no chunks produced")]
    ChunkingEmpty,

    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),

    #[error("no valid embeddings")]
    NoValidEmbeddings,

    #[error("generation failed: {0}")]
    GenerationFailure(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("processing queue is full")]
    QueueFull,

    #[error("processing queue is closed")]
    QueueClosed,

    #[error("processing failed: {0}")]
    Internal(String),
}

impl RagError {
    /// Whether running the same pipeline again, unchanged, may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingFailure(_)
                | RagError::StorageFailure(_)
                | RagError::GenerationFailure(_)
                | RagError::QueueFull
                | RagError::Internal(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document {0} does not exist")]
    MissingDocument(String),

    #[error("corrupt row in {table}: {details}")]
    CorruptRow { table: &'static str, details: String },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding contains non-finite values")]
    NonFinite,

    #[error("model service has been shut down")]
    ShutDown,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("{method} panicked: {message}")]
    Panicked { method: &'static str, message: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum SearchError {
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
