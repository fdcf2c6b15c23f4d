use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque key of the uploaded bytes inside a [`crate::BlobStore`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct FileRef(pub String);

impl FileRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl ProcessingStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Done => "done",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "done" => Ok(ProcessingStatus::Done),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub owner: OwnerId,
    pub file: FileRef,
    pub title: String,
    pub checksum: String,
    pub uploaded_at: DateTime<Utc>,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Status columns written by the processing state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: ProcessingStatus,
    pub error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn processing() -> Self {
        Self {
            status: ProcessingStatus::Processing,
            error: None,
            processed_at: None,
        }
    }

    pub fn done(at: DateTime<Utc>) -> Self {
        Self {
            status: ProcessingStatus::Done,
            error: None,
            processed_at: Some(at),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ProcessingStatus::Failed,
            error: Some(reason.into()),
            processed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: DocumentId,
    pub chunk_text: String,
    /// Raw stored embedding; validated only when read back for search.
    pub embedding: Option<serde_json::Value>,
    pub order: u32,
    pub page_number: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// One item handed to [`crate::ChunkStore::replace_chunks`]; its position is its order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub text: String,
    pub embedding: Vec<f32>,
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub title: String,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
}

impl From<&Document> for DocumentSummary {
    fn from(value: &Document) -> Self {
        Self {
            id: value.id,
            title: value.title.clone(),
            processing_status: value.processing_status,
            processing_error: value.processing_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkView {
    pub id: i64,
    pub chunk_text: String,
    pub order: u32,
    pub page_number: Option<u32>,
}

impl From<&Chunk> for ChunkView {
    fn from(value: &Chunk) -> Self {
        Self {
            id: value.id,
            chunk_text: value.chunk_text.clone(),
            order: value.order,
            page_number: value.page_number,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Sync,
    Background,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestOutcome {
    pub chunks_created: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub order: u32,
    pub page_number: Option<u32>,
    pub distance: f32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub passages: Vec<RetrievedPassage>,
}
