use crate::error::RagError;
use crate::extractor::panic_message;
use crate::ingest::IngestionPipeline;
use crate::models::{DocumentId, IngestOutcome, StatusUpdate};
use crate::traits::{ChunkStore, DocumentStore};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

type RunGate = Arc<tokio::sync::Mutex<()>>;

#[derive(Clone)]
pub struct DocumentProcessor {
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    pipeline: Arc<IngestionPipeline>,
    gates: Arc<Mutex<HashMap<DocumentId, RunGate>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillEntry {
    pub document_id: DocumentId,
    pub title: String,
    pub chunks_created: Option<usize>,
    pub error: Option<String>,
}

impl DocumentProcessor {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        chunks: Arc<dyn ChunkStore>,
        pipeline: Arc<IngestionPipeline>,
    ) -> Self {
        Self {
            documents,
            chunks,
            pipeline,
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs the pipeline for one document and records the outcome.
    ///
    /// A second trigger for the same document waits for the first to finish
    /// and then runs again, so the last run's chunks and status win. The run
    /// lives on its own task: dropping the returned future detaches it.
    pub async fn trigger_processing(&self, id: DocumentId) -> Result<IngestOutcome, RagError> {
        let processor = self.clone();
        match tokio::spawn(async move { processor.serialized_run(id).await }).await {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_panic() => Err(RagError::Internal(panic_message(
                join_error.into_panic().as_ref(),
            ))),
            Err(join_error) => Err(RagError::Internal(join_error.to_string())),
        }
    }

    async fn serialized_run(&self, id: DocumentId) -> Result<IngestOutcome, RagError> {
        let gate = self.gate(id);
        let outcome = {
            let _running = gate.lock().await;
            self.run(id).await
        };
        self.release(id, &gate);
        outcome
    }

    async fn run(&self, id: DocumentId) -> Result<IngestOutcome, RagError> {
        let document = self
            .documents
            .get_document(id)
            .await?
            .ok_or_else(|| RagError::NotFound(id.to_string()))?;

        self.record(id, &StatusUpdate::processing()).await;
        info!(document_id = %id, title = %document.title, "processing started");

        let pipeline = Arc::clone(&self.pipeline);
        let outcome = match tokio::spawn(async move { pipeline.ingest(&document).await }).await {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_panic() => Err(RagError::Internal(panic_message(
                join_error.into_panic().as_ref(),
            ))),
            Err(join_error) => Err(RagError::Internal(join_error.to_string())),
        };

        match &outcome {
            Ok(done) => {
                self.record(id, &StatusUpdate::done(Utc::now())).await;
                info!(document_id = %id, chunks_created = done.chunks_created, "processing done");
            }
            Err(reason) => {
                self.record(id, &StatusUpdate::failed(reason.to_string())).await;
                warn!(
                    document_id = %id,
                    retriable = reason.is_retriable(),
                    error = %reason,
                    "processing failed"
                );
            }
        }
        outcome
    }

    // A lost status write is logged, never returned.
    async fn record(&self, id: DocumentId, update: &StatusUpdate) {
        if let Err(store_error) = self.documents.update_status(id, update).await {
            error!(
                document_id = %id,
                status = %update.status,
                error = %store_error,
                "could not persist processing status"
            );
        }
    }

    fn gate(&self, id: DocumentId) -> RunGate {
        let mut gates = self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(gates.entry(id).or_default())
    }

    fn release(&self, id: DocumentId, gate: &RunGate) {
        let mut gates = self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map and this caller still hold it: nobody is waiting.
        if gates.get(&id).is_some_and(|held| Arc::ptr_eq(held, gate)) && Arc::strong_count(gate) <= 2 {
            gates.remove(&id);
        }
    }

    pub async fn backfill(&self) -> Result<Vec<BackfillEntry>, RagError> {
        let mut report = Vec::new();
        for document in self.documents.all_documents().await? {
            if self.chunks.has_chunks(document.id).await? {
                continue;
            }

            let entry = match self.trigger_processing(document.id).await {
                Ok(outcome) => BackfillEntry {
                    document_id: document.id,
                    title: document.title,
                    chunks_created: Some(outcome.chunks_created),
                    error: None,
                },
                Err(reason) => BackfillEntry {
                    document_id: document.id,
                    title: document.title,
                    chunks_created: None,
                    error: Some(reason.to_string()),
                },
            };
            report.push(entry);
        }

        info!(documents = report.len(), "backfill finished");
        Ok(report)
    }
}
