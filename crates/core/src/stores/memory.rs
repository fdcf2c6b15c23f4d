use crate::error::StoreError;
use crate::models::{Chunk, Document, DocumentId, NewChunk, OwnerId, StatusUpdate};
use crate::traits::{ChunkStore, DocumentStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<DocumentId, Document>>,
    chunks: RwLock<HashMap<DocumentId, Arc<Vec<Chunk>>>>,
    last_chunk_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn sort_newest_first(documents: &mut [Document]) {
    documents.sort_by(|left, right| {
        right
            .uploaded_at
            .cmp(&left.uploaded_at)
            .then(left.id.cmp(&right.id))
    });
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        write(&self.documents).insert(document.id, document.clone());
        Ok(())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        Ok(read(&self.documents).get(&id).cloned())
    }

    async fn list_documents(&self, owner: &OwnerId) -> Result<Vec<Document>, StoreError> {
        let mut owned: Vec<Document> = read(&self.documents)
            .values()
            .filter(|document| &document.owner == owner)
            .cloned()
            .collect();
        sort_newest_first(&mut owned);
        Ok(owned)
    }

    async fn all_documents(&self) -> Result<Vec<Document>, StoreError> {
        let mut all: Vec<Document> = read(&self.documents).values().cloned().collect();
        sort_newest_first(&mut all);
        Ok(all)
    }

    async fn update_status(&self, id: DocumentId, update: &StatusUpdate) -> Result<(), StoreError> {
        let mut documents = write(&self.documents);
        let document = documents
            .get_mut(&id)
            .ok_or_else(|| StoreError::MissingDocument(id.to_string()))?;
        document.processing_status = update.status;
        document.processing_error = update.error.clone();
        if update.processed_at.is_some() {
            document.processed_at = update.processed_at;
        }
        Ok(())
    }

    async fn delete_document(&self, id: DocumentId) -> Result<bool, StoreError> {
        let removed = write(&self.documents).remove(&id).is_some();
        write(&self.chunks).remove(&id);
        Ok(removed)
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn replace_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<usize, StoreError> {
        if !read(&self.documents).contains_key(&document_id) {
            return Err(StoreError::MissingDocument(document_id.to_string()));
        }

        let created_at = Utc::now();
        let mut replacement = Vec::with_capacity(chunks.len());
        for (position, chunk) in chunks.iter().enumerate() {
            replacement.push(Chunk {
                id: self.last_chunk_id.fetch_add(1, Ordering::Relaxed) + 1,
                document_id,
                chunk_text: chunk.text.clone(),
                embedding: Some(serde_json::to_value(&chunk.embedding)?),
                order: position as u32,
                page_number: chunk.page_number,
                created_at,
            });
        }

        write(&self.chunks).insert(document_id, Arc::new(replacement));
        Ok(chunks.len())
    }

    async fn list_chunks(&self, document_id: DocumentId) -> Result<Vec<Chunk>, StoreError> {
        Ok(read(&self.chunks)
            .get(&document_id)
            .map(|chunks| chunks.as_ref().clone())
            .unwrap_or_default())
    }

    async fn has_chunks(&self, document_id: DocumentId) -> Result<bool, StoreError> {
        Ok(read(&self.chunks)
            .get(&document_id)
            .is_some_and(|chunks| !chunks.is_empty()))
    }
}
