use crate::error::StoreError;
use crate::models::{Chunk, Document, DocumentId, NewChunk, OwnerId, StatusUpdate};
use async_trait::async_trait;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError>;

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError>;

    /// Newest upload first.
    async fn list_documents(&self, owner: &OwnerId) -> Result<Vec<Document>, StoreError>;

    async fn all_documents(&self) -> Result<Vec<Document>, StoreError>;

    async fn update_status(&self, id: DocumentId, update: &StatusUpdate) -> Result<(), StoreError>;

    /// Removes the document and, with it, every chunk it owns.
    async fn delete_document(&self, id: DocumentId) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Swaps the document's whole chunk set; readers never see a mix of old and new.
    async fn replace_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<usize, StoreError>;

    /// Ordered by `order` ascending.
    async fn list_chunks(&self, document_id: DocumentId) -> Result<Vec<Chunk>, StoreError>;

    async fn has_chunks(&self, document_id: DocumentId) -> Result<bool, StoreError>;
}
