use crate::error::StoreError;
use crate::models::{
    Chunk, Document, DocumentId, FileRef, NewChunk, OwnerId, ProcessingStatus, StatusUpdate,
};
use crate::traits::{ChunkStore, DocumentStore};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY NOT NULL,
        owner TEXT NOT NULL,
        file_ref TEXT NOT NULL,
        title TEXT NOT NULL,
        checksum TEXT NOT NULL,
        uploaded_at INTEGER NOT NULL,
        processing_status TEXT NOT NULL DEFAULT 'pending',
        processing_error TEXT,
        processed_at INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner, uploaded_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        chunk_text TEXT NOT NULL,
        embedding TEXT,
        chunk_order INTEGER NOT NULL,
        page_number INTEGER,
        created_at INTEGER NOT NULL,
        UNIQUE(document_id, chunk_order)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, chunk_order)",
];

const DOCUMENT_COLUMNS: &str = "id, owner, file_ref, title, checksum, uploaded_at, \
     processing_status, processing_error, processed_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// A private in-memory database; one connection so every query sees it.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn timestamp(millis: i64, table: &'static str) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::CorruptRow {
            table,
            details: format!("timestamp out of range: {millis}"),
        })
}

fn document_id(raw: &str, table: &'static str) -> Result<DocumentId, StoreError> {
    Uuid::parse_str(raw)
        .map(DocumentId)
        .map_err(|error| StoreError::CorruptRow {
            table,
            details: format!("bad document id {raw}: {error}"),
        })
}

fn document_from_row(row: &SqliteRow) -> Result<Document, StoreError> {
    let status: String = row.try_get("processing_status")?;
    let processing_status =
        ProcessingStatus::from_str(&status).map_err(|details| StoreError::CorruptRow {
            table: "documents",
            details,
        })?;
    let processed_at: Option<i64> = row.try_get("processed_at")?;

    Ok(Document {
        id: document_id(&row.try_get::<String, _>("id")?, "documents")?,
        owner: OwnerId(row.try_get("owner")?),
        file: FileRef(row.try_get("file_ref")?),
        title: row.try_get("title")?,
        checksum: row.try_get("checksum")?,
        uploaded_at: timestamp(row.try_get("uploaded_at")?, "documents")?,
        processing_status,
        processing_error: row.try_get("processing_error")?,
        processed_at: processed_at
            .map(|millis| timestamp(millis, "documents"))
            .transpose()?,
    })
}

/// Stored text that is not JSON is kept as a JSON string so it can be filtered later.
fn stored_embedding(raw: Option<String>) -> Option<Value> {
    raw.map(|text| serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk, StoreError> {
    let order: i64 = row.try_get("chunk_order")?;
    let page_number: Option<i64> = row.try_get("page_number")?;

    Ok(Chunk {
        id: row.try_get("id")?,
        document_id: document_id(&row.try_get::<String, _>("document_id")?, "chunks")?,
        chunk_text: row.try_get("chunk_text")?,
        embedding: stored_embedding(row.try_get("embedding")?),
        order: u32::try_from(order).map_err(|_| StoreError::CorruptRow {
            table: "chunks",
            details: format!("negative chunk order {order}"),
        })?,
        page_number: page_number.and_then(|page| u32::try_from(page).ok()),
        created_at: timestamp(row.try_get("created_at")?, "chunks")?,
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO documents ({DOCUMENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(document.id.to_string())
        .bind(document.owner.as_str())
        .bind(document.file.as_str())
        .bind(&document.title)
        .bind(&document.checksum)
        .bind(document.uploaded_at.timestamp_millis())
        .bind(document.processing_status.as_str())
        .bind(&document.processing_error)
        .bind(document.processed_at.map(|at| at.timestamp_millis()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self, owner: &OwnerId) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE owner = ? \
             ORDER BY uploaded_at DESC, id ASC"
        ))
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn all_documents(&self) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY uploaded_at DESC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn update_status(&self, id: DocumentId, update: &StatusUpdate) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE documents SET processing_status = ?, processing_error = ?, \
             processed_at = COALESCE(?, processed_at) WHERE id = ?",
        )
        .bind(update.status.as_str())
        .bind(&update.error)
        .bind(update.processed_at.map(|at| at.timestamp_millis()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MissingDocument(id.to_string()));
        }
        Ok(())
    }

    async fn delete_document(&self, id: DocumentId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn replace_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<usize, StoreError> {
        let id = document_id.to_string();
        let created_at = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        for (position, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO chunks (document_id, chunk_text, embedding, chunk_order, page_number, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&chunk.text)
            .bind(serde_json::to_string(&chunk.embedding)?)
            .bind(position as i64)
            .bind(chunk.page_number.map(i64::from))
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(chunks.len())
    }

    async fn list_chunks(&self, document_id: DocumentId) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, document_id, chunk_text, embedding, chunk_order, page_number, created_at \
             FROM chunks WHERE document_id = ? ORDER BY chunk_order ASC",
        )
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn has_chunks(&self, document_id: DocumentId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM chunks WHERE document_id = ?) AS present")
            .bind(document_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("present")? != 0)
    }
}
