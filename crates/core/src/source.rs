use crate::error::StoreError;
use crate::models::FileRef;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

pub trait ByteSource: Send + Sync {
    /// Opens a fresh reader. Dropping the reader releases the underlying resource.
    fn open(&self) -> io::Result<Box<dyn ReadSeek>>;

    fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut reader = self.open()?;
        reader.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(std::fs::File::open(&self.path)?))
    }
}

#[derive(Debug, Clone)]
pub struct MemorySource {
    bytes: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl ByteSource for MemorySource {
    fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.bytes))))
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, name_hint: &str, bytes: Vec<u8>) -> Result<FileRef, StoreError>;

    /// `None` when nothing is stored under `file`.
    async fn source(&self, file: &FileRef) -> Result<Option<Arc<dyn ByteSource>>, StoreError>;
}

fn blob_key(name_hint: &str) -> String {
    let sanitized: String = name_hint
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_start_matches('.');
    if sanitized.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        format!("{}-{}", Uuid::new_v4(), sanitized)
    }
}

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_of(&self, file: &FileRef) -> Option<PathBuf> {
        let key = file.as_str();
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return None;
        }
        Some(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, name_hint: &str, bytes: Vec<u8>) -> Result<FileRef, StoreError> {
        let key = blob_key(name_hint);
        tokio::fs::write(self.root.join(&key), bytes).await?;
        Ok(FileRef(key))
    }

    async fn source(&self, file: &FileRef) -> Result<Option<Arc<dyn ByteSource>>, StoreError> {
        let Some(path) = self.path_of(file) else {
            return Ok(None);
        };
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        Ok(Some(Arc::new(FileSource::new(path))))
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&self, file: &FileRef) -> bool {
        let mut blobs = self.blobs.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        blobs.remove(file.as_str()).is_some()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, name_hint: &str, bytes: Vec<u8>) -> Result<FileRef, StoreError> {
        let key = blob_key(name_hint);
        let mut blobs = self.blobs.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        blobs.insert(key.clone(), Arc::from(bytes));
        Ok(FileRef(key))
    }

    async fn source(&self, file: &FileRef) -> Result<Option<Arc<dyn ByteSource>>, StoreError> {
        let blobs = self.blobs.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(blobs
            .get(file.as_str())
            .map(|bytes| Arc::new(MemorySource::new(Arc::clone(bytes))) as Arc<dyn ByteSource>))
    }
}
