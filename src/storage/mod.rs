mod local;
mod s3;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{StorageConfig, StorageKind};
use crate::models::FileInfo;

pub use local::LocalStorage;
pub use s3::S3Storage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage key '{0}'")]
    InvalidName(String),
    #[error("storage key '{0}' not found")]
    NotFound(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// What a backend reports back after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedObject {
    pub filename: String,
    /// Object key inside the backend. Equals `filename` for local storage.
    pub storage_key: String,
    pub size: u64,
    pub url: String,
}

/// Persisted bytes addressed by a flat filename. Implementations call
/// [`validate_key`] before touching the backend.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn save(&self, filename: &str, bytes: Vec<u8>, content_type: &str)
        -> StorageResult<SavedObject>;
    async fn read(&self, filename: &str) -> StorageResult<Vec<u8>>;
    async fn delete(&self, filename: &str) -> StorageResult<()>;
    async fn list(&self) -> StorageResult<Vec<FileInfo>>;
    async fn info(&self, filename: &str) -> StorageResult<FileInfo>;
    fn url(&self, filename: &str) -> StorageResult<String>;
    fn kind(&self) -> StorageKind;
}

/// Rejects anything that could address a path outside the flat key space.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let traversal = key.contains("..")
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0');

    if key.trim().is_empty() || traversal {
        return Err(StorageError::InvalidName(key.to_string()));
    }

    Ok(())
}

pub fn guess_mime_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub async fn create_storage_backend(
    config: &StorageConfig,
) -> StorageResult<Arc<dyn StorageBackend>> {
    match config.backend {
        StorageKind::Local => {
            let backend =
                LocalStorage::new(config.local_root.clone(), config.mount_prefix()).await?;
            tracing::info!(root = %config.local_root, "Initialized local storage backend");
            Ok(Arc::new(backend))
        }
        StorageKind::S3 => {
            let backend = S3Storage::new(&config.s3)?;
            tracing::info!(bucket = ?config.s3.bucket, "Initialized S3 storage backend");
            Ok(Arc::new(backend))
        }
    }
}
