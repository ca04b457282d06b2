use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::config::StorageKind;
use crate::models::FileInfo;

use super::{
    guess_mime_type, validate_key, SavedObject, StorageBackend, StorageError, StorageResult,
};

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    public_prefix: String,
}

impl LocalStorage {
    pub async fn new(root: impl Into<PathBuf>, public_prefix: String) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|error| {
            StorageError::Unavailable(format!(
                "Failed to create storage root {}: {error}",
                root.display()
            ))
        })?;

        Ok(Self {
            root,
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        })
    }

    fn resolve_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{key}", self.public_prefix)
    }

    async fn stat(&self, key: &str, path: &Path) -> StorageResult<FileInfo> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(StorageError::NotFound(key.to_string())),
            Err(error) => return Err(map_io_error(key, "stat", error)),
        };

        Ok(FileInfo {
            filename: key.to_string(),
            size: metadata.len(),
            mime_type: guess_mime_type(key),
            url: self.public_url(key),
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

fn map_io_error(key: &str, op: &str, error: std::io::Error) -> StorageError {
    if error.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Unavailable(format!("Failed to {op} storage object '{key}': {error}"))
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn save(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> StorageResult<SavedObject> {
        let path = self.resolve_path(filename)?;
        let size = bytes.len() as u64;

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|error| {
                StorageError::Unavailable(format!("Failed to write storage object: {error}"))
            })?;

        Ok(SavedObject {
            filename: filename.to_string(),
            storage_key: filename.to_string(),
            size,
            url: self.public_url(filename),
        })
    }

    async fn read(&self, filename: &str) -> StorageResult<Vec<u8>> {
        let path = self.resolve_path(filename)?;
        tokio::fs::read(&path)
            .await
            .map_err(|error| map_io_error(filename, "read", error))
    }

    async fn delete(&self, filename: &str) -> StorageResult<()> {
        let path = self.resolve_path(filename)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|error| map_io_error(filename, "delete", error))
    }

    async fn list(&self) -> StorageResult<Vec<FileInfo>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|error| {
            StorageError::Unavailable(format!("Failed to list storage root: {error}"))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|error| {
            StorageError::Unavailable(format!("Failed to list storage root: {error}"))
        })? {
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if name.starts_with('.') || validate_key(&name).is_err() {
                continue;
            }

            match self.stat(&name, &entry.path()).await {
                Ok(info) => files.push(info),
                // directories and files removed mid-listing
                Err(StorageError::NotFound(_)) => continue,
                Err(error) => return Err(error),
            }
        }

        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    async fn info(&self, filename: &str) -> StorageResult<FileInfo> {
        let path = self.resolve_path(filename)?;
        self.stat(filename, &path).await
    }

    fn url(&self, filename: &str) -> StorageResult<String> {
        validate_key(filename)?;
        Ok(self.public_url(filename))
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn storage() -> (TempDir, LocalStorage) {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path(), "/uploads/".into())
            .await
            .unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn save_then_read_returns_identical_bytes() {
        let (_dir, storage) = storage().await;
        let bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        let saved = storage
            .save("blob.bin", bytes.clone(), "application/octet-stream")
            .await
            .unwrap();

        assert_eq!(saved.size, 4096);
        assert_eq!(saved.storage_key, "blob.bin");
        assert_eq!(saved.url, "/uploads/blob.bin");
        assert_eq!(storage.read("blob.bin").await.unwrap(), bytes);
    }

    #[tokio::test]
    async fn traversal_keys_fail_without_io() {
        let (dir, storage) = storage().await;

        for key in ["../escape.txt", "nested/file.txt", "..\\escape.txt"] {
            assert!(matches!(
                storage.save(key, b"x".to_vec(), "text/plain").await,
                Err(StorageError::InvalidName(_))
            ));
            assert!(matches!(storage.read(key).await, Err(StorageError::InvalidName(_))));
            assert!(matches!(storage.delete(key).await, Err(StorageError::InvalidName(_))));
            assert!(matches!(storage.info(key).await, Err(StorageError::InvalidName(_))));
            assert!(matches!(storage.url(key), Err(StorageError::InvalidName(_))));
        }

        assert!(!dir.path().join("nested").exists());
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_files_report_not_found() {
        let (_dir, storage) = storage().await;

        assert!(matches!(storage.delete("ghost.png").await, Err(StorageError::NotFound(_))));
        assert!(matches!(storage.info("ghost.png").await, Err(StorageError::NotFound(_))));
        assert!(matches!(storage.read("ghost.png").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn info_is_stable_for_unmodified_file() {
        let (_dir, storage) = storage().await;
        storage
            .save("photo.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();

        let first = storage.info("photo.png").await.unwrap();
        let second = storage.info("photo.png").await.unwrap();

        assert_eq!(first.size, 3);
        assert_eq!(first.mime_type, "image/png");
        assert_eq!((first.size, &first.mime_type), (second.size, &second.mime_type));
    }

    #[tokio::test]
    async fn list_skips_directories_and_dotfiles() {
        let (dir, storage) = storage().await;
        storage.save("b.txt", b"bb".to_vec(), "text/plain").await.unwrap();
        storage.save("a.txt", b"a".to_vec(), "text/plain").await.unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::fs::write(dir.path().join(".hidden"), b"h").unwrap();

        let names: Vec<_> = storage
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|info| info.filename)
            .collect();

        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let (_dir, storage) = storage().await;
        storage.save("gone.txt", b"x".to_vec(), "text/plain").await.unwrap();

        storage.delete("gone.txt").await.unwrap();

        assert!(matches!(storage.info("gone.txt").await, Err(StorageError::NotFound(_))));
    }
}
