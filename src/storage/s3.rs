use async_trait::async_trait;
use futures_util::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectMeta, ObjectStore, PutOptions, PutPayload};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{S3Config, StorageKind};
use crate::models::FileInfo;

use super::{
    guess_mime_type, validate_key, SavedObject, StorageBackend, StorageError, StorageResult,
};

const DEFAULT_REGION: &str = "us-east-1";

/// S3-compatible object storage. Filenames map to `{key_prefix}{filename}`.
#[derive(Debug, Clone)]
pub struct S3Storage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key_prefix: String,
    url_base: String,
}

impl S3Storage {
    pub fn new(config: &S3Config) -> StorageResult<Self> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| StorageError::Unavailable("S3 bucket is not configured".into()))?;
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&bucket)
            .with_region(&region)
            .with_virtual_hosted_style_request(!config.force_path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let Some(access_key_id) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(secret_access_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_access_key);
        }

        let store = builder.build().map_err(|error| {
            StorageError::Unavailable(format!("Failed to configure S3 client: {error}"))
        })?;

        let url_base = public_url_base(config, &bucket, &region);
        Ok(Self::with_store(Arc::new(store), bucket, &config.key_prefix, url_base))
    }

    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        bucket: String,
        key_prefix: &str,
        url_base: String,
    ) -> Self {
        let trimmed = key_prefix.trim_matches('/');
        let key_prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };

        Self {
            store,
            bucket,
            key_prefix,
            url_base: url_base.trim_end_matches('/').to_string(),
        }
    }

    fn object_key(&self, filename: &str) -> StorageResult<String> {
        validate_key(filename)?;
        Ok(format!("{}{filename}", self.key_prefix))
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{key}", self.url_base)
    }

    fn file_info(&self, meta: &ObjectMeta) -> Option<FileInfo> {
        let filename = meta.location.filename()?.to_string();
        let key = format!("{}{filename}", self.key_prefix);
        Some(FileInfo {
            mime_type: guess_mime_type(&filename),
            url: self.object_url(&key),
            size: meta.size as u64,
            modified_at: Some(meta.last_modified),
            filename,
        })
    }

    async fn head(&self, filename: &str, key: &str) -> StorageResult<ObjectMeta> {
        self.store
            .head(&ObjectPath::from(key))
            .await
            .map_err(|error| map_store_error(filename, "head", error))
    }
}

/// Virtual-hosted or path-style base URL, unless an explicit public URL is set.
fn public_url_base(config: &S3Config, bucket: &str, region: &str) -> String {
    if let Some(public_url) = &config.public_url {
        return public_url.trim_end_matches('/').to_string();
    }

    match &config.endpoint {
        Some(endpoint) => {
            let endpoint = endpoint.trim_end_matches('/');
            if config.force_path_style {
                format!("{endpoint}/{bucket}")
            } else {
                match endpoint.split_once("://") {
                    Some((scheme, host)) => format!("{scheme}://{bucket}.{host}"),
                    None => format!("https://{bucket}.{endpoint}"),
                }
            }
        }
        None if config.force_path_style => format!("https://s3.{region}.amazonaws.com/{bucket}"),
        None => format!("https://{bucket}.s3.{region}.amazonaws.com"),
    }
}

fn map_store_error(filename: &str, op: &str, error: object_store::Error) -> StorageError {
    match error {
        object_store::Error::NotFound { .. } => StorageError::NotFound(filename.to_string()),
        other => StorageError::Unavailable(format!("S3 {op} failed for '{filename}': {other}")),
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn save(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<SavedObject> {
        let key = self.object_key(filename)?;
        let size = bytes.len() as u64;
        let start = Instant::now();

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&ObjectPath::from(key.as_str()), PutPayload::from(bytes), options)
            .await
            .map_err(|error| {
                tracing::error!(
                    error = %error,
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = size,
                    "S3 upload failed"
                );
                map_store_error(filename, "put", error)
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(SavedObject {
            filename: filename.to_string(),
            url: self.object_url(&key),
            storage_key: key,
            size,
        })
    }

    async fn read(&self, filename: &str) -> StorageResult<Vec<u8>> {
        let key = self.object_key(filename)?;
        let result = self
            .store
            .get(&ObjectPath::from(key.as_str()))
            .await
            .map_err(|error| map_store_error(filename, "get", error))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|error| map_store_error(filename, "get", error))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, filename: &str) -> StorageResult<()> {
        let key = self.object_key(filename)?;
        // S3 DELETE succeeds for absent keys
        self.head(filename, &key).await?;

        self.store
            .delete(&ObjectPath::from(key.as_str()))
            .await
            .map_err(|error| map_store_error(filename, "delete", error))?;

        tracing::info!(bucket = %self.bucket, key = %key, "S3 object deleted");
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<FileInfo>> {
        let prefix = ObjectPath::from(self.key_prefix.trim_end_matches('/'));
        let prefix = (!self.key_prefix.is_empty()).then_some(&prefix);

        let objects: Vec<ObjectMeta> = self
            .store
            .list(prefix)
            .try_collect()
            .await
            .map_err(|error| StorageError::Unavailable(format!("S3 list failed: {error}")))?;

        let mut files: Vec<FileInfo> = objects
            .iter()
            .filter(|meta| {
                // only direct children of the prefix
                let depth = meta.location.parts().count();
                depth == prefix.map(|p| p.parts().count()).unwrap_or(0) + 1
            })
            .filter_map(|meta| self.file_info(meta))
            .collect();

        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    async fn info(&self, filename: &str) -> StorageResult<FileInfo> {
        let key = self.object_key(filename)?;
        let meta = self.head(filename, &key).await?;

        self.file_info(&meta)
            .ok_or_else(|| StorageError::NotFound(filename.to_string()))
    }

    fn url(&self, filename: &str) -> StorageResult<String> {
        let key = self.object_key(filename)?;
        Ok(self.object_url(&key))
    }

    fn kind(&self) -> StorageKind {
        StorageKind::S3
    }
}
