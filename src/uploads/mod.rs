pub mod filename;
pub mod intake;
pub mod transform;

use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{ImageConfig, StorageKind};
use crate::errors::AppError;
use crate::models::{
    FileInfo, FileOutcome, OutputFormat, ProcessingOptions, StoredFileRecord, UploadedFile,
};
use crate::storage::{guess_mime_type, validate_key, StorageBackend};
use crate::telemetry::Telemetry;

use filename::generate_filename;
use transform::{ImageTransformer, TransformOutcome};

/// Bytes ready to hand to the storage backend after the transform stage.
struct Prepared {
    payload: Vec<u8>,
    mime_type: String,
    output_format: Option<OutputFormat>,
    processed: bool,
    warning: Option<String>,
}

/// Runs uploaded files through the transform stage into the active storage
/// backend. Owns the temp files it is handed and removes them on every path.
#[derive(Clone)]
pub struct UploadService {
    storage: Arc<dyn StorageBackend>,
    transformer: ImageTransformer,
    telemetry: Arc<Telemetry>,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        image_config: ImageConfig,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            storage,
            transformer: ImageTransformer::new(image_config),
            telemetry,
        }
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.storage.kind()
    }

    #[tracing::instrument(
        skip_all,
        fields(original_name = %file.original_name, size_bytes = file.size)
    )]
    pub async fn process_single_file(
        &self,
        file: UploadedFile,
        options: &ProcessingOptions,
    ) -> Result<StoredFileRecord, AppError> {
        let result = self.persist(&file, options).await;
        file.temp.remove().await;

        match &result {
            Ok(record) => {
                self.telemetry.inc_file_persisted();
                tracing::info!(
                    filename = %record.filename,
                    processed = record.processed,
                    "Upload persisted"
                );
            }
            Err(error) => {
                self.telemetry.inc_file_failed();
                tracing::warn!(error = %error, "Upload failed");
            }
        }

        result
    }

    /// Processes files one after another. Each input gets exactly one
    /// outcome, in input order; a failure never aborts the batch.
    pub async fn process_multiple_files(
        &self,
        files: Vec<UploadedFile>,
        options: &ProcessingOptions,
    ) -> Vec<FileOutcome> {
        let mut outcomes = Vec::with_capacity(files.len());

        for file in files {
            let original_name = file.original_name.clone();
            let outcome = match self.process_single_file(file, options).await {
                Ok(record) => FileOutcome::Persisted(record),
                Err(error) => FileOutcome::Failed {
                    original_name,
                    error: error.public_message(),
                },
            };
            outcomes.push(outcome);
        }

        outcomes
    }

    pub async fn delete_file(&self, filename: &str) -> Result<(), AppError> {
        validate_key(filename)?;
        let start = Instant::now();
        self.storage.delete(filename).await?;
        self.telemetry.observe_storage_op("delete", start.elapsed());
        tracing::info!(filename = %filename, "Upload deleted");
        Ok(())
    }

    pub async fn get_file_info(&self, filename: &str) -> Result<FileInfo, AppError> {
        validate_key(filename)?;
        Ok(self.storage.info(filename).await?)
    }

    pub async fn list_all_files(&self) -> Result<Vec<FileInfo>, AppError> {
        let start = Instant::now();
        let files = self.storage.list().await?;
        self.telemetry.observe_storage_op("list", start.elapsed());
        Ok(files)
    }

    /// Stored bytes plus the content type to serve them with.
    pub async fn read_file(&self, filename: &str) -> Result<(Vec<u8>, String), AppError> {
        validate_key(filename)?;
        let bytes = self.storage.read(filename).await?;
        Ok((bytes, guess_mime_type(filename)))
    }

    async fn persist(
        &self,
        file: &UploadedFile,
        options: &ProcessingOptions,
    ) -> Result<StoredFileRecord, AppError> {
        tracing::debug!(state = "received", mime_type = %file.mime_type);
        let original = tokio::fs::read(file.temp.path())
            .await
            .map(Bytes::from)
            .map_err(|error| AppError::Internal(format!("Failed to read temp upload: {error}")))?;

        tracing::debug!(state = "transforming");
        let prepared = self.prepare(original, &file.mime_type, options).await;

        let filename = generate_filename(&file.original_name, None, prepared.output_format);
        let checksum = sha256_hex(&prepared.payload);

        tracing::debug!(state = "persisting", filename = %filename);
        let start = Instant::now();
        let saved = self
            .storage
            .save(&filename, prepared.payload, &prepared.mime_type)
            .await?;
        self.telemetry.observe_storage_op("save", start.elapsed());

        Ok(StoredFileRecord {
            storage_key: (saved.storage_key != saved.filename).then_some(saved.storage_key),
            filename: saved.filename,
            original_name: file.original_name.clone(),
            size: saved.size,
            mime_type: prepared.mime_type,
            url: saved.url,
            processed: prepared.processed,
            checksum,
            warning: prepared.warning,
            uploaded_at: Utc::now(),
        })
    }

    async fn prepare(
        &self,
        original: Bytes,
        mime_type: &str,
        options: &ProcessingOptions,
    ) -> Prepared {
        let outcome = self
            .transformer
            .transform(original.clone(), mime_type, options)
            .await;

        match outcome {
            TransformOutcome::Processed(image) => Prepared {
                mime_type: image.mime_type().to_string(),
                output_format: image.output_format(),
                payload: image.bytes,
                processed: true,
                warning: None,
            },
            TransformOutcome::Unchanged => Prepared {
                payload: Vec::from(original),
                mime_type: mime_type.to_string(),
                output_format: None,
                processed: false,
                warning: None,
            },
            TransformOutcome::Fallback { reason } => {
                self.telemetry.inc_transform_fallback();
                tracing::warn!(reason = %reason, "Image processing failed, storing original");
                Prepared {
                    payload: Vec::from(original),
                    mime_type: mime_type.to_string(),
                    output_format: None,
                    processed: false,
                    warning: Some(format!("Image processing failed; original stored: {reason}")),
                }
            }
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
