use axum::extract::Multipart;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::errors::AppError;
use crate::models::UploadedFile;

/// Everything pulled out of one multipart request: spooled file parts and
/// the plain text fields that carry processing options.
#[derive(Debug, Default)]
pub struct IncomingUpload {
    pub files: Vec<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl IncomingUpload {
    /// Removes every spooled temp file. Used when the request is rejected
    /// after intake but before the files reach the upload service.
    pub async fn discard(self) {
        for file in self.files {
            file.temp.remove().await;
        }
    }
}

/// Owns one spooled `.part` file. The file is unlinked when the guard is
/// dropped, so a cancelled request cannot leave it behind.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    armed: bool,
}

impl TempUpload {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the file without blocking the runtime and disarms the guard.
    pub async fn remove(mut self) {
        self.armed = false;
        if let Err(error) = tokio::fs::remove_file(&self.path).await {
            log_remove_error(&self.path, &error);
        }
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(error) = std::fs::remove_file(&self.path) {
            log_remove_error(&self.path, &error);
        }
    }
}

fn log_remove_error(path: &Path, error: &std::io::Error) {
    if error.kind() != std::io::ErrorKind::NotFound {
        tracing::warn!(path = %path.display(), error = %error, "Failed to remove temp upload");
    }
}

fn normalize_mime(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Spools file parts named in `file_fields` to `temp_dir`, enforcing the
/// per-file size limit, the per-request file count and the MIME allow-list.
/// On error no temp file is left behind.
pub async fn collect(
    multipart: &mut Multipart,
    file_fields: &[&str],
    limits: &UploadConfig,
) -> Result<IncomingUpload, AppError> {
    let temp_dir = PathBuf::from(&limits.temp_dir);
    tokio::fs::create_dir_all(&temp_dir)
        .await
        .map_err(|error| AppError::Internal(format!("Failed to create temp dir: {error}")))?;

    let mut incoming = IncomingUpload::default();
    match read_parts(multipart, file_fields, limits, &temp_dir, &mut incoming).await {
        Ok(()) => Ok(incoming),
        Err(error) => {
            incoming.discard().await;
            Err(error)
        }
    }
}

async fn read_parts(
    multipart: &mut Multipart,
    file_fields: &[&str],
    limits: &UploadConfig,
    temp_dir: &Path,
    incoming: &mut IncomingUpload,
) -> Result<(), AppError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|error| AppError::BadRequest(format!("Invalid multipart payload: {error}")))?
    {
        let field_name = field.name().unwrap_or_default().to_string();

        if !file_fields.contains(&field_name.as_str()) {
            let value = field.text().await.map_err(|error| {
                AppError::BadRequest(format!("Failed to read field '{field_name}': {error}"))
            })?;
            incoming.fields.insert(field_name, value);
            continue;
        }

        if incoming.files.len() >= limits.max_files {
            return Err(AppError::BadRequest(format!(
                "Too many files. Maximum is {}",
                limits.max_files
            )));
        }

        let original_name = field.file_name().unwrap_or("file").to_string();
        let mime_type = field
            .content_type()
            .map(normalize_mime)
            .filter(|mime| !mime.is_empty() && mime != "application/octet-stream")
            .unwrap_or_else(|| crate::storage::guess_mime_type(&original_name));

        if !limits.allowed_mime_types.iter().any(|allowed| *allowed == mime_type) {
            return Err(AppError::BadRequest(format!(
                "File type not allowed: {mime_type}"
            )));
        }

        let temp_path = temp_dir.join(format!("{}.part", Uuid::new_v4()));
        let mut temp_file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|error| AppError::Internal(format!("Failed to create temp file: {error}")))?;
        let temp = TempUpload::new(temp_path);

        let mut size = 0_u64;
        let spooled: Result<(), AppError> = async {
            while let Some(chunk) = field.chunk().await.map_err(|error| {
                AppError::BadRequest(format!("Failed to read upload field: {error}"))
            })? {
                size += chunk.len() as u64;
                if size > limits.max_file_size as u64 {
                    return Err(AppError::BadRequest(format!(
                        "File too large. Maximum size is {} bytes",
                        limits.max_file_size
                    )));
                }
                temp_file.write_all(&chunk).await.map_err(|error| {
                    AppError::Internal(format!("Failed to write temp file: {error}"))
                })?;
            }
            temp_file
                .flush()
                .await
                .map_err(|error| AppError::Internal(format!("Failed to flush temp file: {error}")))
        }
        .await;

        drop(temp_file);
        if let Err(error) = spooled {
            temp.remove().await;
            return Err(error);
        }

        tracing::debug!(
            original_name = %original_name,
            mime_type = %mime_type,
            size_bytes = size,
            "Spooled upload part"
        );

        incoming.files.push(UploadedFile {
            original_name,
            mime_type,
            size,
            temp,
        });
    }

    Ok(())
}
