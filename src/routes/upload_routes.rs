use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};

use crate::auth::AuthUser;
use crate::errors::{ApiResponse, AppError};
use crate::models::{FileInfo, FileOutcome, ProcessingOptions, StoredFileRecord};
use crate::uploads::intake::{self, IncomingUpload};
use crate::AppState;

// multipart framing and text fields on top of the raw file bytes
const BODY_LIMIT_SLACK: usize = 64 * 1024;

pub fn router(max_file_size: usize, max_files: usize) -> Router<AppState> {
    let body_limit = max_file_size
        .saturating_mul(max_files.max(1))
        .saturating_add(BODY_LIMIT_SLACK);

    Router::new()
        .route("/upload/single", post(upload_single))
        .route("/upload/multiple", post(upload_multiple))
        .route("/upload/list", get(list_files))
        .route("/upload/info/{filename}", get(file_info))
        .route("/upload/file/{filename}", get(download_file))
        .route("/upload/{filename}", delete(delete_file))
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Parses the processing options, discarding the spooled files if they are
/// malformed so nothing leaks into the temp directory.
async fn options_or_discard(
    incoming: IncomingUpload,
) -> Result<(IncomingUpload, ProcessingOptions), AppError> {
    match ProcessingOptions::from_fields(&incoming.fields) {
        Ok(options) => Ok((incoming, options)),
        Err(error) => {
            incoming.discard().await;
            Err(error)
        }
    }
}

#[tracing::instrument(skip_all, fields(user_id = %user.id))]
async fn upload_single(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<StoredFileRecord>>), AppError> {
    let incoming = intake::collect(&mut multipart, &["file"], &state.config.upload).await?;
    let (incoming, options) = options_or_discard(incoming).await?;

    if incoming.files.len() != 1 {
        let count = incoming.files.len();
        incoming.discard().await;
        return Err(AppError::BadRequest(if count == 0 {
            "No file uploaded. Use the 'file' field".into()
        } else {
            "Only one file can be uploaded to this endpoint".into()
        }));
    }

    let mut files = incoming.files;
    let Some(file) = files.pop() else {
        return Err(AppError::BadRequest("No file uploaded. Use the 'file' field".into()));
    };

    tracing::debug!(email = %user.email, role = ?user.role, "Single upload received");
    let record = state.uploads.process_single_file(file, &options).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("File uploaded successfully", record)),
    ))
}

#[tracing::instrument(skip_all, fields(user_id = %user.id))]
async fn upload_multiple(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<Vec<FileOutcome>>>, AppError> {
    let incoming =
        intake::collect(&mut multipart, &["files", "files[]"], &state.config.upload).await?;
    let (incoming, options) = options_or_discard(incoming).await?;

    if incoming.files.is_empty() {
        return Err(AppError::BadRequest(
            "No files uploaded. Use the 'files' field".into(),
        ));
    }

    let total = incoming.files.len();
    tracing::debug!(email = %user.email, files = total, "Batch upload received");
    let outcomes = state
        .uploads
        .process_multiple_files(incoming.files, &options)
        .await;

    let errors: Vec<String> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            FileOutcome::Failed {
                original_name,
                error,
            } => Some(format!("{original_name}: {error}")),
            FileOutcome::Persisted(_) => None,
        })
        .collect();
    let persisted = total - errors.len();

    Ok(Json(ApiResponse {
        success: errors.is_empty(),
        message: Some(format!("{persisted} of {total} files uploaded successfully")),
        data: Some(outcomes),
        errors: (!errors.is_empty()).then_some(errors),
    }))
}

async fn delete_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(filename): Path<String>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.uploads.delete_file(&filename).await?;
    tracing::info!(user_id = %user.id, filename = %filename, "File deleted by user");

    Ok(Json(ApiResponse::message("File deleted successfully")))
}

async fn file_info(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(filename): Path<String>,
) -> Result<Json<ApiResponse<FileInfo>>, AppError> {
    let info = state.uploads.get_file_info(&filename).await?;
    Ok(Json(ApiResponse::ok("File info retrieved", info)))
}

async fn list_files(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<Vec<FileInfo>>>, AppError> {
    let files = state.uploads.list_all_files().await?;
    Ok(Json(ApiResponse::ok(
        format!("{} files found", files.len()),
        files,
    )))
}

async fn download_file(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let (bytes, mime_type) = state.uploads.read_file(&filename).await?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&mime_type)
            .map_err(|_| AppError::Internal("Invalid content type for stored file".into()))?,
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=300"),
    );

    Ok(response)
}
