pub mod auth;
pub mod config;
pub mod errors;
pub mod models;
pub mod routes;
pub mod storage;
pub mod telemetry;
pub mod uploads;

#[cfg(test)]
mod test_support;

use config::AppConfig;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub uploads: Arc<uploads::UploadService>,
    pub telemetry: Arc<telemetry::Telemetry>,
}

/// Builds the single storage backend for this process and the services
/// sharing it.
pub async fn build_state(config: AppConfig) -> Result<AppState, storage::StorageError> {
    let config = Arc::new(config);
    let telemetry = Arc::new(telemetry::Telemetry::default());

    let storage_backend = storage::create_storage_backend(&config.storage).await?;

    let upload_service =
        uploads::UploadService::new(storage_backend, config.image.clone(), telemetry.clone());

    Ok(AppState {
        config,
        uploads: Arc::new(upload_service),
        telemetry,
    })
}

