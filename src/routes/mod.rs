pub mod upload_routes;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::StorageKind;
use crate::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload = &state.config.upload;
    let mut app = Router::new()
        .route("/health", get(health))
        .nest(
            "/api",
            upload_routes::router(upload.max_file_size, upload.max_files),
        );

    // Local files are served from the same prefix their URLs point at.
    let storage = &state.config.storage;
    if storage.backend == StorageKind::Local {
        let files = ServeDir::new(&storage.local_root);
        app = match storage.mount_prefix() {
            prefix if prefix.is_empty() => app.fallback_service(files),
            prefix => app.nest_service(&prefix, files),
        };
    }

    app.layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "storage": state.uploads.storage_kind(),
        "uploads": state.telemetry.snapshot(),
    }))
}
