use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::models::{EvaluateResponse, HealthResponse};
use crate::pipeline::{Pipeline, UploadedImage};

const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    /// `None` when upstream credentials were missing at startup.
    pub pipeline: Option<Arc<Pipeline>>,
}

pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let index = config.frontend_dir.join("index.html");

    Router::new()
        .route("/health", get(health))
        .route("/upload-and-evaluate", post(upload_and_evaluate))
        .route_service("/", ServeFile::new(index))
        .nest_service("/static", ServeDir::new(&config.frontend_dir))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    let now = chrono::Utc::now();
    Json(HealthResponse {
        status: "healthy",
        timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
    })
}

async fn upload_and_evaluate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<EvaluateResponse>, AppError> {
    let pipeline = state.pipeline.as_ref().ok_or(AppError::NotConfigured)?;
    let upload = read_upload(multipart).await?;
    tracing::info!(
        "received file: {}, type: {}",
        upload.filename,
        upload.content_type.as_deref().unwrap_or("none")
    );
    let response = pipeline.run(upload).await?;
    Ok(Json(response))
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadedImage, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadUpload(format!("failed to parse multipart data: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadUpload(format!("failed to read file: {}", e)))?;
        return Ok(UploadedImage {
            filename,
            content_type,
            bytes,
        });
    }
    Err(AppError::BadUpload(format!(
        "missing multipart field {:?}",
        UPLOAD_FIELD
    )))
}
