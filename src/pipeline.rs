//! Per-request orchestration: validate, stage, extract, evaluate.
//!
//! Stages run strictly in sequence. The staged file lives exactly as long
//! as [`Pipeline::run`] and is removed on every exit path.

use std::fmt;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use crate::config::AzureOpenAiConfig;
use crate::error::AppError;
use crate::evaluate::EvaluationClient;
use crate::llm::{ChatError, ChatTransport};
use crate::models::EvaluateResponse;
use crate::ocr::ExtractionClient;

pub const SUPPORTED_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/tiff",
];

// ── Upload ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct UploadedImage {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

// ── Stages ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Staged,
    Extracting,
    Extracted,
    Evaluating,
    Completed,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Staged => "staged",
            Stage::Extracting => "extracting",
            Stage::Extracted => "extracted",
            Stage::Evaluating => "evaluating",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ── Staged file ──────────────────────────────────────────────────────────────

/// Upload bytes on disk for the duration of one request.
///
/// Dropping removes the file; a failed removal is logged and otherwise ignored.
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    pub async fn create(dir: &Path, filename: &str, bytes: &[u8]) -> std::io::Result<Self> {
        let named = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&format!("_{}", sanitize_filename(filename)))
            .tempfile_in(dir)?;
        let (file, temp_path) = named.into_parts();
        // Removal is owned by our `Drop` from here on.
        let staged = Self {
            path: temp_path.keep()?,
        };

        let mut file = tokio::fs::File::from_std(file);
        file.write_all(bytes).await?;
        file.flush().await?;

        tracing::info!(size = bytes.len(), "staged {}", staged.path.display());
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        let staged = self.path.display();
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!("removed staged file {}", staged),
            Err(e) => tracing::warn!("failed to remove staged file {}: {}", staged, e),
        }
    }
}

/// Keep only the final path component so the name cannot escape the staging dir.
fn sanitize_filename(filename: &str) -> &str {
    let name = filename.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        "upload"
    } else {
        name
    }
}

fn validate_content_type(content_type: Option<&str>) -> Result<(), AppError> {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());
    match essence {
        Some(ct) if SUPPORTED_CONTENT_TYPES.contains(&ct.as_str()) => Ok(()),
        _ => Err(AppError::UnsupportedMediaType(
            content_type.unwrap_or("none").to_string(),
        )),
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

pub struct Pipeline {
    extractor: ExtractionClient,
    evaluator: EvaluationClient,
    staging_dir: PathBuf,
}

impl Pipeline {
    pub fn new(config: &AzureOpenAiConfig, staging_dir: PathBuf) -> Result<Self, ChatError> {
        let transport = ChatTransport::new(config)?;
        Ok(Self {
            extractor: ExtractionClient::new(transport.clone()),
            evaluator: EvaluationClient::new(transport),
            staging_dir,
        })
    }

    pub async fn run(&self, upload: UploadedImage) -> Result<EvaluateResponse, AppError> {
        let span = tracing::info_span!("evaluate", file = %upload.filename);
        async move {
            let result = self.advance(upload).await;
            if let Err(e) = &result {
                tracing::warn!(stage = %Stage::Failed, "{}", e);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn advance(&self, upload: UploadedImage) -> Result<EvaluateResponse, AppError> {
        tracing::info!(
            stage = %Stage::Received,
            content_type = upload.content_type.as_deref().unwrap_or("none")
        );
        validate_content_type(upload.content_type.as_deref())?;
        tracing::info!(stage = %Stage::Validated);

        let staged = StagedFile::create(&self.staging_dir, &upload.filename, &upload.bytes)
            .await
            .map_err(AppError::Staging)?;
        tracing::info!(stage = %Stage::Staged);

        tracing::info!(stage = %Stage::Extracting);
        let extracted_text = self.extractor.extract(staged.path()).await?;
        if extracted_text.trim().is_empty() {
            return Err(AppError::EmptyExtraction);
        }
        tracing::info!(stage = %Stage::Extracted);

        tracing::info!(stage = %Stage::Evaluating);
        let evaluation = self.evaluator.evaluate(&extracted_text).await?;
        tracing::info!(stage = %Stage::Completed);

        Ok(EvaluateResponse {
            success: true,
            extracted_text,
            evaluation,
        })
    }
}
