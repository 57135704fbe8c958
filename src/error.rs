use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::evaluate::EvaluationError;
use crate::llm::ChatError;
use crate::ocr::ExtractionError;

/// Every way an upload request can fail, as seen at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Upstream credentials were absent or invalid at startup
    #[error("Service not configured. Please check your Azure OpenAI credentials.")]
    NotConfigured,

    #[error("File type not supported: {0}. Please upload image files (JPEG, PNG, GIF, BMP, TIFF).")]
    UnsupportedMediaType(String),

    /// Malformed multipart body or no `file` field
    #[error("Invalid upload: {0}")]
    BadUpload(String),

    #[error("No text could be extracted from the file")]
    EmptyExtraction,

    #[error("Failed to stage upload: {0}")]
    Staging(std::io::Error),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::UnsupportedMediaType(_)
            | AppError::BadUpload(_)
            | AppError::EmptyExtraction
            | AppError::Extraction(ExtractionError::Chat(ChatError::Upstream { .. })) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotConfigured
            | AppError::Staging(_)
            | AppError::Extraction(_)
            | AppError::Evaluation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Coarse failure class reported alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotConfigured => "configuration",
            AppError::UnsupportedMediaType(_) | AppError::BadUpload(_) | AppError::EmptyExtraction => {
                "validation"
            }
            AppError::Extraction(ExtractionError::Chat(ChatError::Upstream { .. }))
            | AppError::Evaluation(EvaluationError::Chat(ChatError::Upstream { .. })) => "upstream",
            AppError::Extraction(ExtractionError::Chat(ChatError::Envelope(_)))
            | AppError::Evaluation(EvaluationError::Chat(ChatError::Envelope(_)))
            | AppError::Evaluation(EvaluationError::InvalidJson { .. })
            | AppError::Evaluation(EvaluationError::SchemaMismatch { .. }) => "parse",
            AppError::Staging(_)
            | AppError::Extraction(ExtractionError::Read(_))
            | AppError::Extraction(ExtractionError::Chat(ChatError::Request(_)))
            | AppError::Evaluation(EvaluationError::Chat(ChatError::Request(_))) => "internal",
        }
    }

    /// Message returned to the caller. Upstream bodies and model output
    /// excerpts are included as-is for diagnosis.
    pub fn detail(&self) -> String {
        match self {
            AppError::Extraction(ExtractionError::Chat(ChatError::Upstream { body, .. })) => {
                format!("OCR extraction failed: {}", body)
            }
            AppError::Extraction(ExtractionError::Chat(ChatError::Envelope(msg))) => {
                format!("Failed to extract text from OpenAI response: {}", msg)
            }
            AppError::Extraction(e) => format!("Error processing file: {}", e),
            AppError::Evaluation(EvaluationError::Chat(ChatError::Upstream { body, .. })) => {
                format!("OpenAI API failed: {}", body)
            }
            AppError::Evaluation(EvaluationError::Chat(ChatError::Envelope(msg))) => {
                format!("Failed to parse OpenAI response: {}", msg)
            }
            AppError::Evaluation(EvaluationError::Chat(e)) => {
                format!("Evaluation request failed: {}", e)
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "request failed: {}", self);
        } else {
            tracing::warn!(kind = self.kind(), "request rejected: {}", self);
        }

        let body = json!({"detail": self.detail(), "kind": self.kind()});
        (status, Json(body)).into_response()
    }
}
