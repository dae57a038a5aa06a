//! Application error types and handling

use std::time::Duration;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Machine-readable error codes carried in every failure envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    MissingImage,
    InvalidImage,
    ImageTooLarge,
    UnsupportedImageFormat,
    ApiKeyNotConfigured,
    GenerationFailed,
    ModelRejectedInput,
    QuotaExceeded,
    InvalidApiKey,
    ProviderRateLimited,
    ProviderUnavailable,
    RateLimitExceeded,
    MissingText,
    MissingVoice,
    InvalidVoice,
    TextTooLong,
    InvalidSpeed,
    ClientNotInitialized,
    TtsGenerationError,
    MissingVoiceName,
    InvalidVoiceName,
    VoiceTrackingError,
    InvalidTimeRange,
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::MissingImage => "MISSING_IMAGE",
            ErrorCode::InvalidImage => "INVALID_IMAGE",
            ErrorCode::ImageTooLarge => "IMAGE_TOO_LARGE",
            ErrorCode::UnsupportedImageFormat => "UNSUPPORTED_IMAGE_FORMAT",
            ErrorCode::ApiKeyNotConfigured => "API_KEY_NOT_CONFIGURED",
            ErrorCode::GenerationFailed => "GENERATION_FAILED",
            ErrorCode::ModelRejectedInput => "MODEL_REJECTED_INPUT",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::InvalidApiKey => "INVALID_API_KEY",
            ErrorCode::ProviderRateLimited => "PROVIDER_RATE_LIMITED",
            ErrorCode::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::MissingText => "MISSING_TEXT",
            ErrorCode::MissingVoice => "MISSING_VOICE",
            ErrorCode::InvalidVoice => "INVALID_VOICE",
            ErrorCode::TextTooLong => "TEXT_TOO_LONG",
            ErrorCode::InvalidSpeed => "INVALID_SPEED",
            ErrorCode::ClientNotInitialized => "CLIENT_NOT_INITIALIZED",
            ErrorCode::TtsGenerationError => "TTS_GENERATION_ERROR",
            ErrorCode::MissingVoiceName => "MISSING_VOICE_NAME",
            ErrorCode::InvalidVoiceName => "INVALID_VOICE_NAME",
            ErrorCode::VoiceTrackingError => "VOICE_TRACKING_ERROR",
            ErrorCode::InvalidTimeRange => "INVALID_TIME_RANGE",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// HTTP status a failure with this code is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequest
            | ErrorCode::MissingImage
            | ErrorCode::InvalidImage
            | ErrorCode::ImageTooLarge
            | ErrorCode::UnsupportedImageFormat
            | ErrorCode::ModelRejectedInput
            | ErrorCode::MissingText
            | ErrorCode::MissingVoice
            | ErrorCode::InvalidVoice
            | ErrorCode::TextTooLong
            | ErrorCode::InvalidSpeed
            | ErrorCode::MissingVoiceName
            | ErrorCode::InvalidVoiceName
            | ErrorCode::InvalidTimeRange => StatusCode::BAD_REQUEST,
            ErrorCode::ApiKeyNotConfigured | ErrorCode::ClientNotInitialized => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::QuotaExceeded
            | ErrorCode::InvalidApiKey
            | ErrorCode::ProviderRateLimited
            | ErrorCode::ProviderUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::GenerationFailed
            | ErrorCode::TtsGenerationError
            | ErrorCode::VoiceTrackingError
            | ErrorCode::DatabaseError
            | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A failure with an explicit code, reported with the code's status.
    #[error("{message}")]
    Coded { code: ErrorCode, message: String },

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Duration },

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn coded(code: ErrorCode, message: impl Into<String>) -> Self {
        AppError::Coded {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::DatabaseError(_) => ErrorCode::DatabaseError,
            AppError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            AppError::Coded { code, .. } => *code,
            AppError::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            AppError::InternalError(_) => ErrorCode::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code().status()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = code.status();

        let error_message = match &self {
            AppError::DatabaseError(msg) => {
                error!(error = %msg, "Database error while handling request");
                "Database error".to_string()
            }
            AppError::InternalError(msg) => {
                error!(error = %msg, "Internal error while handling request");
                "Internal server error".to_string()
            }
            AppError::InvalidRequest(msg) => msg.clone(),
            AppError::Coded { message, .. } => message.clone(),
            AppError::RateLimited { .. } => "Rate limit exceeded".to_string(),
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
            "code": code,
        }));

        match self {
            AppError::RateLimited { retry_after } => {
                let secs = retry_after.as_secs().max(1).to_string();
                (status, [(header::RETRY_AFTER, secs)], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidRequest(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        AppError::InvalidRequest(format!("Invalid request body: {}", err.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(err: QueryRejection) -> Self {
        AppError::InvalidRequest(format!("Invalid query string: {}", err.body_text()))
    }
}
