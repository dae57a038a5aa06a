//! Alt-text generation endpoints

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::models::GenerateAltTextRequest;
use crate::state::AppState;

/// POST /api/v1/alt-text
///
/// Body: `{ "image": "data:image/png;base64,...", "options": { ... } }`.
/// Failures keep the response shape and carry `error` and `code`.
pub async fn generate_alt_text(
    State(state): State<AppState>,
    payload: Result<Json<GenerateAltTextRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return AppError::from(rejection).into_response(),
    };

    let outcome = state.alt_text.generate(&request).await;
    let status = outcome.status();
    outcome.side_effects.detach();

    (status, Json(outcome.response)).into_response()
}

/// GET /api/v1/alt-text/health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "service": "alt-text",
        "message": "Alt text generation service is healthy",
        "configured": state.alt_text.is_configured(),
        "cache_enabled": state.cache.is_enabled(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
