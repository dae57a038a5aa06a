//! Text-to-speech endpoints

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::error::Result;
use crate::models::VoicePlayEvent;
use crate::services::tts::TtsRequest;
use crate::state::AppState;

/// POST /api/v1/tts
///
/// Returns the raw audio on success, the JSON error envelope otherwise.
pub async fn generate_speech(
    State(state): State<AppState>,
    payload: std::result::Result<Json<TtsRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = payload?;

    let (audio, side_effects) = state.tts.synthesize(&request).await?;
    side_effects.detach();

    let length = audio.bytes.len().to_string();
    Ok((
        [
            (header::CONTENT_TYPE, audio.format.mime_type().to_string()),
            (header::CONTENT_LENGTH, length),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        audio.bytes,
    )
        .into_response())
}

/// GET /api/v1/tts/voices
pub async fn list_voices(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "voices": state.tts.voices(),
    }))
}

/// POST /api/v1/tts/plays
pub async fn track_voice_play(
    State(state): State<AppState>,
    payload: std::result::Result<Json<VoicePlayEvent>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(event) = payload?;
    state.tts.record_play(&event).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Voice play tracked successfully",
    })))
}
