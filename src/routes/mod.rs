//! HTTP surface

pub mod alt_text;
pub mod analytics;
pub mod health;
pub mod metrics;
pub mod tts;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::metrics::track_requests;
use crate::rate_limit::rate_limit;
use crate::state::AppState;

/// Request bodies carry base64 images up to 20 MiB decoded.
const MAX_BODY_BYTES: usize = 30 * 1024 * 1024;

/// Build the application router.
///
/// Rate limiting covers `/api/v1` only. Process endpoints stay reachable for
/// probes and scrapers.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/alt-text", post(alt_text::generate_alt_text))
        .route("/alt-text/health", get(alt_text::health))
        .route("/tts", post(tts::generate_speech))
        .route("/tts/voices", get(tts::list_voices))
        .route("/tts/plays", post(tts::track_voice_play))
        .route("/analytics", get(analytics::get_analytics))
        .route("/metrics", get(metrics::recent_metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(metrics::prometheus_metrics))
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .with_state(state)
}
