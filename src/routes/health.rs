//! Health and readiness endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub database: CheckStatus,
    pub cache: CheckStatus,
    pub openai: CheckStatus,
    pub log_queue: CheckStatus,
}

#[derive(Debug, Serialize)]
pub struct CheckStatus {
    pub healthy: bool,
    pub message: String,
}

impl CheckStatus {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
        }
    }
}

/// GET /health
///
/// Basic health check - returns 200 if the server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /ready
///
/// Only the database is required. A missing cache or API key is reported
/// but the service still answers in degraded mode.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let database = match state.store.ping().await {
        Ok(()) => CheckStatus::ok("Connected"),
        Err(e) => CheckStatus::failed(format!("Connection failed: {}", e)),
    };

    let cache = if !state.cache.is_enabled() {
        CheckStatus::failed("Disabled, every lookup is a miss")
    } else {
        match state.cache.ping().await {
            Ok(()) => CheckStatus::ok("Connected"),
            Err(e) => CheckStatus::failed(format!("Ping failed: {}", e)),
        }
    };

    let openai = if state.alt_text.is_configured() {
        CheckStatus::ok("API key configured")
    } else {
        CheckStatus::failed("OPENAI_API_KEY not set")
    };

    let log_queue = if state.logs.is_closed() {
        CheckStatus::failed("Shut down")
    } else {
        CheckStatus::ok(format!(
            "{} of {} queued",
            state.logs.queue_len(),
            state.logs.capacity()
        ))
    };

    let ready = database.healthy && !state.logs.is_closed();
    let (status, status_code) = if ready {
        ("ready", StatusCode::OK)
    } else {
        ("not_ready", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        status_code,
        Json(ReadinessResponse {
            status,
            checks: ReadinessChecks {
                database,
                cache,
                openai,
                log_queue,
            },
        }),
    )
}
