//! Prometheus and JSON metrics endpoints

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 50;

/// GET /metrics
///
/// Returns Prometheus-format metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let logs = state.logs.stats();
    let requests_total = state.metrics.requests_total();
    let errors_total = state.metrics.errors_total();
    let tracked_clients = state.rate_limiter.tracked_clients();

    let mut output = format!(
        r#"# HELP altread_requests_total Total number of HTTP requests processed
# TYPE altread_requests_total counter
altread_requests_total {}

# HELP altread_request_errors_total Total number of HTTP responses with status >= 400
# TYPE altread_request_errors_total counter
altread_request_errors_total {}

# HELP altread_log_entries_accepted_total Audit log entries accepted into the queue
# TYPE altread_log_entries_accepted_total counter
altread_log_entries_accepted_total {}

# HELP altread_log_entries_dropped_total Audit log entries dropped because the queue was full or closed
# TYPE altread_log_entries_dropped_total counter
altread_log_entries_dropped_total {}

# HELP altread_log_entries_persisted_total Audit log entries written to the database
# TYPE altread_log_entries_persisted_total counter
altread_log_entries_persisted_total {}

# HELP altread_log_entries_failed_total Audit log entries lost to failed batch inserts
# TYPE altread_log_entries_failed_total counter
altread_log_entries_failed_total {}

# HELP altread_log_queue_depth Current number of audit log entries waiting to be flushed
# TYPE altread_log_queue_depth gauge
altread_log_queue_depth {}

# HELP altread_rate_limit_tracked_clients Clients currently tracked by the rate limiter
# TYPE altread_rate_limit_tracked_clients gauge
altread_rate_limit_tracked_clients {}

# HELP altread_cache_enabled Whether the result cache is connected
# TYPE altread_cache_enabled gauge
altread_cache_enabled {}

# HELP altread_info Build information
# TYPE altread_info gauge
altread_info{{version="{}"}} 1
"#,
        requests_total,
        errors_total,
        logs.accepted,
        logs.dropped,
        logs.persisted,
        logs.failed,
        logs.queued,
        tracked_clients,
        u8::from(state.cache.is_enabled()),
        env!("CARGO_PKG_VERSION"),
    );

    let summary = state.metrics.summary();
    if !summary.is_empty() {
        output.push_str(
            "\n# HELP altread_endpoint_avg_response_time_ms Mean latency over retained samples\n\
             # TYPE altread_endpoint_avg_response_time_ms gauge\n",
        );
        for endpoint in &summary {
            output.push_str(&format!(
                "altread_endpoint_avg_response_time_ms{{endpoint=\"{}\"}} {:.3}\n",
                escape_label(&endpoint.endpoint),
                endpoint.avg_response_time_ms
            ));
        }
    }

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        output,
    )
}

/// Escape a Prometheus label value
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Query parameters for the JSON metrics endpoint
#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    /// `METHOD:path`, e.g. `POST:/api/v1/alt-text`
    pub endpoint: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/v1/metrics?endpoint=POST:/api/v1/alt-text&limit=50
///
/// Recent samples for one endpoint, or a per-endpoint summary when no
/// endpoint is given.
pub async fn recent_metrics(
    State(state): State<AppState>,
    params: std::result::Result<Query<MetricsQuery>, QueryRejection>,
) -> Result<Json<Value>> {
    let Query(params) = params?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);

    let data = match params.endpoint.filter(|e| !e.is_empty()) {
        Some(endpoint) => json!({
            "samples": state.metrics.recent(&endpoint, limit),
            "endpoint": endpoint,
        }),
        None => json!({
            "requestsTotal": state.metrics.requests_total(),
            "errorsTotal": state.metrics.errors_total(),
            "endpoints": state.metrics.summary(),
            "logWriter": state.logs.stats(),
        }),
    };

    Ok(Json(json!({ "success": true, "data": data })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_label() {
        assert_eq!(escape_label("GET:/api/v1/tts"), "GET:/api/v1/tts");
        assert_eq!(escape_label("a\"b"), "a\\\"b");
        assert_eq!(escape_label("a\\b\nc"), "a\\\\b\\nc");
    }
}
