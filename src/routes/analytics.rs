//! Usage analytics endpoint

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use crate::error::{AppError, ErrorCode, Result};
use crate::models::TimeRange;
use crate::state::AppState;

/// Query parameters for the analytics endpoint
#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    /// "7d", "30d", "90d" or "all" (default: "30d")
    #[serde(rename = "timeRange", alias = "time_range")]
    pub time_range: Option<String>,
}

/// GET /api/v1/analytics?timeRange=30d
pub async fn get_analytics(
    State(state): State<AppState>,
    params: std::result::Result<Query<AnalyticsQuery>, QueryRejection>,
) -> Result<Json<Value>> {
    let Query(params) = params?;
    let range = match params.time_range.as_deref().filter(|r| !r.is_empty()) {
        None => TimeRange::default(),
        Some(raw) => TimeRange::parse(raw).ok_or_else(|| {
            AppError::coded(
                ErrorCode::InvalidTimeRange,
                "Invalid timeRange parameter. Must be one of: 7d, 30d, 90d, all",
            )
        })?,
    };

    let data = state.store.analytics(range).await.map_err(|e| {
        error!(error = %e, range = ?range, "Failed to compute analytics");
        AppError::coded(ErrorCode::DatabaseError, "Failed to retrieve analytics data")
    })?;

    Ok(Json(json!({
        "success": true,
        "timeRange": range,
        "data": data,
    })))
}
