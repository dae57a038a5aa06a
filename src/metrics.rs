//! In-memory request metrics.
//!
//! Keeps the most recent samples per endpoint in a bounded ring, plus
//! process-wide request and error counters for `/metrics`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::models::{LogEntry, LogLevel};
use crate::state::AppState;

/// One observed request
#[derive(Debug, Clone, Serialize)]
pub struct MetricSample {
    pub path: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: f64,
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(method: &str, path: &str, status_code: u16, response_time_ms: f64) -> Self {
        Self {
            path: path.to_string(),
            method: method.to_string(),
            status_code,
            response_time_ms,
            is_error: status_code >= 400,
            timestamp: Utc::now(),
        }
    }

    /// `METHOD:path`
    pub fn endpoint(&self) -> String {
        endpoint_key(&self.method, &self.path)
    }
}

pub fn endpoint_key(method: &str, path: &str) -> String {
    format!("{}:{}", method, path)
}

/// Aggregate over the samples currently retained for one endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EndpointSummary {
    pub endpoint: String,
    pub count: usize,
    pub error_count: usize,
    pub avg_response_time_ms: f64,
}

pub struct MetricsTracker {
    samples: RwLock<HashMap<String, VecDeque<MetricSample>>>,
    capacity: usize,
    requests_total: AtomicU64,
    errors_total: AtomicU64,
}

impl MetricsTracker {
    /// `capacity` samples are kept per endpoint (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
        }
    }

    pub fn record(&self, sample: MetricSample) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if sample.is_error {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
        }

        let mut samples = self.samples.write();
        let ring = samples.entry(sample.endpoint()).or_default();
        while ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(sample);
    }

    /// The newest `limit` samples for an endpoint, oldest first.
    pub fn recent(&self, endpoint: &str, limit: usize) -> Vec<MetricSample> {
        let samples = self.samples.read();
        match samples.get(endpoint) {
            Some(ring) => ring
                .iter()
                .skip(ring.len().saturating_sub(limit))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Copy of every retained sample, keyed by endpoint.
    pub fn snapshot(&self) -> HashMap<String, Vec<MetricSample>> {
        self.samples
            .read()
            .iter()
            .map(|(endpoint, ring)| (endpoint.clone(), ring.iter().cloned().collect()))
            .collect()
    }

    /// Per-endpoint aggregates, sorted by endpoint key.
    pub fn summary(&self) -> Vec<EndpointSummary> {
        let samples = self.samples.read();
        let mut summary: Vec<EndpointSummary> = samples
            .iter()
            .map(|(endpoint, ring)| {
                let count = ring.len();
                let error_count = ring.iter().filter(|s| s.is_error).count();
                let total: f64 = ring.iter().map(|s| s.response_time_ms).sum();
                EndpointSummary {
                    endpoint: endpoint.clone(),
                    count,
                    error_count,
                    avg_response_time_ms: if count > 0 { total / count as f64 } else { 0.0 },
                }
            })
            .collect();
        summary.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        summary
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn errors_total(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }
}

/// Key for requests that matched no route
pub const UNMATCHED_PATH: &str = "unmatched";

/// Middleware recording a sample and an audit line for every request except
/// `/health`.
///
/// Samples are keyed by the matched route template so arbitrary request paths
/// cannot grow the tracker. The audit line keeps the concrete path.
pub async fn track_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if path == "/health" {
        return next.run(req).await;
    }
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH.to_string());

    let method = req.method().to_string();
    let started = Instant::now();
    let response = next.run(req).await;
    let elapsed = started.elapsed();

    let status = response.status().as_u16();
    state.metrics.record(MetricSample::new(
        &method,
        &route,
        status,
        elapsed.as_secs_f64() * 1000.0,
    ));

    state.logs.log(LogEntry::new(
        LogLevel::for_status(status),
        "api",
        format!("{} {} - {} ({}ms)", method, path, status, elapsed.as_millis()),
    ));

    response
}
