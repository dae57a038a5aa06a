//! Per-client sliding-window rate limiting

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::AppError;
use crate::state::AppState;

/// Admission decision for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: usize },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Admits at most `limit` requests per client in any trailing `window`.
///
/// State is process-local and lost on restart. One mutex guards the whole
/// map so the prune/count/append sequence for a client is atomic.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit,
            window,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    /// Admission check against an explicit clock reading.
    pub fn check_at(&self, client: &str, now: Instant) -> RateDecision {
        let cutoff = now.checked_sub(self.window);
        let mut windows = self.windows.lock();

        let (decision, now_empty) = {
            let stamps = windows.entry(client.to_string()).or_default();
            prune(stamps, cutoff);

            if stamps.len() >= self.limit {
                let retry_after = stamps
                    .front()
                    .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                    .unwrap_or(self.window);
                (RateDecision::Limited { retry_after }, stamps.is_empty())
            } else {
                // keep the sequence monotonic even if callers pass an older clock
                let stamp = stamps.back().map_or(now, |last| now.max(*last));
                stamps.push_back(stamp);
                (
                    RateDecision::Allowed {
                        remaining: self.limit - stamps.len(),
                    },
                    false,
                )
            }
        };

        if now_empty {
            windows.remove(client);
        }
        decision
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Prune every client and forget the ones with no recent requests.
    ///
    /// Returns the number of clients removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let cutoff = now.checked_sub(self.window);
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, stamps| {
            prune(stamps, cutoff);
            !stamps.is_empty()
        });
        before - windows.len()
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }
}

/// Drop timestamps at or before the cutoff. The deque is sorted, so
/// expired entries are always at the front.
fn prune(stamps: &mut VecDeque<Instant>, cutoff: Option<Instant>) {
    let Some(cutoff) = cutoff else {
        return;
    };
    while stamps.front().is_some_and(|t| *t <= cutoff) {
        stamps.pop_front();
    }
}

/// Resolve the identity a request is rate limited under.
///
/// Prefers the first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer
/// address.
pub fn client_identity(req: &Request) -> String {
    let headers = req.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware rejecting over-limit clients with 429 `RATE_LIMIT_EXCEEDED`.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let client = client_identity(&req);

    match state.rate_limiter.check(&client) {
        RateDecision::Allowed { .. } => next.run(req).await,
        RateDecision::Limited { retry_after } => {
            debug!(client = %client, retry_after_ms = retry_after.as_millis() as u64, "Rate limit exceeded");
            AppError::RateLimited { retry_after }.into_response()
        }
    }
}
