//! Sweep task - forgets clients that have gone quiet

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::rate_limit::RateLimiter;

/// Background task that periodically drops idle clients from the limiter so
/// its map does not grow with every address ever seen.
pub async fn rate_limit_sweep_task(limiter: Arc<RateLimiter>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // first tick completes immediately; nothing to sweep yet
    interval.tick().await;

    info!(interval_secs = every.as_secs(), "Rate limit sweep task started");

    loop {
        interval.tick().await;

        let removed = limiter.sweep();
        if removed > 0 {
            info!(
                removed = removed,
                tracked = limiter.tracked_clients(),
                "Swept idle rate limit clients"
            );
        } else {
            debug!("No idle rate limit clients to sweep");
        }
    }
}
