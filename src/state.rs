//! Application state shared across handlers

use std::sync::Arc;

use crate::cache::ResultCache;
use crate::config::Config;
use crate::db::AuditStore;
use crate::log_writer::LogWriter;
use crate::metrics::MetricsTracker;
use crate::rate_limit::RateLimiter;
use crate::services::alt_text::AltTextService;
use crate::services::openai::{SpeechModel, VisionModel};
use crate::services::tts::TtsService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Durable audit and usage store
    pub store: Arc<dyn AuditStore>,
    /// Result cache, possibly disabled
    pub cache: ResultCache,
    /// Batched audit log writer
    pub logs: LogWriter,
    pub rate_limiter: Arc<RateLimiter>,
    /// Recent request samples for `/metrics`
    pub metrics: Arc<MetricsTracker>,
    pub alt_text: Arc<AltTextService>,
    pub tts: Arc<TtsService>,
}

impl AppState {
    /// Wire the services together around already-connected backends.
    ///
    /// `vision`/`speech` are the provider clients, `None` when no API key is
    /// configured.
    pub fn new(
        config: Config,
        store: Arc<dyn AuditStore>,
        cache: ResultCache,
        logs: LogWriter,
        vision: Option<Arc<dyn VisionModel>>,
        speech: Option<Arc<dyn SpeechModel>>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_requests,
            config.rate_limit_window,
        ));
        let metrics = Arc::new(MetricsTracker::new(config.metrics_capacity));

        let alt_text = Arc::new(AltTextService::new(
            vision,
            cache.clone(),
            Arc::clone(&store),
            logs.clone(),
            config.alt_text.clone(),
        ));
        let tts = Arc::new(TtsService::new(speech, Arc::clone(&store), logs.clone()));

        Self {
            config: Arc::new(config),
            store,
            cache,
            logs,
            rate_limiter,
            metrics,
            alt_text,
            tts,
        }
    }
}
