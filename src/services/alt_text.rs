//! Alt-text generation pipeline.
//!
//! validate → readiness → fingerprint → cache lookup → generate (primary,
//! then fallback) → finalize. Finalizing spawns the cache write and the
//! `image_uploads` row as [`SideEffects`] so they outlive the request, and
//! queues an audit entry on the [`LogWriter`].
//!
//! Identical images arriving concurrently may both miss the cache and both
//! reach the provider; the last cache write wins.

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CacheError, ResultCache};
use crate::db::AuditStore;
use crate::effects::{EffectStatus, SideEffects};
use crate::error::ErrorCode;
use crate::hasher::{hash, Fingerprint};
use crate::log_writer::LogWriter;
use crate::models::{
    AltTextOptions, CachedOutcome, GenerateAltTextRequest, GenerateAltTextResponse,
    ImageUploadRecord, LogEntry, LogLevel,
};
use crate::services::openai::{ProviderError, VisionModel, VisionRequest};

/// Largest decoded image accepted, in bytes
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Image subtypes accepted in the data URI header
pub const ALLOWED_FORMATS: &[&str] = &["jpeg", "jpg", "png", "gif", "webp"];

/// Confidence reported for every successful description
pub const CONFIDENCE: f64 = 0.95;

const SERVICE: &str = "openai";

/// Model settings for generation
#[derive(Debug, Clone)]
pub struct AltTextConfig {
    pub model: String,
    pub fallback_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for AltTextConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            fallback_model: "gpt-4o".to_string(),
            max_tokens: 300,
            temperature: 0.3,
        }
    }
}

/// Why an image payload was refused before reaching the model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("No image data provided")]
    Missing,

    #[error("Invalid image format. Expected base64 encoded image with data:image/ prefix")]
    NotDataUri,

    #[error("Invalid base64 encoding")]
    MissingPayload,

    #[error("Invalid base64 encoding: {0}")]
    BadBase64(String),

    #[error("Image too large. Maximum size is 20MB")]
    TooLarge,

    #[error("Unsupported image format. Supported: JPEG, PNG, GIF, WebP")]
    UnsupportedFormat,
}

impl ImageError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ImageError::Missing => ErrorCode::MissingImage,
            ImageError::NotDataUri | ImageError::MissingPayload | ImageError::BadBase64(_) => {
                ErrorCode::InvalidImage
            }
            ImageError::TooLarge => ErrorCode::ImageTooLarge,
            ImageError::UnsupportedFormat => ErrorCode::UnsupportedImageFormat,
        }
    }
}

/// A data URI that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    pub bytes: Vec<u8>,
    /// Lowercase subtype from the header, e.g. `png`
    pub format: String,
}

impl ValidatedImage {
    pub fn mime_type(&self) -> String {
        format!("image/{}", self.format)
    }
}

/// Check a `data:image/<format>;base64,<payload>` string and decode it.
pub fn validate_image(data: &str) -> Result<ValidatedImage, ImageError> {
    if data.is_empty() {
        return Err(ImageError::Missing);
    }
    if !data.starts_with("data:image/") {
        return Err(ImageError::NotDataUri);
    }

    let (header, payload) = data.split_once(',').ok_or(ImageError::MissingPayload)?;

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| ImageError::BadBase64(e.to_string()))?;

    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ImageError::TooLarge);
    }

    let format = header["data:image/".len()..]
        .split(';')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !ALLOWED_FORMATS.contains(&format.as_str()) {
        return Err(ImageError::UnsupportedFormat);
    }

    Ok(ValidatedImage { bytes, format })
}

/// Build the instruction text sent alongside the image.
pub fn build_prompt(options: &AltTextOptions) -> String {
    let mut prompt = String::from(
        "Generate a concise alt text description for this image in 1-2 sentences \
         (max 150 characters). Focus on the most important elements. ",
    );

    if options.include_objects {
        prompt.push_str("Include descriptions of objects, people, and activities visible in the image. ");
    }
    if options.include_colors {
        prompt.push_str("Mention colors and visual elements. ");
    }
    if options.include_text {
        prompt.push_str("Include any text that appears in the image. ");
    }
    if let Some(max_length) = options.max_length_chars() {
        prompt.push_str(&format!("Keep the description under {} characters. ", max_length));
    }

    prompt.push_str(
        "Keep it brief and informative for screen readers. Aim for 100-150 characters maximum.",
    );
    prompt
}

/// Result of one pipeline run
pub struct AltTextOutcome {
    pub response: GenerateAltTextResponse,
    /// Whether the response was served from the cache
    pub cached: bool,
    pub side_effects: SideEffects,
}

impl AltTextOutcome {
    /// HTTP status for the response body
    pub fn status(&self) -> StatusCode {
        match self.response.code {
            Some(code) if !self.response.success => code.status(),
            _ => StatusCode::OK,
        }
    }
}

/// Orchestrates alt-text generation over the cache, provider and audit store.
pub struct AltTextService {
    vision: Option<Arc<dyn VisionModel>>,
    cache: ResultCache,
    store: Arc<dyn AuditStore>,
    logs: LogWriter,
    config: AltTextConfig,
}

impl AltTextService {
    /// `vision` is `None` when no API key is configured.
    pub fn new(
        vision: Option<Arc<dyn VisionModel>>,
        cache: ResultCache,
        store: Arc<dyn AuditStore>,
        logs: LogWriter,
        config: AltTextConfig,
    ) -> Self {
        Self {
            vision,
            cache,
            store,
            logs,
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.vision.is_some()
    }

    pub fn config(&self) -> &AltTextConfig {
        &self.config
    }

    pub async fn generate(&self, request: &GenerateAltTextRequest) -> AltTextOutcome {
        let started = Instant::now();

        let image = match validate_image(&request.image) {
            Ok(image) => image,
            Err(err) => {
                let fingerprint = hash(request.image.as_bytes());
                return self.reject(fingerprint, None, err.code(), err.to_string(), started);
            }
        };

        let fingerprint = hash(&image.bytes);

        let Some(vision) = self.vision.as_ref() else {
            return self.reject(
                fingerprint,
                Some(&image),
                ErrorCode::ApiKeyNotConfigured,
                "OpenAI API key is not configured. Set OPENAI_API_KEY to enable alt text generation."
                    .to_string(),
                started,
            );
        };

        match self.cache.get(&fingerprint).await {
            Ok(Some(cached)) => {
                debug!(fingerprint = %fingerprint, success = cached.success, "Alt text cache hit");
                return AltTextOutcome {
                    response: from_cached(cached, elapsed_ms(started)),
                    cached: true,
                    side_effects: SideEffects::new(),
                };
            }
            Ok(None) | Err(CacheError::Unavailable) => {}
            Err(e) => warn!(error = %e, fingerprint = %fingerprint, "Cache lookup failed, treating as miss"),
        }

        let prompt = build_prompt(&request.options);
        match self
            .generate_with_fallback(vision.as_ref(), &fingerprint, &prompt, &request.image)
            .await
        {
            Ok((text, model)) => self.finish_success(fingerprint, &image, text, model, started),
            Err(err) => self.finish_failure(fingerprint, &image, err, started),
        }
    }

    /// One call with the primary model, then one with the fallback model if
    /// it differs. Returns the text and the model that produced it.
    async fn generate_with_fallback(
        &self,
        vision: &dyn VisionModel,
        fingerprint: &Fingerprint,
        prompt: &str,
        image_url: &str,
    ) -> Result<(String, String), ProviderError> {
        let primary = &self.config.model;
        let err = match self.attempt(vision, primary, prompt, image_url).await {
            Ok(text) => return Ok((text, primary.clone())),
            Err(err) => err,
        };

        let fallback = &self.config.fallback_model;
        if fallback == primary {
            return Err(err);
        }

        warn!(model = %primary, fallback = %fallback, error = %err, "Primary model failed, retrying with fallback");
        self.logs.log(
            LogEntry::new(
                LogLevel::Warning,
                SERVICE,
                format!("Model {} failed, falling back to {}: {}", primary, fallback, err),
            )
            .with_trace_id(fingerprint.to_hex()),
        );

        let text = self.attempt(vision, fallback, prompt, image_url).await?;
        Ok((text, fallback.clone()))
    }

    async fn attempt(
        &self,
        vision: &dyn VisionModel,
        model: &str,
        prompt: &str,
        image_url: &str,
    ) -> Result<String, ProviderError> {
        let request = VisionRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            image_url: image_url.to_string(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let text = vision.describe(&request).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(text.to_string())
    }

    fn finish_success(
        &self,
        fingerprint: Fingerprint,
        image: &ValidatedImage,
        text: String,
        model: String,
        started: Instant,
    ) -> AltTextOutcome {
        let processing_time = elapsed_ms(started);
        let outcome = CachedOutcome::success(text.clone(), model.clone(), processing_time);

        let mut side_effects = SideEffects::new();
        self.spawn_cache_write(&mut side_effects, fingerprint, outcome);
        self.spawn_tracking(
            &mut side_effects,
            upload_record(&fingerprint, Some(image), processing_time, Ok(text.as_str())),
        );

        self.logs.log(
            LogEntry::new(
                LogLevel::Info,
                SERVICE,
                format!("Generated alt text with {} in {}ms", model, processing_time),
            )
            .with_trace_id(fingerprint.to_hex())
            .with_context(json!({ "model": model, "processing_time_ms": processing_time })),
        );

        AltTextOutcome {
            response: GenerateAltTextResponse {
                success: true,
                alt_text: text,
                confidence: Some(CONFIDENCE),
                processing_time,
                model_used: Some(model),
                error: None,
                code: None,
            },
            cached: false,
            side_effects,
        }
    }

    fn finish_failure(
        &self,
        fingerprint: Fingerprint,
        image: &ValidatedImage,
        err: ProviderError,
        started: Instant,
    ) -> AltTextOutcome {
        let processing_time = elapsed_ms(started);
        let code = err.code();
        let message = err.to_string();

        let mut side_effects = SideEffects::new();
        self.spawn_cache_write(
            &mut side_effects,
            fingerprint,
            CachedOutcome::failure(message.clone(), code, processing_time),
        );
        self.spawn_tracking(
            &mut side_effects,
            upload_record(&fingerprint, Some(image), processing_time, Err(message.as_str())),
        );

        self.logs.log(
            LogEntry::new(
                LogLevel::Error,
                SERVICE,
                format!("Alt text generation failed: {}", message),
            )
            .with_trace_id(fingerprint.to_hex())
            .with_context(json!({ "code": code, "processing_time_ms": processing_time })),
        );

        AltTextOutcome {
            response: failure_response(message, code, processing_time),
            cached: false,
            side_effects,
        }
    }

    /// Validation and readiness failures: no cache write, just tracking and
    /// an audit entry.
    fn reject(
        &self,
        fingerprint: Fingerprint,
        image: Option<&ValidatedImage>,
        code: ErrorCode,
        message: String,
        started: Instant,
    ) -> AltTextOutcome {
        let processing_time = elapsed_ms(started);

        let mut side_effects = SideEffects::new();
        self.spawn_tracking(
            &mut side_effects,
            upload_record(&fingerprint, image, processing_time, Err(message.as_str())),
        );

        self.logs.log(
            LogEntry::new(LogLevel::Warning, SERVICE, format!("Alt text request rejected: {}", message))
                .with_trace_id(fingerprint.to_hex())
                .with_context(json!({ "code": code })),
        );

        AltTextOutcome {
            response: failure_response(message, code, processing_time),
            cached: false,
            side_effects,
        }
    }

    fn spawn_cache_write(&self, effects: &mut SideEffects, fingerprint: Fingerprint, outcome: CachedOutcome) {
        let cache = self.cache.clone();
        effects.spawn("cache", async move {
            if !cache.is_enabled() {
                return EffectStatus::Skipped;
            }
            let ttl = cache.ttl_for(&outcome);
            match cache.put(&fingerprint, &outcome, ttl).await {
                Ok(()) => EffectStatus::Done,
                Err(e) => EffectStatus::Failed(e.to_string()),
            }
        });
    }

    fn spawn_tracking(&self, effects: &mut SideEffects, record: ImageUploadRecord) {
        let store = Arc::clone(&self.store);
        let logs = self.logs.clone();
        effects.spawn("tracking", async move {
            match store.record_image_upload(&record).await {
                Ok(()) => EffectStatus::Done,
                Err(e) => {
                    logs.log(
                        LogEntry::new(
                            LogLevel::Error,
                            SERVICE,
                            format!("Failed to track image upload: {}", e),
                        )
                        .with_trace_id(record.image_hash.clone()),
                    );
                    EffectStatus::Failed(e.to_string())
                }
            }
        });
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn from_cached(cached: CachedOutcome, processing_time: u64) -> GenerateAltTextResponse {
    if cached.success {
        GenerateAltTextResponse {
            success: true,
            alt_text: cached.text,
            confidence: Some(CONFIDENCE),
            processing_time,
            model_used: cached.model_used,
            error: None,
            code: None,
        }
    } else {
        GenerateAltTextResponse {
            success: false,
            alt_text: cached.text,
            confidence: None,
            processing_time,
            model_used: None,
            error: cached.error,
            code: Some(cached.error_code.unwrap_or(ErrorCode::GenerationFailed)),
        }
    }
}

fn failure_response(message: String, code: ErrorCode, processing_time: u64) -> GenerateAltTextResponse {
    GenerateAltTextResponse {
        success: false,
        alt_text: String::new(),
        confidence: None,
        processing_time,
        model_used: None,
        error: Some(message),
        code: Some(code),
    }
}

fn upload_record(
    fingerprint: &Fingerprint,
    image: Option<&ValidatedImage>,
    processing_time: u64,
    result: Result<&str, &str>,
) -> ImageUploadRecord {
    let now = Utc::now();
    let (file_size, file_type, extension) = match image {
        Some(image) => (
            i32::try_from(image.bytes.len()).unwrap_or(i32::MAX),
            image.mime_type(),
            image.format.clone(),
        ),
        None => (0, "unknown".to_string(), "bin".to_string()),
    };
    let (success, alt_text, error_message) = match result {
        Ok(text) => (true, text.to_string(), None),
        Err(message) => (false, String::new(), Some(message.to_string())),
    };

    ImageUploadRecord {
        id: Uuid::new_v4(),
        file_name: format!("image_{}.{}", now.timestamp(), extension),
        file_size,
        file_type,
        image_hash: fingerprint.to_hex(),
        alt_text,
        processing_time_ms: Some(i32::try_from(processing_time).unwrap_or(i32::MAX)),
        success,
        error_message,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheTtl, MemoryBackend};
    use crate::log_writer::LogWriterConfig;
    use crate::test_support::{png_data_uri, MemoryStore, StalledBackend, StubVision};
    use std::time::Duration;

    struct Harness {
        service: AltTextService,
        vision: Arc<StubVision>,
        store: Arc<MemoryStore>,
        cache: ResultCache,
        logs: LogWriter,
    }

    fn harness_with(vision: Option<Arc<StubVision>>, cache: ResultCache) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let logs = LogWriter::start(store.clone(), LogWriterConfig::default());
        let stub = vision.clone().unwrap_or_else(|| Arc::new(StubVision::new()));
        let service = AltTextService::new(
            vision.map(|v| v as Arc<dyn VisionModel>),
            cache.clone(),
            store.clone(),
            logs.clone(),
            AltTextConfig::default(),
        );
        Harness {
            service,
            vision: stub,
            store,
            cache,
            logs,
        }
    }

    fn harness(vision: StubVision) -> Harness {
        let cache = ResultCache::new(Arc::new(MemoryBackend::new()), CacheTtl::default());
        harness_with(Some(Arc::new(vision)), cache)
    }

    fn request(image: String) -> GenerateAltTextRequest {
        GenerateAltTextRequest {
            image,
            options: AltTextOptions::default(),
        }
    }

    #[test]
    fn test_validate_image_order() {
        assert_eq!(validate_image("").unwrap_err(), ImageError::Missing);
        assert_eq!(validate_image("hello").unwrap_err(), ImageError::NotDataUri);
        assert_eq!(
            validate_image("data:image/png;base64").unwrap_err(),
            ImageError::MissingPayload
        );
        assert!(matches!(
            validate_image("data:image/png;base64,***").unwrap_err(),
            ImageError::BadBase64(_)
        ));
        assert_eq!(
            validate_image("data:image/svg+xml;base64,PHN2Zz4=").unwrap_err(),
            ImageError::UnsupportedFormat
        );

        let image = validate_image("data:image/PNG;base64,aGVsbG8=").unwrap();
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.mime_type(), "image/png");
    }

    #[test]
    fn test_validate_image_size_limit() {
        let at_limit = png_data_uri(MAX_IMAGE_BYTES);
        assert!(validate_image(&at_limit).is_ok());

        let over = png_data_uri(MAX_IMAGE_BYTES + 1);
        let err = validate_image(&over).unwrap_err();
        assert_eq!(err, ImageError::TooLarge);
        assert_eq!(err.code(), ErrorCode::ImageTooLarge);
    }

    #[test]
    fn test_build_prompt_toggles() {
        let plain = build_prompt(&AltTextOptions::default());
        assert!(plain.starts_with("Generate a concise alt text description"));
        assert!(plain.ends_with("Aim for 100-150 characters maximum."));
        assert!(!plain.contains("Mention colors"));

        let full = build_prompt(&AltTextOptions {
            include_objects: true,
            include_colors: true,
            include_text: true,
            max_length: Some(79.6),
        });
        let objects = full.find("Include descriptions of objects").unwrap();
        let colors = full.find("Mention colors and visual elements.").unwrap();
        let text = full.find("Include any text that appears").unwrap();
        let length = full.find("Keep the description under 80 characters.").unwrap();
        assert!(objects < colors && colors < text && text < length);
    }

    #[tokio::test]
    async fn test_fractional_max_length_reaches_prompt() {
        let h = harness(StubVision::new().respond("gpt-4o-mini", Ok("A lighthouse.".into())));
        let mut req = request(png_data_uri(128));
        req.options = serde_json::from_str(r#"{"maxLength": 42.7}"#).unwrap();

        let outcome = h.service.generate(&req).await;
        assert!(outcome.response.success);
        let prompts = h.vision.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Keep the description under 43 characters."));
    }

    #[tokio::test]
    async fn test_missing_image_never_calls_model() {
        let h = harness(StubVision::new().respond("gpt-4o-mini", Ok("unused".into())));

        let outcome = h.service.generate(&request(String::new())).await;
        assert!(!outcome.response.success);
        assert_eq!(outcome.response.code, Some(ErrorCode::MissingImage));
        assert_eq!(outcome.status(), StatusCode::BAD_REQUEST);
        assert!(outcome.response.alt_text.is_empty());

        let effects = outcome.side_effects.join().await;
        assert_eq!(effects, vec![("tracking", EffectStatus::Done)]);
        assert!(h.vision.calls().is_empty());

        let uploads = h.store.image_uploads();
        assert_eq!(uploads.len(), 1);
        assert!(!uploads[0].success);
        assert_eq!(uploads[0].error_message.as_deref(), Some("No image data provided"));
        h.logs.shutdown().await;
    }

    #[tokio::test]
    async fn test_primary_failure_uses_fallback() {
        let h = harness(
            StubVision::new()
                .respond("gpt-4o-mini", Err(ProviderError::Unavailable("boom".into())))
                .respond("gpt-4o", Ok("A dog on a beach.".into())),
        );

        let outcome = h.service.generate(&request(png_data_uri(64))).await;
        assert!(outcome.response.success);
        assert_eq!(outcome.response.alt_text, "A dog on a beach.");
        assert_eq!(outcome.response.model_used.as_deref(), Some("gpt-4o"));
        assert_eq!(h.vision.calls(), vec!["gpt-4o-mini", "gpt-4o"]);
        outcome.side_effects.join().await;
        h.logs.shutdown().await;
    }

    #[tokio::test]
    async fn test_blank_completion_triggers_fallback() {
        let h = harness(
            StubVision::new()
                .respond("gpt-4o-mini", Ok("   ".into()))
                .respond("gpt-4o", Ok("A lighthouse at dusk.".into())),
        );

        let outcome = h.service.generate(&request(png_data_uri(64))).await;
        assert_eq!(outcome.response.alt_text, "A lighthouse at dusk.");
        assert_eq!(h.vision.calls().len(), 2);
        h.logs.shutdown().await;
    }

    #[tokio::test]
    async fn test_both_models_fail() {
        let h = harness(
            StubVision::new()
                .respond("gpt-4o-mini", Err(ProviderError::QuotaExceeded))
                .respond("gpt-4o", Err(ProviderError::QuotaExceeded)),
        );
        let image = png_data_uri(64);

        let outcome = h.service.generate(&request(image.clone())).await;
        assert!(!outcome.response.success);
        assert_eq!(outcome.response.code, Some(ErrorCode::QuotaExceeded));
        assert_eq!(outcome.status(), StatusCode::BAD_GATEWAY);
        outcome.side_effects.join().await;

        // failure is cached with the short TTL and replayed verbatim
        let fingerprint = hash(&validate_image(&image).unwrap().bytes);
        let cached = h.cache.get(&fingerprint).await.unwrap().unwrap();
        assert!(!cached.success);
        assert_eq!(cached.error_code, Some(ErrorCode::QuotaExceeded));

        let again = h.service.generate(&request(image)).await;
        assert!(again.cached);
        assert_eq!(again.response.code, Some(ErrorCode::QuotaExceeded));
        assert_eq!(h.vision.calls().len(), 2);
        h.logs.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let h = harness(
            StubVision::new().respond("gpt-4o-mini", Ok("A red bicycle leaning against a wall.".into())),
        );
        let image = png_data_uri(5 * 1024);

        let first = h.service.generate(&request(image.clone())).await;
        assert!(first.response.success);
        assert_eq!(first.response.alt_text, "A red bicycle leaning against a wall.");
        assert_eq!(first.response.confidence, Some(0.95));
        assert!(!first.cached);

        let effects = first.side_effects.join().await;
        assert!(effects.iter().all(|(_, status)| *status == EffectStatus::Done));

        let second = h.service.generate(&request(image)).await;
        assert!(second.cached);
        assert_eq!(second.response.alt_text, "A red bicycle leaning against a wall.");
        assert_eq!(second.response.confidence, Some(0.95));
        assert_eq!(h.vision.calls().len(), 1);

        h.logs.shutdown().await;
        assert!(h
            .store
            .logs()
            .iter()
            .any(|entry| entry.message.starts_with("Generated alt text with gpt-4o-mini")));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_service_unavailable() {
        let cache = ResultCache::new(Arc::new(MemoryBackend::new()), CacheTtl::default());
        let h = harness_with(None, cache);

        let image = png_data_uri(64);
        let outcome = h.service.generate(&request(image.clone())).await;
        assert_eq!(outcome.response.code, Some(ErrorCode::ApiKeyNotConfigured));
        assert_eq!(outcome.status(), StatusCode::SERVICE_UNAVAILABLE);

        let effects = outcome.side_effects.join().await;
        assert_eq!(effects, vec![("tracking", EffectStatus::Done)]);
        let fingerprint = hash(&validate_image(&image).unwrap().bytes);
        assert!(h.cache.get(&fingerprint).await.unwrap().is_none());
        h.logs.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_cache_still_generates() {
        let vision = Arc::new(StubVision::new().respond("gpt-4o-mini", Ok("A mountain lake.".into())));
        let h = harness_with(Some(vision), ResultCache::disabled(CacheTtl::default()));
        let image = png_data_uri(64);

        let first = h.service.generate(&request(image.clone())).await;
        assert!(first.response.success);
        let effects = first.side_effects.join().await;
        assert!(effects.contains(&("cache", EffectStatus::Skipped)));

        let second = h.service.generate(&request(image)).await;
        assert!(!second.cached);
        assert_eq!(h.vision.calls().len(), 2);
        h.logs.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_cache_is_treated_as_miss() {
        let vision = Arc::new(StubVision::new().respond("gpt-4o-mini", Ok("A harbour at dusk.".into())));
        let cache = ResultCache::new(Arc::new(StalledBackend), CacheTtl::default())
            .with_op_timeout(Duration::from_millis(300));
        let h = harness_with(Some(vision), cache);

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            h.service.generate(&request(png_data_uri(64))),
        )
        .await
        .expect("generation must not wait on the cache");
        assert!(outcome.response.success);
        assert_eq!(outcome.response.alt_text, "A harbour at dusk.");
        assert_eq!(h.vision.calls(), vec!["gpt-4o-mini"]);

        let effects = outcome.side_effects.join().await;
        assert!(effects
            .iter()
            .any(|(name, status)| *name == "cache" && matches!(status, EffectStatus::Failed(_))));
        h.logs.shutdown().await;
    }

    #[tokio::test]
    async fn test_tracking_failure_does_not_fail_request() {
        let h = harness(StubVision::new().respond("gpt-4o-mini", Ok("A cat.".into())));
        h.store.set_failing(true);

        let outcome = h.service.generate(&request(png_data_uri(64))).await;
        assert!(outcome.response.success);

        let effects = outcome.side_effects.join().await;
        assert!(matches!(
            effects.iter().find(|(name, _)| *name == "tracking"),
            Some((_, EffectStatus::Failed(_)))
        ));
        h.logs.shutdown().await;
    }
}
