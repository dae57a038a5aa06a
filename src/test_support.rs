//! In-memory stand-ins for the database and provider, shared by unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use parking_lot::Mutex;

use crate::cache::{CacheBackend, CacheError, MemoryBackend, ResultCache};
use crate::config::Config;
use crate::db::{percentage, AuditStore};
use crate::error::{AppError, Result};
use crate::log_writer::LogWriter;
use crate::models::{
    AnalyticsData, ImageCountByDate, ImageUploadRecord, LogEntry, TimeRange, VoicePlayRecord,
    VoiceUsageStat,
};
use crate::services::openai::{
    ProviderError, SpeechModel, SpeechRequest, VisionModel, VisionRequest,
};
use crate::state::AppState;

/// `data:image/png;base64,...` whose decoded payload is exactly `size` bytes
pub fn png_data_uri(size: usize) -> String {
    const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let mut bytes = vec![0u8; size];
    let head = size.min(SIGNATURE.len());
    bytes[..head].copy_from_slice(&SIGNATURE[..head]);
    format!("data:image/png;base64,{}", STANDARD.encode(bytes))
}

/// Audit store kept in memory. `set_failing(true)` makes every call error.
#[derive(Default)]
pub struct MemoryStore {
    logs: Mutex<Vec<LogEntry>>,
    images: Mutex<Vec<ImageUploadRecord>>,
    voices: Mutex<Vec<VoicePlayRecord>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.lock().clone()
    }

    pub fn image_uploads(&self) -> Vec<ImageUploadRecord> {
        self.images.lock().clone()
    }

    pub fn voice_plays(&self) -> Vec<VoicePlayRecord> {
        self.voices.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(AppError::DatabaseError("store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_logs(&self, entries: &[LogEntry]) -> Result<usize> {
        self.check()?;
        self.logs.lock().extend_from_slice(entries);
        Ok(entries.len())
    }

    async fn record_image_upload(&self, record: &ImageUploadRecord) -> Result<()> {
        self.check()?;
        self.images.lock().push(record.clone());
        Ok(())
    }

    async fn record_voice_play(&self, record: &VoicePlayRecord) -> Result<()> {
        self.check()?;
        self.voices.lock().push(record.clone());
        Ok(())
    }

    async fn analytics(&self, range: TimeRange) -> Result<AnalyticsData> {
        self.check()?;
        let since = range.since(Utc::now());
        let in_range = |t: &chrono::DateTime<Utc>| since.map_or(true, |since| *t >= since);

        let images: Vec<ImageUploadRecord> = self
            .images
            .lock()
            .iter()
            .filter(|r| in_range(&r.created_at))
            .cloned()
            .collect();
        let voices: Vec<VoicePlayRecord> = self
            .voices
            .lock()
            .iter()
            .filter(|r| in_range(&r.created_at))
            .cloned()
            .collect();

        let total_images = images.len() as i64;
        let total_successful = images.iter().filter(|r| r.success).count() as i64;
        let times: Vec<f64> = images
            .iter()
            .filter_map(|r| r.processing_time_ms)
            .map(f64::from)
            .collect();
        let average_processing_time = if times.is_empty() {
            0.0
        } else {
            times.iter().sum::<f64>() / times.len() as f64
        };

        let mut by_date: BTreeMap<String, i64> = BTreeMap::new();
        for record in &images {
            *by_date
                .entry(record.created_at.format("%Y-%m-%d").to_string())
                .or_default() += 1;
        }

        let total_voice_plays = voices.len() as i64;
        let mut by_voice: HashMap<String, i64> = HashMap::new();
        for record in &voices {
            *by_voice.entry(record.voice_name.clone()).or_default() += 1;
        }
        let mut voice_usage: Vec<VoiceUsageStat> = by_voice
            .into_iter()
            .map(|(voice_name, count)| VoiceUsageStat {
                voice_name,
                count,
                percentage: percentage(count, total_voice_plays),
            })
            .collect();
        voice_usage.sort_by(|a, b| b.count.cmp(&a.count).then(a.voice_name.cmp(&b.voice_name)));
        voice_usage.truncate(10);

        Ok(AnalyticsData {
            total_images_processed: total_images,
            total_voice_plays,
            images_over_time: by_date
                .into_iter()
                .map(|(date, count)| ImageCountByDate { date, count })
                .collect(),
            voice_usage,
            success_rate: percentage(total_successful, total_images),
            average_processing_time,
            total_successful,
            total_failed: total_images - total_successful,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

/// Cache backend that accepts every call and never answers
pub struct StalledBackend;

#[async_trait]
impl CacheBackend for StalledBackend {
    async fn get_raw(&self, _key: &str) -> std::result::Result<Option<String>, CacheError> {
        std::future::pending().await
    }

    async fn set_raw_ex(
        &self,
        _key: &str,
        _value: String,
        _ttl: Duration,
    ) -> std::result::Result<(), CacheError> {
        std::future::pending().await
    }

    async fn ping(&self) -> std::result::Result<(), CacheError> {
        std::future::pending().await
    }
}

/// Vision model answering from a per-model script
#[derive(Default)]
pub struct StubVision {
    responses: Mutex<HashMap<String, std::result::Result<String, ProviderError>>>,
    calls: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl StubVision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(
        self,
        model: &str,
        result: std::result::Result<String, ProviderError>,
    ) -> Self {
        self.responses.lock().insert(model.to_string(), result);
        self
    }

    /// Models called so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Prompts received so far, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl VisionModel for StubVision {
    async fn describe(
        &self,
        request: &VisionRequest,
    ) -> std::result::Result<String, ProviderError> {
        self.calls.lock().push(request.model.clone());
        self.prompts.lock().push(request.prompt.clone());
        self.responses
            .lock()
            .get(&request.model)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::Unavailable(format!("no stub for {}", request.model))))
    }
}

/// Speech model returning fixed audio or a fixed error
pub struct StubSpeech {
    result: std::result::Result<Vec<u8>, ProviderError>,
    requests: Mutex<Vec<SpeechRequest>>,
}

impl StubSpeech {
    pub fn returning(audio: Vec<u8>) -> Self {
        Self {
            result: Ok(audio),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: ProviderError) -> Self {
        Self {
            result: Err(err),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SpeechRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SpeechModel for StubSpeech {
    async fn synthesize(
        &self,
        request: &SpeechRequest,
    ) -> std::result::Result<Vec<u8>, ProviderError> {
        self.requests.lock().push(request.clone());
        self.result.clone()
    }
}

/// A fully wired state over in-memory backends
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub vision: Arc<StubVision>,
    pub speech: Arc<StubSpeech>,
}

impl TestApp {
    /// `configure` runs on the default config before the state is built.
    /// The provider stubs are wired in whenever an API key is set, which the
    /// default here does.
    pub fn new(vision: StubVision, speech: StubSpeech, configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::from_lookup(|_| None).expect("default config");
        config.openai_api_key = Some("sk-test".to_string());
        configure(&mut config);

        let store = Arc::new(MemoryStore::new());
        let vision = Arc::new(vision);
        let speech = Arc::new(speech);
        let (vision_model, speech_model) = if config.openai_api_key.is_some() {
            let vision_model: Arc<dyn VisionModel> = vision.clone();
            let speech_model: Arc<dyn SpeechModel> = speech.clone();
            (Some(vision_model), Some(speech_model))
        } else {
            (None, None)
        };

        let logs = LogWriter::start(store.clone(), config.log_writer.clone());
        let cache = ResultCache::new(Arc::new(MemoryBackend::new()), config.cache_ttl)
            .with_op_timeout(config.cache_op_timeout);
        let state = AppState::new(config, store.clone(), cache, logs, vision_model, speech_model);

        Self {
            state,
            store,
            vision,
            speech,
        }
    }
}
