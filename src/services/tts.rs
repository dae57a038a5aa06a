//! Text-to-speech over the provider's speech endpoint

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::AuditStore;
use crate::effects::{EffectStatus, SideEffects};
use crate::error::{AppError, ErrorCode, Result};
use crate::log_writer::LogWriter;
use crate::models::{LogEntry, LogLevel, VoicePlayEvent, VoicePlayRecord};
use crate::services::openai::{ProviderError, SpeechModel, SpeechRequest};

/// Longest input accepted, in characters
pub const MAX_TEXT_LENGTH: usize = 4096;

pub const DEFAULT_MODEL: &str = "tts-1";
pub const DEFAULT_SPEED: f64 = 1.0;
pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 4.0;

const SERVICE: &str = "tts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Voice {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const VOICES: &[Voice] = &[
    Voice {
        id: "alloy",
        name: "Alloy",
        description: "Balanced and clear",
    },
    Voice {
        id: "echo",
        name: "Echo",
        description: "Deep and calm",
    },
    Voice {
        id: "fable",
        name: "Fable",
        description: "Warm and expressive",
    },
    Voice {
        id: "onyx",
        name: "Onyx",
        description: "Authoritative and firm",
    },
    Voice {
        id: "nova",
        name: "Nova",
        description: "Friendly and enthusiastic",
    },
    Voice {
        id: "shimmer",
        name: "Shimmer",
        description: "Crisp and pleasant",
    },
];

pub fn is_valid_voice(id: &str) -> bool {
    VOICES.iter().any(|voice| voice.id == id)
}

fn voice_ids() -> String {
    VOICES.iter().map(|v| v.id).collect::<Vec<_>>().join(", ")
}

/// Encoding of the returned audio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AudioFormat {
    #[default]
    Mp3,
    Opus,
    Aac,
    Flac,
}

impl AudioFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "opus" => Some(AudioFormat::Opus),
            "aac" => Some(AudioFormat::Aac),
            "flac" => Some(AudioFormat::Flac),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Opus => "opus",
            AudioFormat::Aac => "aac",
            AudioFormat::Flac => "flac",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Opus => "audio/ogg",
            AudioFormat::Aac => "audio/aac",
            AudioFormat::Flac => "audio/flac",
        }
    }
}

/// Request body for `POST /api/v1/tts`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TtsRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub voice: String,
    pub model: Option<String>,
    pub speed: Option<f64>,
    #[serde(default, alias = "responseFormat", alias = "format")]
    pub response_format: Option<String>,
}

/// Synthesized audio ready to be sent back
#[derive(Debug)]
pub struct SpeechAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

/// Check a TTS request and fill in defaults.
pub fn validate(request: &TtsRequest) -> Result<(SpeechRequest, AudioFormat)> {
    if request.text.trim().is_empty() {
        return Err(AppError::coded(
            ErrorCode::MissingText,
            "Text is required for speech generation",
        ));
    }
    if request.voice.is_empty() {
        return Err(AppError::coded(ErrorCode::MissingVoice, "Voice is required"));
    }
    if !is_valid_voice(&request.voice) {
        return Err(AppError::coded(
            ErrorCode::InvalidVoice,
            format!("Only OpenAI voices are supported. Valid voices: {}", voice_ids()),
        ));
    }
    if request.text.chars().count() > MAX_TEXT_LENGTH {
        return Err(AppError::coded(
            ErrorCode::TextTooLong,
            format!("Text too long. Maximum {} characters allowed.", MAX_TEXT_LENGTH),
        ));
    }

    let speed = request.speed.unwrap_or(DEFAULT_SPEED);
    if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
        return Err(AppError::coded(
            ErrorCode::InvalidSpeed,
            format!("Speed must be between {} and {}", MIN_SPEED, MAX_SPEED),
        ));
    }

    let format = match request.response_format.as_deref() {
        None => AudioFormat::default(),
        Some(raw) => AudioFormat::parse(raw).ok_or_else(|| {
            AppError::InvalidRequest(format!(
                "Unsupported response format '{}'. Supported: mp3, opus, aac, flac",
                raw
            ))
        })?,
    };

    let speech = SpeechRequest {
        model: request
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        voice: request.voice.clone(),
        input: request.text.clone(),
        speed,
        format: format.as_str().to_string(),
    };
    Ok((speech, format))
}

/// Map a provider failure onto the TTS error surface. Only quota, key and
/// rate-limit problems keep their own codes.
fn speech_error(err: &ProviderError) -> AppError {
    match err {
        ProviderError::QuotaExceeded
        | ProviderError::InvalidApiKey
        | ProviderError::RateLimited => AppError::coded(err.code(), err.to_string()),
        _ => AppError::coded(ErrorCode::TtsGenerationError, "Failed to generate speech"),
    }
}

pub struct TtsService {
    speech: Option<Arc<dyn SpeechModel>>,
    store: Arc<dyn AuditStore>,
    logs: LogWriter,
}

impl TtsService {
    /// `speech` is `None` when no API key is configured.
    pub fn new(
        speech: Option<Arc<dyn SpeechModel>>,
        store: Arc<dyn AuditStore>,
        logs: LogWriter,
    ) -> Self {
        Self { speech, store, logs }
    }

    pub fn is_configured(&self) -> bool {
        self.speech.is_some()
    }

    pub fn voices(&self) -> &'static [Voice] {
        VOICES
    }

    /// Validate, synthesize and schedule the `voice_plays` row.
    pub async fn synthesize(&self, request: &TtsRequest) -> Result<(SpeechAudio, SideEffects)> {
        let (speech_request, format) = validate(request)?;

        let speech = self.speech.as_ref().ok_or_else(|| {
            AppError::coded(
                ErrorCode::ClientNotInitialized,
                "OpenAI client not initialized. Please check your API key.",
            )
        })?;

        let bytes = match speech.synthesize(&speech_request).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, voice = %speech_request.voice, "Speech synthesis failed");
                self.logs.log(LogEntry::new(
                    LogLevel::Error,
                    SERVICE,
                    format!("Speech synthesis with voice {} failed: {}", speech_request.voice, err),
                ));
                return Err(speech_error(&err));
            }
        };

        let text_length = request.text.chars().count();
        self.logs.info(
            SERVICE,
            format!(
                "Generated {} bytes of {} audio with voice {} ({} chars)",
                bytes.len(),
                format.as_str(),
                speech_request.voice,
                text_length
            ),
        );

        let event = VoicePlayEvent {
            voice_name: speech_request.voice.clone(),
            text_length: i32::try_from(text_length).unwrap_or(i32::MAX),
            duration_ms: None,
            success: true,
            error_message: None,
        };
        let record = VoicePlayRecord::from_event(&event);
        let store = Arc::clone(&self.store);
        let logs = self.logs.clone();

        let mut side_effects = SideEffects::new();
        side_effects.spawn("tracking", async move {
            match store.record_voice_play(&record).await {
                Ok(()) => EffectStatus::Done,
                Err(e) => {
                    logs.error(SERVICE, format!("Failed to track voice play: {}", e));
                    EffectStatus::Failed(e.to_string())
                }
            }
        });

        Ok((SpeechAudio { bytes, format }, side_effects))
    }

    /// Persist a client-reported playback.
    pub async fn record_play(&self, event: &VoicePlayEvent) -> Result<()> {
        if event.voice_name.is_empty() {
            return Err(AppError::coded(
                ErrorCode::MissingVoiceName,
                "Voice name is required",
            ));
        }
        if !is_valid_voice(&event.voice_name) {
            return Err(AppError::coded(
                ErrorCode::InvalidVoiceName,
                format!("Only OpenAI voices are supported. Valid voices: {}", voice_ids()),
            ));
        }

        let record = VoicePlayRecord::from_event(event);
        self.store.record_voice_play(&record).await.map_err(|e| {
            warn!(error = %e, voice = %event.voice_name, "Failed to track voice play");
            AppError::coded(ErrorCode::VoiceTrackingError, "Failed to track voice play")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_writer::LogWriterConfig;
    use crate::test_support::{MemoryStore, StubSpeech};

    fn request(text: &str, voice: &str) -> TtsRequest {
        TtsRequest {
            text: text.to_string(),
            voice: voice.to_string(),
            ..Default::default()
        }
    }

    fn build(speech: Option<Arc<StubSpeech>>) -> (TtsService, Arc<MemoryStore>, LogWriter) {
        let store = Arc::new(MemoryStore::new());
        let logs = LogWriter::start(store.clone(), LogWriterConfig::default());
        let service = TtsService::new(
            speech.map(|s| s as Arc<dyn SpeechModel>),
            store.clone(),
            logs.clone(),
        );
        (service, store, logs)
    }

    #[test]
    fn test_validation_codes() {
        let code = |req: &TtsRequest| validate(req).unwrap_err().code();

        assert_eq!(code(&request("   ", "nova")), ErrorCode::MissingText);
        assert_eq!(code(&request("hi", "")), ErrorCode::MissingVoice);
        assert_eq!(code(&request("hi", "robot")), ErrorCode::InvalidVoice);
        assert_eq!(
            code(&request(&"a".repeat(MAX_TEXT_LENGTH + 1), "nova")),
            ErrorCode::TextTooLong
        );

        let mut fast = request("hi", "nova");
        fast.speed = Some(4.5);
        assert_eq!(code(&fast), ErrorCode::InvalidSpeed);

        let mut wav = request("hi", "nova");
        wav.response_format = Some("wav".into());
        assert_eq!(code(&wav), ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_defaults_are_filled_in() {
        let (speech, format) = validate(&request("Hello", "echo")).unwrap();
        assert_eq!(speech.model, "tts-1");
        assert_eq!(speech.speed, 1.0);
        assert_eq!(speech.format, "mp3");
        assert_eq!(format.mime_type(), "audio/mpeg");

        // exactly at the limit is fine
        assert!(validate(&request(&"é".repeat(MAX_TEXT_LENGTH), "echo")).is_ok());
    }

    #[tokio::test]
    async fn test_synthesize_records_voice_play() {
        let speech = Arc::new(StubSpeech::returning(vec![1, 2, 3]));
        let (service, store, logs) = build(Some(speech.clone()));

        let (audio, effects) = service.synthesize(&request("Hello there", "nova")).await.unwrap();
        assert_eq!(audio.bytes, vec![1, 2, 3]);
        assert_eq!(audio.format, AudioFormat::Mp3);
        assert_eq!(effects.join().await, vec![("tracking", EffectStatus::Done)]);

        let plays = store.voice_plays();
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].voice_name, "nova");
        assert_eq!(plays[0].text_length, 11);
        assert_eq!(speech.requests()[0].voice, "nova");
        logs.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_client_checked_after_validation() {
        let (service, _store, logs) = build(None);

        let err = service.synthesize(&request("", "nova")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingText);

        let err = service.synthesize(&request("Hello", "nova")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ClientNotInitialized);
        logs.shutdown().await;
    }

    #[tokio::test]
    async fn test_provider_errors_are_mapped() {
        let speech = Arc::new(StubSpeech::failing(ProviderError::QuotaExceeded));
        let (service, store, logs) = build(Some(speech));
        let err = service.synthesize(&request("Hello", "nova")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::QuotaExceeded);
        assert!(store.voice_plays().is_empty());
        logs.shutdown().await;

        let speech = Arc::new(StubSpeech::failing(ProviderError::Unavailable("reset".into())));
        let (service, _store, logs) = build(Some(speech));
        let err = service.synthesize(&request("Hello", "nova")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TtsGenerationError);
        logs.shutdown().await;
    }

    #[tokio::test]
    async fn test_record_play_validation() {
        let (service, store, logs) = build(None);

        let mut event = VoicePlayEvent {
            voice_name: String::new(),
            text_length: 10,
            duration_ms: Some(1200),
            success: true,
            error_message: None,
        };
        assert_eq!(
            service.record_play(&event).await.unwrap_err().code(),
            ErrorCode::MissingVoiceName
        );

        event.voice_name = "robot".into();
        assert_eq!(
            service.record_play(&event).await.unwrap_err().code(),
            ErrorCode::InvalidVoiceName
        );

        event.voice_name = "onyx".into();
        service.record_play(&event).await.unwrap();
        assert_eq!(store.voice_plays()[0].duration_ms, Some(1200));

        store.set_failing(true);
        assert_eq!(
            service.record_play(&event).await.unwrap_err().code(),
            ErrorCode::VoiceTrackingError
        );
        logs.shutdown().await;
    }
}
