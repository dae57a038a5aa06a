//! Core domain models for AltRead

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;

/// Severity of an audit log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    /// Level used for the audit line of an HTTP response with this status.
    pub fn for_status(status: u16) -> Self {
        match status {
            500.. => LogLevel::Error,
            400..=499 => LogLevel::Warning,
            _ => LogLevel::Info,
        }
    }
}

/// A single audit/diagnostic record bound for `application_logs`.
///
/// Entries are immutable once created; the log writer owns them until they
/// are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Component that emitted the entry ("api", "openai", "tts", ...)
    pub service: String,
    pub message: String,
    /// Correlation key, e.g. the image fingerprint
    pub trace_id: Option<String>,
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            service: service.into(),
            message: message.into(),
            trace_id: None,
            context: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Outcome of one alt-text pipeline run, as stored in the result cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedOutcome {
    pub success: bool,
    #[serde(rename = "alt_text")]
    pub text: String,
    #[serde(rename = "processing_time")]
    pub processing_time_ms: u64,
    /// Unix seconds
    pub cached_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl CachedOutcome {
    pub fn success(text: impl Into<String>, model: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            success: true,
            text: text.into(),
            processing_time_ms,
            cached_at: Utc::now().timestamp(),
            error: None,
            model_used: Some(model.into()),
            error_code: None,
        }
    }

    pub fn failure(error: impl Into<String>, code: ErrorCode, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            text: String::new(),
            processing_time_ms,
            cached_at: Utc::now().timestamp(),
            error: Some(error.into()),
            model_used: None,
            error_code: Some(code),
        }
    }
}

/// Prompt toggles for alt-text generation
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AltTextOptions {
    #[serde(alias = "includeObjects")]
    pub include_objects: bool,
    #[serde(alias = "includeColors")]
    pub include_colors: bool,
    #[serde(alias = "includeText")]
    pub include_text: bool,
    /// Any JSON number; rounded half to even when the prompt is built
    #[serde(alias = "maxLength")]
    pub max_length: Option<f64>,
}

impl AltTextOptions {
    /// Requested length limit in whole characters. Non-finite or non-positive
    /// values mean no limit.
    pub fn max_length_chars(&self) -> Option<u32> {
        let rounded = self.max_length.filter(|n| n.is_finite())?.round_ties_even();
        (rounded >= 1.0).then(|| rounded.min(u32::MAX as f64) as u32)
    }
}

/// Request body for `POST /api/v1/alt-text`
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateAltTextRequest {
    /// `data:image/<format>;base64,<payload>`
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub options: AltTextOptions,
}

/// Response body for `POST /api/v1/alt-text`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAltTextResponse {
    pub success: bool,
    pub alt_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub processing_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

/// Row in `image_uploads`
#[derive(Debug, Clone, Serialize)]
pub struct ImageUploadRecord {
    pub id: Uuid,
    pub file_name: String,
    pub file_size: i32,
    pub file_type: String,
    pub image_hash: String,
    pub alt_text: String,
    pub processing_time_ms: Option<i32>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Row in `voice_plays`
#[derive(Debug, Clone, Serialize)]
pub struct VoicePlayRecord {
    pub id: Uuid,
    pub voice_name: String,
    pub text_length: i32,
    pub duration_ms: Option<i32>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VoicePlayRecord {
    pub fn from_event(event: &VoicePlayEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            voice_name: event.voice_name.clone(),
            text_length: event.text_length,
            duration_ms: event.duration_ms.filter(|d| *d > 0),
            success: event.success,
            error_message: event.error_message.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Client-reported voice playback, `POST /api/v1/tts/plays`
#[derive(Debug, Clone, Deserialize)]
pub struct VoicePlayEvent {
    #[serde(default, alias = "voiceName")]
    pub voice_name: String,
    #[serde(default, alias = "textLength")]
    pub text_length: i32,
    #[serde(default, alias = "durationMs")]
    pub duration_ms: Option<i32>,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, alias = "errorMessage")]
    pub error_message: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Analytics look-back window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "7d")]
    Week,
    #[default]
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "all")]
    All,
}

impl TimeRange {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "7d" => Some(TimeRange::Week),
            "30d" => Some(TimeRange::Month),
            "90d" => Some(TimeRange::Quarter),
            "all" => Some(TimeRange::All),
            _ => None,
        }
    }

    /// Lower bound for `created_at`, `None` meaning unbounded.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeRange::Week => Some(now - Duration::days(7)),
            TimeRange::Month => Some(now - Duration::days(30)),
            TimeRange::Quarter => Some(now - Duration::days(90)),
            TimeRange::All => None,
        }
    }
}

/// Aggregated usage numbers for the analytics dashboard
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsData {
    pub total_images_processed: i64,
    pub total_voice_plays: i64,
    pub images_over_time: Vec<ImageCountByDate>,
    pub voice_usage: Vec<VoiceUsageStat>,
    /// Percentage, 0-100
    pub success_rate: f64,
    pub average_processing_time: f64,
    pub total_successful: i64,
    pub total_failed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageCountByDate {
    /// `YYYY-MM-DD`
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceUsageStat {
    pub voice_name: String,
    pub count: i64,
    pub percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_accept_both_casings() {
        let snake: AltTextOptions =
            serde_json::from_str(r#"{"include_colors": true, "max_length": 80}"#).unwrap();
        let camel: AltTextOptions =
            serde_json::from_str(r#"{"includeColors": true, "maxLength": 80}"#).unwrap();
        assert_eq!(snake, camel);
        assert!(snake.include_colors);
        assert!(!snake.include_text);
    }

    #[test]
    fn test_fractional_max_length_rounds_half_to_even() {
        let options: AltTextOptions = serde_json::from_str(r#"{"maxLength": 80.5}"#).unwrap();
        assert_eq!(options.max_length, Some(80.5));
        assert_eq!(options.max_length_chars(), Some(80));

        let options: AltTextOptions = serde_json::from_str(r#"{"maxLength": 81.5}"#).unwrap();
        assert_eq!(options.max_length_chars(), Some(82));

        let options: AltTextOptions = serde_json::from_str(r#"{"max_length": 119.4}"#).unwrap();
        assert_eq!(options.max_length_chars(), Some(119));

        let options: AltTextOptions = serde_json::from_str(r#"{"maxLength": 120}"#).unwrap();
        assert_eq!(options.max_length_chars(), Some(120));

        for ignored in ["0", "0.4", "-5"] {
            let options: AltTextOptions =
                serde_json::from_str(&format!(r#"{{"maxLength": {}}}"#, ignored)).unwrap();
            assert_eq!(options.max_length_chars(), None, "{}", ignored);
        }
    }

    #[test]
    fn test_cached_outcome_wire_format() {
        let outcome = CachedOutcome::success("A cat", "gpt-4o-mini", 42);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["alt_text"], "A cat");
        assert_eq!(json["processing_time"], 42);
        assert_eq!(json["model_used"], "gpt-4o-mini");
        assert!(json.get("error").is_none());

        let back: CachedOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn test_time_range_parse() {
        assert_eq!(TimeRange::parse("7d"), Some(TimeRange::Week));
        assert_eq!(TimeRange::parse("all"), Some(TimeRange::All));
        assert_eq!(TimeRange::parse("1y"), None);
        assert!(TimeRange::All.since(Utc::now()).is_none());
    }

    #[test]
    fn test_log_level_for_status() {
        assert_eq!(LogLevel::for_status(200), LogLevel::Info);
        assert_eq!(LogLevel::for_status(404), LogLevel::Warning);
        assert_eq!(LogLevel::for_status(503), LogLevel::Error);
    }

    #[test]
    fn test_voice_play_record_drops_zero_duration() {
        let event: VoicePlayEvent =
            serde_json::from_str(r#"{"voice_name": "nova", "text_length": 12, "duration_ms": 0}"#)
                .unwrap();
        let record = VoicePlayRecord::from_event(&event);
        assert_eq!(record.duration_ms, None);
        assert!(record.success);
    }
}
