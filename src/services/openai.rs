//! OpenAI HTTP client for vision completions and speech synthesis.
//!
//! The pipeline services only see the [`VisionModel`] and [`SpeechModel`]
//! traits, so tests can swap the client for a stub.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorCode;

/// Default base URL for the OpenAI API
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Failure of one provider call, classified by what the caller can do about it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("OpenAI API quota exceeded")]
    QuotaExceeded,

    #[error("Invalid OpenAI API key")]
    InvalidApiKey,

    #[error("OpenAI API rate limit exceeded")]
    RateLimited,

    /// The provider refused the input itself (HTTP 400)
    #[error("Model rejected input: {0}")]
    Rejected(String),

    /// Transport failure, timeout or provider-side error
    #[error("OpenAI API unavailable: {0}")]
    Unavailable(String),

    /// The model answered with nothing usable
    #[error("Failed to generate alt text")]
    Empty,
}

impl ProviderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProviderError::QuotaExceeded => ErrorCode::QuotaExceeded,
            ProviderError::InvalidApiKey => ErrorCode::InvalidApiKey,
            ProviderError::RateLimited => ErrorCode::ProviderRateLimited,
            ProviderError::Rejected(_) => ErrorCode::ModelRejectedInput,
            ProviderError::Unavailable(_) => ErrorCode::ProviderUnavailable,
            ProviderError::Empty => ErrorCode::GenerationFailed,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Unavailable(err.to_string())
    }
}

/// One image description call
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub model: String,
    pub prompt: String,
    /// Data URI passed through as the image URL
    pub image_url: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Describe an image, returning the trimmed completion text.
    async fn describe(&self, request: &VisionRequest) -> Result<String, ProviderError>;
}

/// One speech synthesis call
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub model: String,
    pub voice: String,
    pub input: String,
    pub speed: f64,
    /// `mp3`, `opus`, `aac` or `flac`
    pub format: String,
}

#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// Synthesize speech, returning the encoded audio.
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>, ProviderError>;
}

/// Client for the OpenAI REST API
#[derive(Clone)]
pub struct OpenAiClient {
    api_key: String,
    http: Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            api_key: api_key.into(),
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status, &body))
    }
}

#[async_trait]
impl VisionModel for OpenAiClient {
    async fn describe(&self, request: &VisionRequest) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: &request.prompt,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: &request.image_url,
                        },
                    },
                ],
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response: ChatResponse = self.post("/chat/completions", &body).await?.json().await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(text)
    }
}

#[async_trait]
impl SpeechModel for OpenAiClient {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>, ProviderError> {
        let body = SpeechBody {
            model: &request.model,
            input: &request.input,
            voice: &request.voice,
            speed: request.speed,
            response_format: &request.format,
        };

        let audio = self.post("/audio/speech", &body).await?.bytes().await?;
        if audio.is_empty() {
            return Err(ProviderError::Unavailable("empty audio response".into()));
        }
        Ok(audio.to_vec())
    }
}

/// Map a non-success response onto an error kind. The error `code` in the
/// body wins over the HTTP status, so a 429 caused by an exhausted quota is
/// reported as a quota problem.
fn classify_error(status: StatusCode, body: &str) -> ProviderError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error)
        .unwrap_or_default();
    let code = detail.code.as_deref().or(detail.kind.as_deref());

    match code {
        Some("insufficient_quota") => return ProviderError::QuotaExceeded,
        Some("invalid_api_key") => return ProviderError::InvalidApiKey,
        Some("rate_limit_exceeded") => return ProviderError::RateLimited,
        _ => {}
    }

    let message = detail
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        StatusCode::UNAUTHORIZED => ProviderError::InvalidApiKey,
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        StatusCode::BAD_REQUEST => ProviderError::Rejected(message),
        _ => ProviderError::Unavailable(message),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f64,
    response_format: &'a str,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorDetail,
}

#[derive(Default, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
}
