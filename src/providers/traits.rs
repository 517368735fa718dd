use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}

/// Output size for image generation and variation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ImageResolution {
    #[serde(rename = "256x256")]
    R256,
    #[serde(rename = "512x512")]
    R512,
    #[default]
    #[serde(rename = "1024x1024")]
    R1024,
    #[serde(rename = "1024x1792")]
    R1024x1792,
    #[serde(rename = "1792x1024")]
    R1792x1024,
}

impl ImageResolution {
    pub const ALL: [ImageResolution; 5] = [
        Self::R256,
        Self::R512,
        Self::R1024,
        Self::R1024x1792,
        Self::R1792x1024,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::R256 => "256x256",
            Self::R512 => "512x512",
            Self::R1024 => "1024x1024",
            Self::R1024x1792 => "1024x1792",
            Self::R1792x1024 => "1792x1024",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == raw.trim())
    }

    /// Variation endpoints only accept square sizes up to 1024.
    pub fn for_variation(self) -> Self {
        match self {
            Self::R256 | Self::R512 => self,
            _ => Self::R1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImageStyle {
    #[default]
    Vivid,
    Natural,
}

impl ImageStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vivid => "vivid",
            Self::Natural => "natural",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "vivid" => Some(Self::Vivid),
            "natural" => Some(Self::Natural),
            _ => None,
        }
    }
}

/// Fidelity the vision model uses when reading an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VisionDetail {
    #[default]
    High,
    Low,
}

impl VisionDetail {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "high" => Some(Self::High),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Remaining API quota, in account currency.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceReport {
    pub granted: f64,
    pub used: f64,
    pub available: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

/// Result type for streaming operations.
pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Errors that can occur during streaming.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(serde_json::Error),

    #[error("Invalid SSE format: {0}")]
    InvalidSse(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the bot asks of a language/image/speech model service.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// One-shot chat completion; returns the assistant turn.
    async fn complete_chat(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> anyhow::Result<ChatMessage>;

    /// Streaming chat completion. Yields text fragments in emission order and
    /// ends when the upstream closes; an `Err` item ends the exchange as failed.
    fn stream_chat(
        &self,
        _messages: &[ChatMessage],
        _temperature: f64,
    ) -> stream::BoxStream<'static, StreamResult<String>> {
        use futures_util::StreamExt;
        let message = format!("{} does not support streaming", self.name());
        stream::once(async move { Err(StreamError::Provider(message)) }).boxed()
    }

    /// Ask a vision model about one or more base64-encoded images.
    async fn describe_images(
        &self,
        prompt: &str,
        images_b64: &[String],
        detail: VisionDetail,
    ) -> anyhow::Result<String>;

    /// Text-to-image; returns base64 image data.
    async fn generate_image(
        &self,
        prompt: &str,
        resolution: ImageResolution,
        style: ImageStyle,
    ) -> anyhow::Result<String>;

    /// Variation of a PNG image; returns base64 image data.
    async fn generate_image_variation(
        &self,
        png: Vec<u8>,
        resolution: ImageResolution,
    ) -> anyhow::Result<String>;

    /// Speech-to-text for one audio file.
    async fn transcribe_audio(&self, audio: Vec<u8>, file_name: &str) -> anyhow::Result<String>;

    async fn balance(&self) -> anyhow::Result<BalanceReport>;
}
