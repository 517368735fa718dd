use crate::channels::transcription::AudioUpload;
use crate::config::OpenAiConfig;
use crate::providers::traits::{
    BalanceReport, ChatMessage, ImageResolution, ImageStyle, ModelBackend, StreamError,
    StreamResult, VisionDetail,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{stream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Model used for variations; the newer image models do not offer them.
const VARIATION_MODEL: &str = "dall-e-2";

pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    api_keys: Vec<String>,
    next_key: AtomicUsize,
    model: String,
    vision_model: String,
    image_model: String,
    transcription_model: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f64,
    top_p: u32,
    frequency_penalty: u32,
    presence_penalty: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunkResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct VisionRequest<'a> {
    model: &'a str,
    messages: Vec<VisionMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct VisionMessage<'a> {
    role: &'static str,
    content: Vec<VisionContent<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum VisionContent<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: VisionImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct VisionImageUrl<'a> {
    url: &'a str,
    detail: &'static str,
}

#[derive(Debug, Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'static str>,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CreditGrantsResponse {
    #[serde(default)]
    total_granted: f64,
    #[serde(default)]
    total_used: f64,
    #[serde(default)]
    total_available: f64,
    #[serde(default)]
    grants: Option<GrantList>,
}

#[derive(Debug, Deserialize)]
struct GrantList {
    #[serde(default)]
    data: Vec<Grant>,
}

#[derive(Debug, Deserialize)]
struct Grant {
    #[serde(default)]
    effective_at: f64,
    #[serde(default)]
    expires_at: f64,
}

/// One parsed SSE line.
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

impl OpenAiBackend {
    pub fn new(config: &OpenAiConfig) -> anyhow::Result<Self> {
        let client = config.build_http_client()?;
        let api_keys = config.usable_keys();
        if api_keys.is_empty() {
            anyhow::bail!("No usable OpenAI API key configured");
        }
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_keys,
            next_key: AtomicUsize::new(0),
            model: config.model.clone(),
            vision_model: config.vision_model.clone(),
            image_model: config.image_model.clone(),
            transcription_model: config.transcription_model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Round-robin over configured keys.
    fn api_key(&self) -> &str {
        let idx = self.next_key.fetch_add(1, Ordering::Relaxed) % self.api_keys.len();
        &self.api_keys[idx]
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(self.api_key())
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send OpenAI request to {path}"))?;

        if !response.status().is_success() {
            return Err(super::api_error("OpenAI", response).await);
        }
        Ok(response)
    }

    fn first_image(response: ImageResponse) -> anyhow::Result<String> {
        response
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .filter(|b64| !b64.is_empty())
            .ok_or_else(|| anyhow::anyhow!("OpenAI returned no image data"))
    }
}

fn parse_sse_line(line: &str) -> StreamResult<SseLine> {
    let line = line.trim();

    // Skip empty lines and comments
    if line.is_empty() || line.starts_with(':') {
        return Ok(SseLine::Skip);
    }

    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();

    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: StreamChunkResponse = serde_json::from_str(data).map_err(StreamError::Json)?;
    if let Some(error) = chunk.error {
        return Err(StreamError::Provider(super::sanitize_api_error(
            &error.message,
        )));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty())
        .map_or(SseLine::Skip, SseLine::Delta))
}

/// Convert an SSE byte stream to text fragments.
///
/// Lines are split on raw bytes so a multi-byte character spanning two
/// network chunks is reassembled before decoding.
fn sse_bytes_to_fragments(
    response: reqwest::Response,
) -> stream::BoxStream<'static, StreamResult<String>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<StreamResult<String>>(100);

    tokio::spawn(async move {
        let mut buffer: Vec<u8> = Vec::new();
        let mut bytes_stream = response.bytes_stream();

        while let Some(item) = bytes_stream.next().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(Err(StreamError::Http(e))).await;
                    return;
                }
            };
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                let line = match String::from_utf8(raw) {
                    Ok(line) => line,
                    Err(e) => {
                        let _ = tx
                            .send(Err(StreamError::InvalidSse(format!("Invalid UTF-8: {e}"))))
                            .await;
                        return;
                    }
                };

                match parse_sse_line(&line) {
                    Ok(SseLine::Delta(content)) => {
                        if tx.send(Ok(content)).await.is_err() {
                            return; // Receiver dropped
                        }
                    }
                    Ok(SseLine::Done) => return,
                    Ok(SseLine::Skip) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        }

        // Trailing line without a newline terminator
        if let Ok(line) = String::from_utf8(buffer) {
            match parse_sse_line(&line) {
                Ok(SseLine::Delta(content)) => {
                    let _ = tx.send(Ok(content)).await;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        }
    });

    stream::unfold(rx, |mut rx| async {
        rx.recv().await.map(|fragment| (fragment, rx))
    })
    .boxed()
}

fn unix_to_datetime(secs: f64) -> DateTime<Utc> {
    #[allow(clippy::cast_possible_truncation)]
    let secs = secs as i64;
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::default())
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete_chat(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> anyhow::Result<ChatMessage> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature,
            top_p: 1,
            frequency_penalty: 0,
            presence_penalty: 0,
            stream: false,
        };

        let chat_response: ChatResponse = self
            .post_json("chat/completions", &request)
            .await?
            .json()
            .await
            .context("Failed to parse OpenAI chat response")?;

        let message = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| anyhow::anyhow!("No response from OpenAI"))?;

        Ok(ChatMessage {
            role: message.role.unwrap_or_else(|| "assistant".into()),
            content: message.content.unwrap_or_default(),
        })
    }

    fn stream_chat(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> stream::BoxStream<'static, StreamResult<String>> {
        let body = serde_json::to_value(ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature,
            top_p: 1,
            frequency_penalty: 0,
            presence_penalty: 0,
            stream: true,
        });
        let body = match body {
            Ok(body) => body,
            Err(e) => return stream::once(async move { Err(StreamError::Json(e)) }).boxed(),
        };

        let request = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(self.api_key())
            .header("Accept", "text/event-stream")
            .json(&body);

        stream::once(async move {
            let response = request.send().await.map_err(StreamError::Http)?;
            if !response.status().is_success() {
                let err = super::api_error("OpenAI", response).await;
                return Err(StreamError::Provider(err.to_string()));
            }
            Ok(sse_bytes_to_fragments(response))
        })
        .flat_map(|opened| match opened {
            Ok(fragments) => fragments,
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        })
        .boxed()
    }

    async fn describe_images(
        &self,
        prompt: &str,
        images: &[String],
        detail: VisionDetail,
    ) -> anyhow::Result<String> {
        let mut content = vec![VisionContent::Text { text: prompt }];
        content.extend(images.iter().map(|url| VisionContent::ImageUrl {
            image_url: VisionImageUrl {
                url,
                detail: detail.as_str(),
            },
        }));

        let request = VisionRequest {
            model: &self.vision_model,
            messages: vec![VisionMessage {
                role: "user",
                content,
            }],
            max_tokens: self.max_tokens,
        };

        let chat_response: ChatResponse = self
            .post_json("chat/completions", &request)
            .await?
            .json()
            .await
            .context("Failed to parse OpenAI vision response")?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("No response from OpenAI"))
    }

    async fn generate_image(
        &self,
        prompt: &str,
        resolution: ImageResolution,
        style: ImageStyle,
    ) -> anyhow::Result<String> {
        // Only dall-e-3 understands `style`.
        let style = self
            .image_model
            .starts_with("dall-e-3")
            .then(|| style.as_str());
        let request = ImageGenerationRequest {
            model: &self.image_model,
            prompt,
            n: 1,
            size: resolution.as_str(),
            style,
            response_format: "b64_json",
        };

        let response: ImageResponse = self
            .post_json("images/generations", &request)
            .await?
            .json()
            .await
            .context("Failed to parse OpenAI image response")?;
        Self::first_image(response)
    }

    async fn generate_image_variation(
        &self,
        png: Vec<u8>,
        resolution: ImageResolution,
    ) -> anyhow::Result<String> {
        let image_part = Part::bytes(png)
            .file_name("image.png")
            .mime_str("image/png")?;
        let form = Form::new()
            .part("image", image_part)
            .text("model", VARIATION_MODEL)
            .text("n", "1")
            .text("size", resolution.for_variation().as_str())
            .text("response_format", "b64_json");

        let response = self
            .client
            .post(self.endpoint("images/variations"))
            .bearer_auth(self.api_key())
            .multipart(form)
            .send()
            .await
            .context("Failed to send image variation request")?;
        if !response.status().is_success() {
            return Err(super::api_error("OpenAI", response).await);
        }

        let response: ImageResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI image response")?;
        Self::first_image(response)
    }

    async fn transcribe_audio(&self, audio: Vec<u8>, file_name: &str) -> anyhow::Result<String> {
        let upload = AudioUpload::prepare(audio, file_name)?;

        let file_part = Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(upload.mime)?;
        let form = Form::new()
            .part("file", file_part)
            .text("model", self.transcription_model.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(self.api_key())
            .multipart(form)
            .send()
            .await
            .context("Failed to send transcription request")?;
        if !response.status().is_success() {
            return Err(super::api_error("OpenAI", response).await);
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;
        Ok(body.text.trim().to_string())
    }

    async fn balance(&self) -> anyhow::Result<BalanceReport> {
        let response = self
            .client
            .get(format!("{}/dashboard/billing/credit_grants", self.base_url))
            .bearer_auth(self.api_key())
            .send()
            .await
            .context("Failed to query OpenAI balance")?;
        if !response.status().is_success() {
            return Err(super::api_error("OpenAI", response).await);
        }

        let grants: CreditGrantsResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI balance response")?;
        let first = grants.grants.and_then(|g| g.data.into_iter().next());
        let (valid_from, valid_to) = first.map_or(
            (DateTime::<Utc>::default(), DateTime::<Utc>::default()),
            |g| (unix_to_datetime(g.effective_at), unix_to_datetime(g.expires_at)),
        );

        Ok(BalanceReport {
            granted: grants.total_granted,
            used: grants.total_used,
            available: grants.total_available,
            valid_from,
            valid_to,
        })
    }
}
