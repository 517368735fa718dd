//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine as _;
use futures_util::stream::{self, BoxStream, StreamExt};
use larkgpt::channels::{parse_message_event, InboundEvent, MessagingPlatform, ResourceKind};
use larkgpt::config::Config;
use larkgpt::dedup::MessageDedup;
use larkgpt::handlers::MessageHandler;
use larkgpt::providers::{
    BalanceReport, ChatMessage, ImageResolution, ImageStyle, ModelBackend, StreamError,
    StreamResult, VisionDetail,
};
use larkgpt::session::SessionStore;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Platform
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the bot sent, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text { chat_id: String, text: String },
    Reply { msg_id: String, text: String },
    Card { msg_id: String, card: Value },
    Patch { card_id: String, card: Value },
}

#[derive(Default)]
pub struct MockPlatform {
    pub outbound: Mutex<Vec<Outbound>>,
    /// Bytes returned for every attachment download.
    pub attachment: Mutex<Vec<u8>>,
    pub uploads: Mutex<Vec<Vec<u8>>>,
    pub fail_reply_card: Mutex<bool>,
    cards: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_attachment(bytes: Vec<u8>) -> Arc<Self> {
        let platform = Self::default();
        *platform.attachment.lock().unwrap() = bytes;
        Arc::new(platform)
    }

    pub fn outbound(&self) -> Vec<Outbound> {
        self.outbound.lock().unwrap().clone()
    }

    pub fn cards(&self) -> Vec<Value> {
        self.outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Card { card, .. } => Some(card),
                _ => None,
            })
            .collect()
    }

    pub fn patches(&self) -> Vec<Value> {
        self.outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Patch { card, .. } => Some(card),
                _ => None,
            })
            .collect()
    }

    pub fn replies(&self) -> Vec<String> {
        self.outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Reply { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessagingPlatform for MockPlatform {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        self.outbound.lock().unwrap().push(Outbound::Text {
            chat_id: chat_id.into(),
            text: text.into(),
        });
        Ok(())
    }

    async fn reply_text(&self, msg_id: &str, text: &str) -> anyhow::Result<()> {
        self.outbound.lock().unwrap().push(Outbound::Reply {
            msg_id: msg_id.into(),
            text: text.into(),
        });
        Ok(())
    }

    async fn reply_card(&self, msg_id: &str, card: &Value) -> anyhow::Result<String> {
        if *self.fail_reply_card.lock().unwrap() {
            anyhow::bail!("card rejected");
        }
        self.outbound.lock().unwrap().push(Outbound::Card {
            msg_id: msg_id.into(),
            card: card.clone(),
        });
        let n = self.cards.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("card-{n}"))
    }

    async fn patch_card(&self, card_id: &str, card: &Value) -> anyhow::Result<()> {
        self.outbound.lock().unwrap().push(Outbound::Patch {
            card_id: card_id.into(),
            card: card.clone(),
        });
        Ok(())
    }

    async fn fetch_attachment(
        &self,
        _msg_id: &str,
        _file_key: &str,
        _kind: ResourceKind,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(self.attachment.lock().unwrap().clone())
    }

    async fn upload_image(&self, image: Vec<u8>) -> anyhow::Result<String> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(image);
        Ok(format!("img_{}", uploads.len()))
    }

    async fn download_image(&self, _image_key: &str) -> anyhow::Result<Vec<u8>> {
        Ok(self.attachment.lock().unwrap().clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// How the mock answers `stream_chat`.
#[derive(Debug, Clone)]
pub enum StreamScript {
    Fragments(Vec<&'static str>),
    /// Fragments built at runtime.
    Owned(Vec<String>),
    /// Each fragment is preceded by `delay`.
    Delayed(Vec<&'static str>, Duration),
    /// Fragments, then an error.
    BreaksAfter(Vec<&'static str>, &'static str),
    Error(&'static str),
    Panic,
    /// Never yields.
    Silent,
}

pub struct MockBackend {
    pub script: Mutex<StreamScript>,
    /// `Err` makes `complete_chat` fail with that message.
    pub chat_reply: Mutex<Result<String, String>>,
    pub transcript: Mutex<Result<String, String>>,
    /// Message lists received by `complete_chat` / `stream_chat`.
    pub chat_calls: Mutex<Vec<Vec<ChatMessage>>>,
    pub temperatures: Mutex<Vec<f64>>,
    pub image_prompts: Mutex<Vec<String>>,
    /// `(prompt, image count)` of every `describe_images` call.
    pub vision_calls: Mutex<Vec<(String, usize)>>,
    pub variations: AtomicUsize,
}

impl MockBackend {
    pub fn new(script: StreamScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            chat_reply: Mutex::new(Ok("pong".into())),
            transcript: Mutex::new(Ok("hello from voice".into())),
            chat_calls: Mutex::new(Vec::new()),
            temperatures: Mutex::new(Vec::new()),
            image_prompts: Mutex::new(Vec::new()),
            vision_calls: Mutex::new(Vec::new()),
            variations: AtomicUsize::new(0),
        })
    }

    pub fn chat_calls(&self) -> Vec<Vec<ChatMessage>> {
        self.chat_calls.lock().unwrap().clone()
    }
}

pub fn fake_image_b64() -> String {
    base64::engine::general_purpose::STANDARD.encode(b"generated-image")
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete_chat(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> anyhow::Result<ChatMessage> {
        self.chat_calls.lock().unwrap().push(messages.to_vec());
        self.temperatures.lock().unwrap().push(temperature);
        match self.chat_reply.lock().unwrap().clone() {
            Ok(text) => Ok(ChatMessage::assistant(text)),
            Err(e) => Err(anyhow::anyhow!(e)),
        }
    }

    fn stream_chat(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> BoxStream<'static, StreamResult<String>> {
        self.chat_calls.lock().unwrap().push(messages.to_vec());
        self.temperatures.lock().unwrap().push(temperature);

        match self.script.lock().unwrap().clone() {
            StreamScript::Fragments(fragments) => stream::iter(
                fragments
                    .into_iter()
                    .map(|f| Ok::<_, StreamError>(f.to_string())),
            )
            .boxed(),
            StreamScript::Owned(fragments) => {
                stream::iter(fragments.into_iter().map(Ok::<_, StreamError>)).boxed()
            }
            StreamScript::Delayed(fragments, delay) => stream::iter(fragments)
                .then(move |f| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, StreamError>(f.to_string())
                })
                .boxed(),
            StreamScript::BreaksAfter(fragments, error) => stream::iter(
                fragments
                    .into_iter()
                    .map(|f| Ok::<_, StreamError>(f.to_string()))
                    .chain(std::iter::once(Err(StreamError::Provider(error.into())))),
            )
            .boxed(),
            StreamScript::Error(error) => {
                stream::once(async move { Err::<String, _>(StreamError::Provider(error.into())) })
                    .boxed()
            }
            StreamScript::Panic => stream::poll_fn(|_| -> Poll<Option<StreamResult<String>>> {
                panic!("backend exploded")
            })
            .boxed(),
            StreamScript::Silent => stream::pending::<StreamResult<String>>().boxed(),
        }
    }

    async fn describe_images(
        &self,
        prompt: &str,
        images_b64: &[String],
        _detail: VisionDetail,
    ) -> anyhow::Result<String> {
        self.vision_calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), images_b64.len()));
        Ok(format!("{} image(s): {prompt}", images_b64.len()))
    }

    async fn generate_image(
        &self,
        prompt: &str,
        _resolution: ImageResolution,
        _style: ImageStyle,
    ) -> anyhow::Result<String> {
        self.image_prompts.lock().unwrap().push(prompt.to_string());
        Ok(fake_image_b64())
    }

    async fn generate_image_variation(
        &self,
        _png: Vec<u8>,
        _resolution: ImageResolution,
    ) -> anyhow::Result<String> {
        self.variations.fetch_add(1, Ordering::SeqCst);
        Ok(fake_image_b64())
    }

    async fn transcribe_audio(&self, _audio: Vec<u8>, _file_name: &str) -> anyhow::Result<String> {
        self.transcript
            .lock()
            .unwrap()
            .clone()
            .map_err(|e| anyhow::anyhow!(e))
    }

    async fn balance(&self) -> anyhow::Result<BalanceReport> {
        Ok(BalanceReport {
            granted: 18.0,
            used: 3.5,
            available: 14.5,
            valid_from: chrono::DateTime::default(),
            valid_to: chrono::DateTime::default(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

pub const BOT_NAME: &str = "larkbot";

pub fn test_config(streaming: bool) -> Config {
    let mut config = Config::default();
    config.lark.bot_name = BOT_NAME.into();
    config.stream.enabled = streaming;
    config
}

pub struct Harness {
    pub platform: Arc<MockPlatform>,
    pub backend: Arc<MockBackend>,
    pub handler: Arc<MessageHandler>,
}

impl Harness {
    pub fn new(config: Config, platform: Arc<MockPlatform>, backend: Arc<MockBackend>) -> Self {
        let handler = Arc::new(MessageHandler::new(
            platform.clone(),
            backend.clone(),
            Arc::new(SessionStore::default()),
            Arc::new(MessageDedup::new(Duration::from_secs(1800), 1000)),
            Arc::new(config),
        ));
        Self {
            platform,
            backend,
            handler,
        }
    }

    pub fn plain(script: StreamScript) -> Self {
        Self::new(test_config(false), MockPlatform::new(), MockBackend::new(script))
    }

    pub fn streaming(script: StreamScript) -> Self {
        Self::new(test_config(true), MockPlatform::new(), MockBackend::new(script))
    }

    pub fn sessions(&self) -> &SessionStore {
        self.handler.sessions()
    }
}

/// Raw `im.message.receive_v1` envelope.
pub fn envelope(
    message_id: &str,
    root_id: &str,
    chat_type: &str,
    message_type: &str,
    content: &Value,
    mentions: &Value,
) -> Value {
    json!({
        "schema": "2.0",
        "header": {
            "event_id": format!("ev-{message_id}"),
            "event_type": "im.message.receive_v1",
            "token": "verify-token",
            "app_id": "cli_test"
        },
        "event": {
            "sender": { "sender_id": { "open_id": "ou_sender" } },
            "message": {
                "message_id": message_id,
                "root_id": root_id,
                "chat_id": "oc_chat",
                "chat_type": chat_type,
                "message_type": message_type,
                "content": content.to_string(),
                "mentions": mentions
            }
        }
    })
}

pub fn event(
    message_id: &str,
    root_id: &str,
    chat_type: &str,
    message_type: &str,
    content: &Value,
    mentions: &Value,
) -> InboundEvent {
    parse_message_event(&envelope(
        message_id,
        root_id,
        chat_type,
        message_type,
        content,
        mentions,
    ))
    .expect("fixture envelope parses")
}

/// Private text message starting its own topic.
pub fn p2p_text(message_id: &str, text: &str) -> InboundEvent {
    event(message_id, "", "p2p", "text", &json!({ "text": text }), &json!([]))
}

/// Private text message replying inside the topic rooted at `root_id`.
pub fn p2p_reply(message_id: &str, root_id: &str, text: &str) -> InboundEvent {
    event(message_id, root_id, "p2p", "text", &json!({ "text": text }), &json!([]))
}

pub fn group_text(message_id: &str, text: &str, mentioned: &[&str]) -> InboundEvent {
    let mentions: Vec<Value> = mentioned
        .iter()
        .enumerate()
        .map(|(i, name)| {
            json!({
                "key": format!("@_user_{}", i + 1),
                "name": name,
                "id": { "open_id": format!("ou_{i}") }
            })
        })
        .collect();
    event(
        message_id,
        "",
        "group",
        "text",
        &json!({ "text": text }),
        &Value::Array(mentions),
    )
}

/// Text of the first `plain_text` div in a card, if any.
pub fn card_body(card: &Value) -> Option<String> {
    card["elements"]
        .as_array()?
        .iter()
        .find_map(|e| e["text"]["content"].as_str().map(str::to_string))
}

pub fn card_title(card: &Value) -> Option<String> {
    card["header"]["title"]["content"].as_str().map(str::to_string)
}

/// Wrap `payload` the way Lark does when an encrypt key is configured.
pub fn encrypted_envelope(encrypt_key: &str, payload: &Value) -> Value {
    use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
    use sha2::{Digest, Sha256};

    let key: [u8; 32] = Sha256::digest(encrypt_key.as_bytes()).into();
    let iv = [0x5a_u8; 16];
    let ciphertext = cbc::Encryptor::<aes::Aes256>::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(payload.to_string().as_bytes());
    let mut raw = iv.to_vec();
    raw.extend_from_slice(&ciphertext);
    json!({ "encrypt": base64::engine::general_purpose::STANDARD.encode(raw) })
}

pub fn sample_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([10, 200, 30]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .expect("encode png");
    buf
}
