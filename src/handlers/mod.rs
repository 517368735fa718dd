//! Inbound message handling.
//!
//! [`MessageHandler`] owns every collaborator the bot needs and is built once
//! at startup. Each received message becomes a [`MessageContext`] that runs
//! through the ordered policies in [`policies`]; card clicks are routed by
//! [`card_actions`]; plain-chat answers stream through [`stream`].

pub mod card_actions;
pub mod policies;
pub mod stream;

pub use policies::{run_chain, Flow, Policy, CHAIN};
pub use stream::{ExchangeOutcome, StreamingExchange};

use crate::channels::{CardAction, ChatType, InboundEvent, MessageType, MessagingPlatform};
use crate::config::Config;
use crate::dedup::MessageDedup;
use crate::providers::imaging::decode_b64_image;
use crate::providers::ModelBackend;
use crate::session::SessionStore;
use std::sync::Arc;

/// Default system prompt injected into chats that have none.
pub fn default_system_prompt() -> String {
    format!(
        "You are ChatGPT, a large language model trained by OpenAI. Answer in English as \
         concisely as possible. Knowledge cutoff: 20230601 Current date{}",
        chrono::Local::now().format("%Y%m%d")
    )
}

/// Per-message state handed from policy to policy.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub event: InboundEvent,
    pub session_id: String,
    /// Parsed text; replaced by the transcript for voice messages.
    pub text: String,
    pub image_keys: Vec<String>,
    pub file_key: Option<String>,
}

impl MessageContext {
    pub fn new(event: InboundEvent) -> Self {
        Self {
            session_id: event.session_id().to_string(),
            text: event.parsed_text(),
            image_keys: event.image_keys(),
            file_key: event.file_key(),
            event,
        }
    }

    pub fn msg_id(&self) -> &str {
        &self.event.message_id
    }

    pub fn chat_id(&self) -> &str {
        &self.event.chat_id
    }
}

pub struct MessageHandler {
    platform: Arc<dyn MessagingPlatform>,
    backend: Arc<dyn ModelBackend>,
    sessions: Arc<SessionStore>,
    dedup: Arc<MessageDedup>,
    config: Arc<Config>,
    streaming: StreamingExchange,
}

impl MessageHandler {
    pub fn new(
        platform: Arc<dyn MessagingPlatform>,
        backend: Arc<dyn ModelBackend>,
        sessions: Arc<SessionStore>,
        dedup: Arc<MessageDedup>,
        config: Arc<Config>,
    ) -> Self {
        let streaming = StreamingExchange::new(
            Arc::clone(&platform),
            Arc::clone(&backend),
            Arc::clone(&sessions),
            &config.stream,
        );
        Self {
            platform,
            backend,
            sessions,
            dedup,
            config,
            streaming,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one received message through the policy chain.
    pub async fn handle_event(&self, event: InboundEvent) {
        if let ChatType::Other(kind) = &event.chat_type {
            tracing::warn!("Dropping message {} from unsupported chat type {kind}", event.message_id);
            return;
        }
        if let MessageType::Unsupported(kind) = &event.message_type {
            tracing::warn!("Dropping message {} of unsupported type {kind}", event.message_id);
            return;
        }

        let mut ctx = MessageContext::new(event);
        tracing::debug!(
            msg_id = ctx.msg_id(),
            session_id = %ctx.session_id,
            "Received: {}",
            crate::util::truncate_with_ellipsis(&ctx.text, 80)
        );
        run_chain(self, &mut ctx).await;
    }

    /// Handle a card click; returns the replacement card, if any.
    pub async fn handle_card_action(
        self: &Arc<Self>,
        action: CardAction,
    ) -> Option<serde_json::Value> {
        card_actions::dispatch(self, action).await
    }

    async fn reply_text(&self, msg_id: &str, text: &str) {
        if let Err(e) = self.platform.reply_text(msg_id, text).await {
            tracing::warn!("Failed to reply to {msg_id}: {e:#}");
        }
    }

    async fn reply_card(&self, msg_id: &str, card: &serde_json::Value) {
        if let Err(e) = self.platform.reply_card(msg_id, card).await {
            tracing::warn!("Failed to reply card to {msg_id}: {e:#}");
        }
    }

    /// Decode backend image data and upload it; returns the image key.
    async fn upload_b64_image(&self, b64: &str) -> anyhow::Result<String> {
        let bytes = decode_b64_image(b64)?;
        self.platform.upload_image(bytes).await
    }
}
