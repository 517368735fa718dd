//! Ordered message policies.
//!
//! Each policy either fully handles the message ([`Flow::Halt`]) or passes
//! it on ([`Flow::Continue`]). [`CHAIN`] fixes the precedence: duplicate
//! suppression, then the mention gate, then commands, then plain chat.

use super::{default_system_prompt, MessageContext, MessageHandler};
use crate::channels::cards;
use crate::channels::{ChatType, MessageType, ResourceKind};
use crate::dedup::Delivery;
use crate::providers::imaging::{to_rgba_png, to_vision_data_url};
use crate::providers::{ChatMessage, ImageResolution};
use crate::session::Mode;
use crate::util::{either_cut_prefix, either_trim_equal};

const DEFAULT_VISION_PROMPT: &str = "Please describe this image in detail.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Halt,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Dedup,
    Mention,
    Audio,
    Clear,
    Vision,
    Picture,
    AiMode,
    Roles,
    Help,
    Balance,
    RolePlay,
    PlainChat,
    EmptyInput,
    StreamChat,
}

pub const CHAIN: [Policy; 14] = [
    Policy::Dedup,
    Policy::Mention,
    Policy::Audio,
    Policy::Clear,
    Policy::Vision,
    Policy::Picture,
    Policy::AiMode,
    Policy::Roles,
    Policy::Help,
    Policy::Balance,
    Policy::RolePlay,
    Policy::PlainChat,
    Policy::EmptyInput,
    Policy::StreamChat,
];

impl Policy {
    pub async fn apply(self, h: &MessageHandler, ctx: &mut MessageContext) -> Flow {
        match self {
            Self::Dedup => dedup(h, ctx),
            Self::Mention => mention(h, ctx),
            Self::Audio => audio(h, ctx).await,
            Self::Clear => clear(h, ctx).await,
            Self::Vision => vision(h, ctx).await,
            Self::Picture => picture(h, ctx).await,
            Self::AiMode => ai_mode(h, ctx).await,
            Self::Roles => roles(h, ctx).await,
            Self::Help => help(h, ctx).await,
            Self::Balance => balance(h, ctx).await,
            Self::RolePlay => role_play(h, ctx).await,
            Self::PlainChat => plain_chat(h, ctx).await,
            Self::EmptyInput => empty_input(h, ctx).await,
            Self::StreamChat => stream_chat(h, ctx).await,
        }
    }
}

/// Apply [`CHAIN`] until a policy halts. Returns the halting policy.
pub async fn run_chain(h: &MessageHandler, ctx: &mut MessageContext) -> Option<Policy> {
    for policy in CHAIN {
        if policy.apply(h, ctx).await == Flow::Halt {
            tracing::debug!(msg_id = ctx.msg_id(), "Handled by {policy:?}");
            return Some(policy);
        }
    }
    None
}

fn dedup(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    match h.dedup.observe(ctx.msg_id()) {
        Delivery::First => Flow::Continue,
        Delivery::Repeat { since_first } => {
            tracing::debug!(
                "Skipping duplicate delivery of {}, first seen {}ms ago",
                ctx.msg_id(),
                since_first.as_millis()
            );
            Flow::Halt
        }
    }
}

/// In group chats, only respond when the bot is the single mention.
fn mention(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    match ctx.event.chat_type {
        ChatType::P2p => Flow::Continue,
        ChatType::Group => {
            let mentions = &ctx.event.mentions;
            if mentions.len() == 1 && mentions[0].name == h.config.lark.bot_name {
                Flow::Continue
            } else {
                Flow::Halt
            }
        }
        ChatType::Other(_) => Flow::Halt,
    }
}

async fn audio(h: &MessageHandler, ctx: &mut MessageContext) -> Flow {
    if ctx.event.message_type != MessageType::Audio || ctx.event.chat_type != ChatType::P2p {
        return Flow::Continue;
    }

    let transcript = async {
        let file_key = ctx
            .file_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("voice message carries no file_key"))?;
        let audio = h
            .platform
            .fetch_attachment(ctx.msg_id(), file_key, ResourceKind::File)
            .await?;
        h.backend.transcribe_audio(audio, file_key).await
    }
    .await;

    match transcript {
        Ok(text) => {
            h.reply_text(ctx.msg_id(), &format!("🤖️：{text}")).await;
            ctx.text = text.trim().to_string();
            Flow::Continue
        }
        Err(e) => {
            tracing::warn!("Audio transcription failed for {}: {e:#}", ctx.msg_id());
            h.reply_text(
                ctx.msg_id(),
                &format!("🤖️: Audio conversion failed, please try again later. Error message: {e}"),
            )
            .await;
            Flow::Halt
        }
    }
}

async fn clear(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    if !either_trim_equal(&ctx.text, &["/clear", "clear"]) {
        return Flow::Continue;
    }
    h.reply_card(ctx.msg_id(), &cards::clear_confirm_card(&ctx.session_id, ctx.msg_id()))
        .await;
    Flow::Halt
}

async fn vision(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    let session_id = ctx.session_id.as_str();
    if either_trim_equal(&ctx.text, &["/vision", "vision"]) {
        h.sessions.clear(session_id);
        h.sessions.set_mode(session_id, Mode::Vision);
        h.reply_card(ctx.msg_id(), &cards::vision_instruction_card(session_id, ctx.msg_id()))
            .await;
        return Flow::Halt;
    }

    let in_vision_mode = h.sessions.mode(session_id) == Mode::Vision;
    let is_post_with_images =
        ctx.event.message_type == MessageType::Post && !ctx.image_keys.is_empty();

    if !in_vision_mode {
        // A post with images can only be analysed, so offer vision mode.
        if is_post_with_images {
            h.reply_card(ctx.msg_id(), &cards::vision_mode_check_card(session_id, ctx.msg_id()))
                .await;
            return Flow::Halt;
        }
        return Flow::Continue;
    }

    if ctx.image_keys.is_empty() {
        h.reply_text(
            ctx.msg_id(),
            "🤖️: Please send an image (or a post containing images) for analysis~",
        )
        .await;
        return Flow::Halt;
    }

    let mut images = Vec::with_capacity(ctx.image_keys.len());
    for key in &ctx.image_keys {
        let bytes = match h
            .platform
            .fetch_attachment(ctx.msg_id(), key, ResourceKind::Image)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                h.reply_text(
                    ctx.msg_id(),
                    &format!("🤖️: Image download failed, please try again later. Error message: {e}"),
                )
                .await;
                return Flow::Halt;
            }
        };
        match to_vision_data_url(bytes).await {
            Ok(url) => images.push(url),
            Err(e) => {
                tracing::debug!("Undecodable image {key}: {e:#}");
                h.reply_text(
                    ctx.msg_id(),
                    "🤖️: Unable to parse image, please send original image and try again~",
                )
                .await;
                return Flow::Halt;
            }
        }
    }

    let prompt = if ctx.text.is_empty() {
        DEFAULT_VISION_PROMPT
    } else {
        ctx.text.as_str()
    };
    let detail = h.sessions.settings(session_id).vision_detail;
    match h.backend.describe_images(prompt, &images, detail).await {
        Ok(answer) => {
            for piece in cards::split_card_text(&answer) {
                h.reply_card(ctx.msg_id(), &cards::vision_result_card(piece)).await;
            }
        }
        Err(e) => {
            tracing::warn!("Vision request failed: {e:#}");
            h.reply_text(
                ctx.msg_id(),
                &format!("🤖️: The message bot encountered an error, please try again later~\nError info: {e}"),
            )
            .await;
        }
    }
    Flow::Halt
}

async fn picture(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    let session_id = ctx.session_id.as_str();
    if either_trim_equal(&ctx.text, &["/picture", "Picture Creation"]) {
        h.sessions.clear(session_id);
        h.sessions.set_mode(session_id, Mode::PicCreate);
        h.sessions.set_pic_resolution(session_id, ImageResolution::R1024);
        h.reply_card(ctx.msg_id(), &cards::pic_instruction_card(session_id, ctx.msg_id()))
            .await;
        return Flow::Halt;
    }

    let mode = h.sessions.mode(session_id);
    let is_image = ctx.event.message_type == MessageType::Image;

    if is_image && mode != Mode::PicCreate {
        h.reply_card(ctx.msg_id(), &cards::pic_mode_check_card(session_id, ctx.msg_id()))
            .await;
        return Flow::Halt;
    }
    if mode != Mode::PicCreate {
        return Flow::Continue;
    }

    let settings = h.sessions.settings(session_id);

    if is_image {
        let Some(image_key) = ctx.image_keys.first() else {
            return Flow::Halt;
        };
        let bytes = match h
            .platform
            .fetch_attachment(ctx.msg_id(), image_key, ResourceKind::Image)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                h.reply_text(
                    ctx.msg_id(),
                    &format!("🤖️: Image download failed, please try again later. Error message: {e}"),
                )
                .await;
                return Flow::Halt;
            }
        };
        let Ok(png) = to_rgba_png(bytes).await else {
            h.reply_text(
                ctx.msg_id(),
                "🤖️: Unable to parse image, please send original image and try again~",
            )
            .await;
            return Flow::Halt;
        };
        let result = async {
            let b64 = h
                .backend
                .generate_image_variation(png, settings.pic_resolution.for_variation())
                .await?;
            h.upload_b64_image(&b64).await
        }
        .await;
        match result {
            Ok(key) => {
                h.reply_card(ctx.msg_id(), &cards::variation_card(session_id, ctx.msg_id(), &key))
                    .await;
            }
            Err(e) => report_image_failure(h, ctx.msg_id(), &e).await,
        }
        return Flow::Halt;
    }

    if ctx.text.is_empty() {
        return Flow::Continue;
    }

    let result = async {
        let b64 = h
            .backend
            .generate_image(&ctx.text, settings.pic_resolution, settings.pic_style)
            .await?;
        h.upload_b64_image(&b64).await
    }
    .await;
    match result {
        Ok(key) => {
            h.reply_card(
                ctx.msg_id(),
                &cards::image_card(session_id, ctx.msg_id(), &key, &ctx.text),
            )
            .await;
        }
        Err(e) => report_image_failure(h, ctx.msg_id(), &e).await,
    }
    Flow::Halt
}

pub(super) async fn report_image_failure(h: &MessageHandler, msg_id: &str, e: &anyhow::Error) {
    tracing::warn!("Image generation failed for {msg_id}: {e:#}");
    h.reply_text(
        msg_id,
        &format!("🤖️: Image generation failed, please try again later. Error message: {e}"),
    )
    .await;
}

async fn ai_mode(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    if either_cut_prefix(&ctx.text, &["/ai_mode", "ai mode"]).is_none() {
        return Flow::Continue;
    }
    h.reply_card(ctx.msg_id(), &cards::ai_mode_list_card(&ctx.session_id, ctx.msg_id()))
        .await;
    Flow::Halt
}

async fn roles(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    if !either_trim_equal(&ctx.text, &["/roles", "roles"]) {
        return Flow::Continue;
    }
    let tags = h.config.role_tags();
    h.reply_card(
        ctx.msg_id(),
        &cards::role_tags_card(&ctx.session_id, ctx.msg_id(), &tags),
    )
    .await;
    Flow::Halt
}

async fn help(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    if !either_trim_equal(&ctx.text, &["/help", "help"]) {
        return Flow::Continue;
    }
    h.reply_card(ctx.msg_id(), &cards::help_card(&ctx.session_id, ctx.msg_id()))
        .await;
    Flow::Halt
}

async fn balance(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    if !either_trim_equal(&ctx.text, &["/balance", "balance"]) {
        return Flow::Continue;
    }
    match h.backend.balance().await {
        Ok(report) => h.reply_card(ctx.msg_id(), &cards::balance_card(&report)).await,
        Err(e) => {
            tracing::warn!("Balance query failed: {e:#}");
            h.reply_text(ctx.msg_id(), "Failed to query balance, please try again later")
                .await;
        }
    }
    Flow::Halt
}

async fn role_play(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    let Some(system) = either_cut_prefix(&ctx.text, &["/system ", "role play "]) else {
        return Flow::Continue;
    };
    let session_id = ctx.session_id.as_str();
    h.sessions.clear(session_id);
    h.sessions.set_mode(session_id, Mode::RolePlay);
    h.sessions
        .set_history(session_id, vec![ChatMessage::system(system)]);
    h.reply_card(ctx.msg_id(), &cards::role_play_card(system)).await;
    Flow::Halt
}

/// One-shot chat, used when streaming is disabled.
async fn plain_chat(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    if h.config.stream.enabled || ctx.text.is_empty() {
        return Flow::Continue;
    }

    let session_id = ctx.session_id.as_str();
    h.sessions.ensure_system_prompt(session_id, default_system_prompt);
    let mut messages = h.sessions.history(session_id);
    let user_turn = ChatMessage::user(ctx.text.clone());
    messages.push(user_turn.clone());

    let temperature = h.sessions.settings(session_id).ai_mode.temperature();
    let reply = match h.backend.complete_chat(&messages, temperature).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("Chat completion failed for {}: {e:#}", ctx.msg_id());
            h.reply_text(
                ctx.msg_id(),
                &format!("🤖️: The message bot encountered an error, please try again later~\nError info: {e}"),
            )
            .await;
            return Flow::Halt;
        }
    };

    let answer = reply.content.clone();
    h.sessions.append_messages(session_id, [user_turn, reply]);
    let new_topic = messages.len() + 1 == 3;
    for card in cards::answer_cards(cards::TopicPhase::Reply, new_topic, &answer) {
        h.reply_card(ctx.msg_id(), &card).await;
    }
    Flow::Halt
}

async fn empty_input(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    if !ctx.text.is_empty() {
        return Flow::Continue;
    }
    tracing::debug!("Message {} has no text", ctx.msg_id());
    if let Err(e) = h
        .platform
        .send_text(ctx.chat_id(), "🤖️: What would you like to know?~")
        .await
    {
        tracing::warn!("Failed to send empty-input prompt to {}: {e:#}", ctx.chat_id());
    }
    Flow::Halt
}

async fn stream_chat(h: &MessageHandler, ctx: &MessageContext) -> Flow {
    if !h.config.stream.enabled {
        return Flow::Continue;
    }

    let session_id = ctx.session_id.as_str();
    h.sessions.ensure_system_prompt(session_id, default_system_prompt);
    let prior = h.sessions.history(session_id);
    let temperature = h.sessions.settings(session_id).ai_mode.temperature();
    h.streaming
        .run(
            session_id,
            ctx.msg_id(),
            prior,
            ChatMessage::user(ctx.text.clone()),
            temperature,
        )
        .await;
    Flow::Halt
}
