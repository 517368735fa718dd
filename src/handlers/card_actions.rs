//! Card button and menu callbacks.

use super::policies::report_image_failure;
use super::MessageHandler;
use crate::channels::cards::{self, CardKind};
use crate::channels::CardAction;
use crate::providers::imaging::to_rgba_png;
use crate::providers::{ChatMessage, ImageResolution, ImageStyle, VisionDetail};
use crate::session::{AiMode, Mode};
use serde_json::Value;
use std::sync::Arc;

/// Route a card callback by kind. The returned card, if any, replaces the
/// clicked card in the callback response.
pub async fn dispatch(h: &Arc<MessageHandler>, action: CardAction) -> Option<Value> {
    let Some(kind) = CardKind::parse(&action.value.kind) else {
        tracing::debug!("Ignoring card action of unknown kind {:?}", action.value.kind);
        return None;
    };
    let session_id = action.value.session_id.as_str();
    let target = action.reply_target();
    let option = action.option.as_deref().unwrap_or_default();
    tracing::debug!(session_id, kind = kind.as_str(), option, "Card action");

    match kind {
        CardKind::Clear => match action.value.value.as_str() {
            "1" => {
                h.sessions.clear_all(session_id);
                Some(cards::context_cleared_card())
            }
            "0" => Some(cards::context_retained_card()),
            _ => None,
        },
        CardKind::PicModeChange => match action.value.value.as_str() {
            "1" => {
                h.sessions.clear(session_id);
                h.sessions.set_mode(session_id, Mode::PicCreate);
                h.sessions.set_pic_resolution(session_id, ImageResolution::R256);
                Some(cards::pic_instruction_card(session_id, target))
            }
            "0" => Some(cards::context_retained_card()),
            _ => None,
        },
        CardKind::VisionMode => match action.value.value.as_str() {
            "1" => {
                h.sessions.clear(session_id);
                h.sessions.set_mode(session_id, Mode::Vision);
                h.sessions.set_vision_detail(session_id, VisionDetail::Low);
                Some(cards::vision_instruction_card(session_id, target))
            }
            "0" => Some(cards::context_retained_card()),
            _ => None,
        },
        CardKind::PicResolution => {
            if let Some(resolution) = ImageResolution::parse(option) {
                h.sessions.set_pic_resolution(session_id, resolution);
                h.reply_text(target, &format!("Image resolution updated to {option}"))
                    .await;
            }
            None
        }
        CardKind::PicStyle => {
            if let Some(style) = ImageStyle::parse(option) {
                h.sessions.set_pic_style(session_id, style);
                h.reply_text(target, &format!("Image style updated to {option}"))
                    .await;
            }
            None
        }
        CardKind::VisionStyle => {
            if let Some(detail) = VisionDetail::parse(option) {
                h.sessions.set_vision_detail(session_id, detail);
                h.reply_text(target, &format!("Image resolution adjusted to: {option}"))
                    .await;
            }
            None
        }
        CardKind::AiModeChoose => {
            let mode = AiMode::from_label(option)?;
            h.sessions.set_ai_mode(session_id, mode);
            Some(cards::ai_mode_selected_card(mode.label()))
        }
        CardKind::RoleTagsChoose => {
            let titles = h.config.role_titles_for_tag(option);
            if !titles.is_empty() {
                h.reply_card(target, &cards::role_list_card(session_id, target, option, &titles))
                    .await;
            }
            None
        }
        CardKind::RoleChoose => {
            let Some(role) = h.config.find_role(option) else {
                tracing::debug!("Unknown role {option:?}");
                return None;
            };
            h.sessions.clear(session_id);
            h.sessions.set_mode(session_id, Mode::RolePlay);
            h.sessions
                .set_history(session_id, vec![ChatMessage::system(role.content.clone())]);
            h.reply_card(target, &cards::role_play_card(&role.content)).await;
            None
        }
        CardKind::PicTextMore => {
            let handler = Arc::clone(h);
            let (session_id, target, prompt) = (
                session_id.to_string(),
                target.to_string(),
                action.value.value.clone(),
            );
            tokio::spawn(async move {
                handler.regenerate_image(&session_id, &target, &prompt).await;
            });
            None
        }
        CardKind::PicVarMore => {
            let handler = Arc::clone(h);
            let (session_id, target, image_key) = (
                session_id.to_string(),
                target.to_string(),
                action.value.value.clone(),
            );
            tokio::spawn(async move {
                handler.vary_image_again(&session_id, &target, &image_key).await;
            });
            None
        }
    }
}

impl MessageHandler {
    async fn regenerate_image(&self, session_id: &str, msg_id: &str, prompt: &str) {
        let settings = self.sessions.settings(session_id);
        let result = async {
            let b64 = self
                .backend
                .generate_image(prompt, settings.pic_resolution, settings.pic_style)
                .await?;
            self.upload_b64_image(&b64).await
        }
        .await;
        match result {
            Ok(key) => {
                self.reply_card(msg_id, &cards::image_card(session_id, msg_id, &key, prompt))
                    .await;
            }
            Err(e) => report_image_failure(self, msg_id, &e).await,
        }
    }

    async fn vary_image_again(&self, session_id: &str, msg_id: &str, image_key: &str) {
        let resolution = self.sessions.settings(session_id).pic_resolution.for_variation();
        let result = async {
            let original = self.platform.download_image(image_key).await?;
            let png = to_rgba_png(original).await?;
            let b64 = self.backend.generate_image_variation(png, resolution).await?;
            self.upload_b64_image(&b64).await
        }
        .await;
        match result {
            Ok(key) => {
                self.reply_card(msg_id, &cards::variation_card(session_id, msg_id, &key))
                    .await;
            }
            Err(e) => report_image_failure(self, msg_id, &e).await,
        }
    }
}
