//! Interactive card payloads.
//!
//! Builders return `serde_json::Value` documents in the Lark message card
//! schema. Buttons and menus carry an [`ActionValue`] that comes back in the
//! card callback, tagged with a [`CardKind`] so the callback can be routed.

use crate::providers::{BalanceReport, ImageResolution, ImageStyle, VisionDetail};
use crate::session::AiMode;
use crate::util::truncate_with_ellipsis;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Text per card. Lark rejects cards over ~30 KB, and CJK text costs three
/// bytes a character, so a piece stays well under that.
pub const MAX_CARD_TEXT_CHARS: usize = 8_000;

const FRESH_TOPIC_NOTE: &str = "Please note, this will start a brand new conversation and you won't be able to use historical information from previous topics";
const RETAINED_NOTE: &str = "We can continue discussing this topic, looking forward to chatting with you. If you have other questions or topics you'd like to discuss, please let me know";
const TOPIC_REPLY_NOTE: &str = "Reminder: Click the dialogue box to reply and maintain topic continuity";

/// Routing tag carried by every interactive element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Clear,
    PicModeChange,
    VisionMode,
    PicResolution,
    PicStyle,
    VisionStyle,
    PicTextMore,
    PicVarMore,
    RoleTagsChoose,
    RoleChoose,
    AiModeChoose,
}

impl CardKind {
    pub const ALL: [CardKind; 11] = [
        Self::Clear,
        Self::PicModeChange,
        Self::VisionMode,
        Self::PicResolution,
        Self::PicStyle,
        Self::VisionStyle,
        Self::PicTextMore,
        Self::PicVarMore,
        Self::RoleTagsChoose,
        Self::RoleChoose,
        Self::AiModeChoose,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::PicModeChange => "pic_mode_change",
            Self::VisionMode => "vision_mode",
            Self::PicResolution => "pic_resolution",
            Self::PicStyle => "pic_style",
            Self::VisionStyle => "vision_style",
            Self::PicTextMore => "pic_text_more",
            Self::PicVarMore => "pic_var_more",
            Self::RoleTagsChoose => "role_tags_choose",
            Self::RoleChoose => "role_choose",
            Self::AiModeChoose => "ai_mode_choose",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw)
    }
}

/// Payload attached to buttons and menus, echoed back on click.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionValue {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub msg_id: String,
    #[serde(default)]
    pub chat_type: String,
}

impl ActionValue {
    pub fn new(kind: CardKind, value: impl Into<String>, session_id: &str, msg_id: &str) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            value: value.into(),
            session_id: session_id.to_string(),
            msg_id: msg_id.to_string(),
            chat_type: "personal".to_string(),
        }
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Header colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Blue,
    Green,
    Grey,
    Indigo,
}

impl Template {
    fn as_str(self) -> &'static str {
        match self {
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Grey => "grey",
            Self::Indigo => "indigo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Default,
    Primary,
    Danger,
}

impl ButtonStyle {
    fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Primary => "primary",
            Self::Danger => "danger",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionLayout {
    Bisected,
    Flow,
}

impl ActionLayout {
    fn as_str(self) -> &'static str {
        match self {
            Self::Bisected => "bisected",
            Self::Flow => "flow",
        }
    }
}

// ── Element builders ────────────────────────────────────────────

pub fn card(header: Option<Value>, elements: Vec<Value>) -> Value {
    let mut card = json!({
        "config": {
            "wide_screen_mode": false,
            "enable_forward": true,
            "update_multi": true
        },
        "elements": elements,
    });
    if let Some(header) = header {
        card["header"] = header;
    }
    card
}

/// Card header; an empty title falls back to the generic reminder title.
pub fn header(title: &str, template: Template) -> Value {
    let title = if title.is_empty() { "🤖️ Bot Reminder" } else { title };
    json!({
        "template": template.as_str(),
        "title": { "tag": "plain_text", "content": title }
    })
}

pub fn markdown(text: &str) -> Value {
    json!({
        "tag": "div",
        "text": { "tag": "lark_md", "content": truncate_with_ellipsis(text, MAX_CARD_TEXT_CHARS) }
    })
}

pub fn plain_text(text: &str) -> Value {
    json!({
        "tag": "div",
        "text": { "tag": "plain_text", "content": truncate_with_ellipsis(text, MAX_CARD_TEXT_CHARS) }
    })
}

pub fn note(text: &str) -> Value {
    json!({
        "tag": "note",
        "elements": [{ "tag": "plain_text", "content": text }]
    })
}

pub fn hr() -> Value {
    json!({ "tag": "hr" })
}

pub fn image(image_key: &str) -> Value {
    json!({
        "tag": "img",
        "img_key": image_key,
        "alt": { "tag": "plain_text", "content": "" },
        "mode": "crop_center",
        "compact_width": true,
        "preview": true
    })
}

pub fn button(label: &str, style: ButtonStyle, value: &ActionValue) -> Value {
    json!({
        "tag": "button",
        "text": { "tag": "plain_text", "content": label },
        "type": style.as_str(),
        "value": value.to_json()
    })
}

/// Static select menu; `options` are `(label, value)` pairs.
pub fn select_menu(placeholder: &str, value: &ActionValue, options: &[(String, String)]) -> Value {
    let options: Vec<Value> = options
        .iter()
        .map(|(label, value)| {
            json!({
                "text": { "tag": "plain_text", "content": label },
                "value": value
            })
        })
        .collect();
    json!({
        "tag": "select_static",
        "placeholder": { "tag": "plain_text", "content": placeholder },
        "options": options,
        "value": value.to_json()
    })
}

pub fn action_row(actions: Vec<Value>, layout: ActionLayout) -> Value {
    json!({
        "tag": "action",
        "actions": actions,
        "layout": layout.as_str()
    })
}

/// Markdown block with a trailing button.
fn markdown_with_button(text: &str, button: Value) -> Value {
    let mut div = markdown(text);
    div["extra"] = button;
    div
}

fn same_options(items: impl IntoIterator<Item = impl Into<String>>) -> Vec<(String, String)> {
    items
        .into_iter()
        .map(|item| {
            let item = item.into();
            (item.clone(), item)
        })
        .collect()
}

fn confirm_buttons(kind: CardKind, confirm_label: &str, session_id: &str, msg_id: &str) -> Value {
    action_row(
        vec![
            button(
                confirm_label,
                ButtonStyle::Danger,
                &ActionValue::new(kind, "1", session_id, msg_id),
            ),
            button(
                "Let me think",
                ButtonStyle::Default,
                &ActionValue::new(kind, "0", session_id, msg_id),
            ),
        ],
        ActionLayout::Bisected,
    )
}

// ── Bot cards ───────────────────────────────────────────────────

pub fn clear_confirm_card(session_id: &str, msg_id: &str) -> Value {
    card(
        Some(header("🆑 Bot Reminder", Template::Blue)),
        vec![
            markdown("Are you sure you want to clear the conversation context?"),
            note(FRESH_TOPIC_NOTE),
            confirm_buttons(CardKind::Clear, "Confirm Clear", session_id, msg_id),
        ],
    )
}

pub fn context_cleared_card() -> Value {
    card(
        Some(header("🆑 Bot Reminder", Template::Grey)),
        vec![
            markdown("Context information for this topic has been deleted"),
            note("We can start a brand new topic, feel free to continue chatting with me"),
        ],
    )
}

pub fn context_retained_card() -> Value {
    card(
        Some(header("🆑 Bot Reminder", Template::Green)),
        vec![
            markdown("Context information for this topic is still retained"),
            note(RETAINED_NOTE),
        ],
    )
}

pub fn role_play_card(system_prompt: &str) -> Value {
    card(
        Some(header("🥷  Entered Role-Playing Mode", Template::Indigo)),
        vec![plain_text(system_prompt), note(FRESH_TOPIC_NOTE)],
    )
}

fn pic_settings_menus(session_id: &str, msg_id: &str) -> Value {
    let resolutions: Vec<(String, String)> = [
        ImageResolution::R1024,
        ImageResolution::R1024x1792,
        ImageResolution::R1792x1024,
    ]
    .into_iter()
    .map(|r| (r.as_str().to_string(), r.as_str().to_string()))
    .collect();
    let styles = vec![
        ("Vivid Style".to_string(), ImageStyle::Vivid.as_str().to_string()),
        ("Natural Style".to_string(), ImageStyle::Natural.as_str().to_string()),
    ];

    action_row(
        vec![
            select_menu(
                "Default Resolution",
                &ActionValue::new(CardKind::PicResolution, "0", session_id, msg_id),
                &resolutions,
            ),
            select_menu(
                "Style",
                &ActionValue::new(CardKind::PicStyle, "0", session_id, msg_id),
                &styles,
            ),
        ],
        ActionLayout::Flow,
    )
}

pub fn pic_instruction_card(session_id: &str, msg_id: &str) -> Value {
    card(
        Some(header("🖼️ Entered Image Creation Mode", Template::Blue)),
        vec![
            pic_settings_menus(session_id, msg_id),
            note("Reminder: Reply with text or images to let AI generate related pictures."),
        ],
    )
}

pub fn pic_mode_check_card(session_id: &str, msg_id: &str) -> Value {
    card(
        Some(header("🖼️ Bot Reminder", Template::Blue)),
        vec![
            markdown("Image received, enter image creation mode?"),
            note(FRESH_TOPIC_NOTE),
            confirm_buttons(CardKind::PicModeChange, "Switch Mode", session_id, msg_id),
        ],
    )
}

fn vision_detail_menu(session_id: &str, msg_id: &str) -> Value {
    let options = vec![
        ("High".to_string(), VisionDetail::High.as_str().to_string()),
        ("Low".to_string(), VisionDetail::Low.as_str().to_string()),
    ];
    action_row(
        vec![select_menu(
            "Select image resolution, default is high",
            &ActionValue::new(CardKind::VisionStyle, "0", session_id, msg_id),
            &options,
        )],
        ActionLayout::Bisected,
    )
}

pub fn vision_instruction_card(session_id: &str, msg_id: &str) -> Value {
    card(
        Some(header("🕵️️ Entered Image Analysis Mode", Template::Blue)),
        vec![
            vision_detail_menu(session_id, msg_id),
            note("Reminder: Reply with images to let the LLM analyze the image content with you."),
        ],
    )
}

pub fn vision_mode_check_card(session_id: &str, msg_id: &str) -> Value {
    card(
        Some(header("🕵️ Bot Reminder", Template::Blue)),
        vec![
            markdown("Image detected, enter image analysis mode?"),
            note(FRESH_TOPIC_NOTE),
            confirm_buttons(CardKind::VisionMode, "Switch Mode", session_id, msg_id),
        ],
    )
}

pub fn vision_result_card(content: &str) -> Value {
    card(
        Some(header("🕵️ Image Analysis Result", Template::Blue)),
        vec![
            plain_text(content),
            note("Let the LLM analyze the image content with you~"),
        ],
    )
}

pub fn help_card(session_id: &str, msg_id: &str) -> Value {
    let sections = [
        "🤖 **Divergent Mode Selection**\nReply with *ai mode* or */ai_mode*",
        "🛖 **Built-in Role List**\nReply with *roles* or */roles*",
        "🥷 **Role-Playing Mode**\nReply with *role play* or */system* + space + role info",
        "🎤 **AI Voice Chat**\nDirectly send voice messages in private chat mode",
        "🎨 **Image Creation Mode**\nReply with *Picture Creation* or */picture*",
        "🕵️ **Image Analysis Mode**\nReply with *vision* or */vision*",
        "🎰 **Token Balance Query**\nReply with *balance* or */balance*",
        "🎰 **Continuous Dialogue & Multi-Topic Mode**\nClick the dialogue box to reply and maintain topic continuity. Meanwhile, ask separately to start a new topic",
        "🎒 **Need More Help?**\nReply with *help* or */help*",
    ];

    let mut elements = vec![
        markdown("**🤠 Hello! I'm an intelligent assistant based on OpenAI!**"),
        hr(),
        markdown_with_button(
            "** 🆑 Clear Topic Context**\nReply with *clear* or */clear*",
            button(
                "Clear Now",
                ButtonStyle::Danger,
                &ActionValue::new(CardKind::Clear, "1", session_id, msg_id),
            ),
        ),
    ];
    for section in sections {
        elements.push(hr());
        elements.push(markdown(section));
    }

    card(Some(header("🎒 Need Help?", Template::Blue)), elements)
}

pub fn balance_card(balance: &BalanceReport) -> Value {
    const FMT: &str = "%Y-%m-%d %H:%M:%S";
    card(
        Some(header("🎰️ Balance Query", Template::Blue)),
        vec![
            markdown(&format!("Total Quota: {:.2}$", balance.granted)),
            markdown(&format!("Used Quota: {:.2}$", balance.used)),
            markdown(&format!("Available Quota: {:.2}$", balance.available)),
            note(&format!(
                "Validity Period: {} - {}",
                balance.valid_from.format(FMT),
                balance.valid_to.format(FMT)
            )),
        ],
    )
}

pub fn role_tags_card(session_id: &str, msg_id: &str, tags: &[String]) -> Value {
    card(
        Some(header("🛖 Please Select Role Category", Template::Indigo)),
        vec![
            action_row(
                vec![select_menu(
                    "Select Role Category",
                    &ActionValue::new(CardKind::RoleTagsChoose, "0", session_id, msg_id),
                    &same_options(tags.iter().cloned()),
                )],
                ActionLayout::Flow,
            ),
            note("Reminder: Select the role category so we can recommend more related roles for you."),
        ],
    )
}

pub fn role_list_card(session_id: &str, msg_id: &str, tag: &str, titles: &[String]) -> Value {
    card(
        Some(header(&format!("🛖 Role List - {tag}"), Template::Indigo)),
        vec![
            action_row(
                vec![select_menu(
                    "View Built-in Roles",
                    &ActionValue::new(CardKind::RoleChoose, "0", session_id, msg_id),
                    &same_options(titles.iter().cloned()),
                )],
                ActionLayout::Flow,
            ),
            note("Reminder: Select a built-in scenario to quickly enter role-playing mode."),
        ],
    )
}

pub fn ai_mode_list_card(session_id: &str, msg_id: &str) -> Value {
    card(
        Some(header("🤖 Divergent Mode Selection", Template::Indigo)),
        vec![
            action_row(
                vec![select_menu(
                    "Select Mode",
                    &ActionValue::new(CardKind::AiModeChoose, "0", session_id, msg_id),
                    &same_options(AiMode::ALL.map(AiMode::label)),
                )],
                ActionLayout::Flow,
            ),
            note("Reminder: Select a built-in mode to help AI better understand your needs."),
        ],
    )
}

pub fn ai_mode_selected_card(label: &str) -> Value {
    card(
        Some(header("Divergent Mode Selection", Template::Indigo)),
        vec![
            markdown(&format!("Selected divergent mode: **{label}**")),
            note("The AI mode has been updated. You can continue chatting."),
        ],
    )
}

/// Stage of a chat answer card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicPhase {
    /// Placeholder sent before any text arrives.
    Processing,
    /// Periodic patch while the answer streams in.
    Updating,
    /// Last patch of a streamed answer.
    Final,
    /// One-shot (non-streamed) answer.
    Reply,
}

impl TopicPhase {
    fn note(self) -> &'static str {
        match self {
            Self::Processing => "Thinking, please wait...",
            Self::Updating => "Generating, please wait...",
            Self::Final => "Completed, you can continue asking questions or choose other functions.",
            Self::Reply => TOPIC_REPLY_NOTE,
        }
    }
}

/// Chat answer card. The header distinguishes a fresh topic from a
/// continuing one.
pub fn topic_card(phase: TopicPhase, new_topic: bool, content: Option<&str>) -> Value {
    let title = if new_topic {
        "👻️ Started New Topic"
    } else {
        "🔃️ Contextual Topic"
    };
    let mut elements = Vec::with_capacity(2);
    if let Some(content) = content {
        elements.push(plain_text(content));
    }
    elements.push(note(phase.note()));
    card(Some(header(title, Template::Blue)), elements)
}

/// Chat answer cards. Text that does not fit one card continues in further
/// cards; only the first may carry the fresh-topic header.
pub fn answer_cards(phase: TopicPhase, new_topic: bool, answer: &str) -> Vec<Value> {
    split_card_text(answer)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| topic_card(phase, new_topic && i == 0, Some(piece)))
        .collect()
}

/// Split text into pieces of at most [`MAX_CARD_TEXT_CHARS`] characters.
///
/// A piece ends after a newline, or failing that a space, when one falls in
/// its second half; otherwise it is cut at the limit. Always returns at least
/// one piece.
pub fn split_card_text(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while let Some((limit, _)) = rest.char_indices().nth(MAX_CARD_TEXT_CHARS) {
        let window = &rest[..limit];
        let end = window
            .rfind('\n')
            .filter(|&pos| pos >= limit / 2)
            .or_else(|| window.rfind(' ').filter(|&pos| pos >= limit / 2))
            .map_or(limit, |pos| pos + 1);
        pieces.push(&rest[..end]);
        rest = &rest[end..];
    }
    if !rest.is_empty() || pieces.is_empty() {
        pieces.push(rest);
    }
    pieces
}

/// Generated image with a "One More" button that regenerates from `prompt`.
pub fn image_card(session_id: &str, msg_id: &str, image_key: &str, prompt: &str) -> Value {
    one_more_card(
        image_key,
        ActionValue::new(CardKind::PicTextMore, prompt, session_id, msg_id),
    )
}

/// Image variation with a "One More" button that varies `image_key` again.
pub fn variation_card(session_id: &str, msg_id: &str, image_key: &str) -> Value {
    one_more_card(
        image_key,
        ActionValue::new(CardKind::PicVarMore, image_key, session_id, msg_id),
    )
}

fn one_more_card(image_key: &str, value: ActionValue) -> Value {
    card(
        None,
        vec![
            image(image_key),
            hr(),
            action_row(
                vec![button("One More", ButtonStyle::Primary, &value)],
                ActionLayout::Flow,
            ),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn all_text(card: &Value) -> String {
        card.to_string()
    }

    #[test]
    fn card_kinds_round_trip() {
        for kind in CardKind::ALL {
            assert_eq!(CardKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CardKind::parse("launch_rockets"), None);
    }

    #[test]
    fn action_value_uses_camel_case_wire_names() {
        let value = ActionValue::new(CardKind::Clear, "1", "sess", "om_1");
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            json!({
                "kind": "clear",
                "value": "1",
                "sessionId": "sess",
                "msgId": "om_1",
                "chatType": "personal"
            })
        );
    }

    #[test]
    fn cards_are_patchable() {
        let card = topic_card(TopicPhase::Processing, true, None);
        assert_eq!(card["config"]["update_multi"], json!(true));
    }

    #[test]
    fn clear_confirm_card_carries_both_choices() {
        let card = clear_confirm_card("sess", "om_1");
        let actions = card["elements"][2]["actions"].as_array().unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0]["value"]["kind"], json!("clear"));
        assert_eq!(actions[0]["value"]["value"], json!("1"));
        assert_eq!(actions[1]["value"]["value"], json!("0"));
        assert_eq!(actions[0]["type"], json!("danger"));
    }

    #[test]
    fn topic_card_headers_and_notes() {
        let fresh = topic_card(TopicPhase::Processing, true, None);
        assert_eq!(fresh["header"]["title"]["content"], json!("👻️ Started New Topic"));
        assert!(all_text(&fresh).contains("Thinking, please wait..."));

        let ongoing = topic_card(TopicPhase::Final, false, Some("Hello"));
        assert_eq!(ongoing["header"]["title"]["content"], json!("🔃️ Contextual Topic"));
        assert_eq!(ongoing["elements"][0]["text"]["content"], json!("Hello"));
        assert!(all_text(&ongoing).contains("Completed"));
    }

    #[test]
    fn long_answers_are_truncated() {
        let long = "x".repeat(MAX_CARD_TEXT_CHARS + 100);
        let card = topic_card(TopicPhase::Updating, false, Some(&long));
        let content = card["elements"][0]["text"]["content"].as_str().unwrap();
        assert!(content.ends_with("..."));
        assert_eq!(content.chars().count(), MAX_CARD_TEXT_CHARS + 3);
    }

    #[test]
    fn short_text_is_a_single_piece() {
        assert_eq!(split_card_text("hi"), vec!["hi"]);
        assert_eq!(split_card_text(""), vec![""]);
        let exact = "z".repeat(MAX_CARD_TEXT_CHARS);
        assert_eq!(split_card_text(&exact), vec![exact.as_str()]);
    }

    #[test]
    fn long_text_splits_without_losing_characters() {
        let text = "é".repeat(MAX_CARD_TEXT_CHARS * 2 + 10);
        let pieces = split_card_text(&text);
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|p| p.chars().count() <= MAX_CARD_TEXT_CHARS));
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn split_prefers_line_breaks() {
        let first = "a".repeat(MAX_CARD_TEXT_CHARS - 100);
        let text = format!("{first}\n{}", "b".repeat(500));
        let pieces = split_card_text(&text);
        assert_eq!(pieces, vec![format!("{first}\n").as_str(), "b".repeat(500).as_str()]);
    }

    #[test]
    fn answer_cards_keep_new_topic_header_on_first_card_only() {
        let text = "w ".repeat(MAX_CARD_TEXT_CHARS);
        let cards = answer_cards(TopicPhase::Final, true, &text);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0]["header"]["title"]["content"], json!("👻️ Started New Topic"));
        assert_eq!(cards[1]["header"]["title"]["content"], json!("🔃️ Contextual Topic"));
        let joined: String = cards
            .iter()
            .map(|c| c["elements"][0]["text"]["content"].as_str().unwrap())
            .collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn image_card_one_more_keeps_prompt() {
        let card = image_card("sess", "om_1", "img_k", "a red fox");
        assert_eq!(card.get("header"), None);
        assert_eq!(card["elements"][0]["img_key"], json!("img_k"));
        let value = &card["elements"][2]["actions"][0]["value"];
        assert_eq!(value["kind"], json!("pic_text_more"));
        assert_eq!(value["value"], json!("a red fox"));
    }

    #[test]
    fn variation_card_one_more_keeps_image_key() {
        let card = variation_card("sess", "om_1", "img_k");
        let value = &card["elements"][2]["actions"][0]["value"];
        assert_eq!(value["kind"], json!("pic_var_more"));
        assert_eq!(value["value"], json!("img_k"));
    }

    #[test]
    fn ai_mode_menu_lists_every_mode() {
        let card = ai_mode_list_card("sess", "om_1");
        let options = card["elements"][0]["actions"][0]["options"].as_array().unwrap();
        let labels: Vec<_> = options.iter().map(|o| o["value"].as_str().unwrap()).collect();
        assert_eq!(labels, vec!["Rigorous", "Concise", "Standard", "Creative"]);
    }

    #[test]
    fn balance_card_formats_amounts_and_dates() {
        let report = BalanceReport {
            granted: 18.0,
            used: 2.5,
            available: 15.5,
            valid_from: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            valid_to: Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap(),
        };
        let text = all_text(&balance_card(&report));
        assert!(text.contains("Total Quota: 18.00$"));
        assert!(text.contains("Available Quota: 15.50$"));
        assert!(text.contains("2023-01-01 00:00:00 - 2023-04-01 00:00:00"));
    }

    #[test]
    fn help_card_has_clear_button() {
        let card = help_card("sess", "om_1");
        assert_eq!(card["elements"][2]["extra"]["value"]["kind"], json!("clear"));
    }
}
