//! Parsing of inbound Lark payloads: message events and card callbacks.

use super::cards::ActionValue;
use serde::Deserialize;

pub const MESSAGE_RECEIVE_EVENT: &str = "im.message.receive_v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatType {
    Group,
    P2p,
    Other(String),
}

impl ChatType {
    fn parse(raw: &str) -> Self {
        match raw {
            "group" => Self::Group,
            "p2p" => Self::P2p,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Image,
    Audio,
    Post,
    Unsupported(String),
}

impl MessageType {
    fn parse(raw: &str) -> Self {
        match raw {
            "text" => Self::Text,
            "image" => Self::Image,
            "audio" => Self::Audio,
            "post" => Self::Post,
            other => Self::Unsupported(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MentionId {
    #[serde(default)]
    pub open_id: String,
}

/// One `@` mention inside a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Mention {
    /// Placeholder used in the text, e.g. `@_user_1`.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: MentionId,
}

#[derive(Debug, Deserialize)]
struct EnvelopeHeader {
    #[serde(default)]
    event_id: String,
    #[serde(default)]
    event_type: String,
}

#[derive(Debug, Deserialize)]
struct SenderId {
    #[serde(default)]
    open_id: String,
}

#[derive(Debug, Deserialize)]
struct Sender {
    sender_id: Option<SenderId>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    message_id: String,
    #[serde(default)]
    root_id: String,
    chat_id: String,
    chat_type: String,
    message_type: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    mentions: Vec<Mention>,
}

#[derive(Debug, Deserialize)]
struct MessageEventBody {
    sender: Option<Sender>,
    message: RawMessage,
}

/// A received chat message, as the policy chain sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub event_id: String,
    pub message_id: String,
    pub chat_id: String,
    /// Root of the reply thread; empty when the message starts a topic.
    pub root_id: String,
    pub chat_type: ChatType,
    pub message_type: MessageType,
    /// Raw JSON content string as delivered by Lark.
    pub content: String,
    pub mentions: Vec<Mention>,
    pub sender_open_id: String,
}

impl InboundEvent {
    /// A topic is keyed by its root message; a fresh message is its own root.
    pub fn session_id(&self) -> &str {
        if self.root_id.is_empty() {
            &self.message_id
        } else {
            &self.root_id
        }
    }

    /// User-visible text of the message, trimmed. Empty for non-text messages.
    pub fn parsed_text(&self) -> String {
        match self.message_type {
            MessageType::Text => parse_text_content(&self.content),
            MessageType::Post => parse_post_content(&self.content).unwrap_or_default(),
            _ => String::new(),
        }
    }

    /// File key of an audio (or file) message.
    pub fn file_key(&self) -> Option<String> {
        content_field(&self.content, "file_key")
    }

    /// Image keys of an image message, or every image inside a post.
    pub fn image_keys(&self) -> Vec<String> {
        match self.message_type {
            MessageType::Image => content_field(&self.content, "image_key").into_iter().collect(),
            MessageType::Post => post_image_keys(&self.content),
            _ => Vec::new(),
        }
    }
}

/// Parse an event callback payload.
///
/// Returns `None` for anything other than a well-formed
/// `im.message.receive_v1` event.
pub fn parse_message_event(payload: &serde_json::Value) -> Option<InboundEvent> {
    let header: EnvelopeHeader = serde_json::from_value(payload.get("header")?.clone()).ok()?;
    if header.event_type != MESSAGE_RECEIVE_EVENT {
        return None;
    }

    let body: MessageEventBody = match serde_json::from_value(payload.get("event")?.clone()) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("Lark: malformed message event {}: {e}", header.event_id);
            return None;
        }
    };

    let sender_open_id = body
        .sender
        .and_then(|s| s.sender_id)
        .map(|id| id.open_id)
        .unwrap_or_default();
    let message = body.message;

    Some(InboundEvent {
        event_id: header.event_id,
        message_id: message.message_id,
        chat_id: message.chat_id,
        root_id: message.root_id,
        chat_type: ChatType::parse(&message.chat_type),
        message_type: MessageType::parse(&message.message_type),
        content: message.content,
        mentions: message.mentions,
        sender_open_id,
    })
}

fn content_field(content: &str, field: &str) -> Option<String> {
    let parsed = serde_json::from_str::<serde_json::Value>(content).ok()?;
    parsed
        .get(field)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_text_content(content: &str) -> String {
    let text = content_field(content, "text").unwrap_or_default();
    strip_at_placeholders(&text).trim().to_string()
}

/// Post bodies arrive either bare (`{"title", "content"}`) or wrapped in a
/// locale key such as `zh_cn`.
fn post_body(parsed: &serde_json::Value) -> Option<&serde_json::Value> {
    if parsed.get("content").is_some_and(serde_json::Value::is_array) {
        return Some(parsed);
    }
    parsed
        .get("zh_cn")
        .or_else(|| parsed.get("en_us"))
        .or_else(|| {
            parsed
                .as_object()
                .and_then(|m| m.values().find(|v| v.is_object()))
        })
}

fn post_elements(body: &serde_json::Value) -> impl Iterator<Item = Option<&serde_json::Value>> {
    body.get("content")
        .and_then(serde_json::Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(serde_json::Value::as_array)
        .flat_map(|para| para.iter().map(Some).chain(std::iter::once(None)))
}

/// Flatten a `post` rich-text message to plain text.
///
/// Paragraph breaks become newlines; `None` marks content that cannot be
/// parsed or yields no text.
fn parse_post_content(content: &str) -> Option<String> {
    let parsed = serde_json::from_str::<serde_json::Value>(content).ok()?;
    let body = post_body(&parsed)?;

    let mut text = String::new();
    if let Some(title) = body
        .get("title")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
    {
        text.push_str(title);
        text.push_str("\n\n");
    }

    for element in post_elements(body) {
        let Some(el) = element else {
            text.push('\n');
            continue;
        };
        match el.get("tag").and_then(serde_json::Value::as_str).unwrap_or("") {
            "text" => {
                if let Some(t) = el.get("text").and_then(serde_json::Value::as_str) {
                    text.push_str(t);
                }
            }
            "a" => {
                text.push_str(
                    el.get("text")
                        .and_then(serde_json::Value::as_str)
                        .filter(|s| !s.is_empty())
                        .or_else(|| el.get("href").and_then(serde_json::Value::as_str))
                        .unwrap_or(""),
                );
            }
            _ => {}
        }
    }

    let result = strip_at_placeholders(&text).trim().to_string();
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

fn post_image_keys(content: &str) -> Vec<String> {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(content) else {
        return Vec::new();
    };
    let Some(body) = post_body(&parsed) else {
        return Vec::new();
    };
    post_elements(body)
        .flatten()
        .filter(|el| el.get("tag").and_then(serde_json::Value::as_str) == Some("img"))
        .filter_map(|el| el.get("image_key").and_then(serde_json::Value::as_str))
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Remove `@_user_N` placeholder tokens injected by Lark in group chats.
fn strip_at_placeholders(text: &str) -> String {
    const PLACEHOLDER: &str = "@_user_";
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(PLACEHOLDER) {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + PLACEHOLDER.len()..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            result.push_str(PLACEHOLDER);
            rest = after;
            continue;
        }
        let tail = &after[digits..];
        rest = tail.strip_prefix(' ').unwrap_or(tail);
    }
    result.push_str(rest);
    result
}

/// A click on a card button or menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardAction {
    pub value: ActionValue,
    /// Selected option for menus.
    pub option: Option<String>,
    /// Id of the card message that was clicked.
    pub open_message_id: String,
    pub token: String,
}

impl CardAction {
    /// Message to reply to: the one recorded in the button, else the card.
    pub fn reply_target(&self) -> &str {
        if self.value.msg_id.is_empty() {
            &self.open_message_id
        } else {
            &self.value.msg_id
        }
    }
}

/// Parse a card callback body. `None` when it carries no action value.
pub fn parse_card_action(payload: &serde_json::Value) -> Option<CardAction> {
    let action = payload.get("action")?;
    let value: ActionValue = match serde_json::from_value(action.get("value")?.clone()) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Lark: unreadable card action value: {e}");
            return None;
        }
    };
    let option = action
        .get("option")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);
    let text = |key: &str| {
        payload
            .get(key)
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Some(CardAction {
        value,
        option,
        open_message_id: text("open_message_id"),
        token: text("token"),
    })
}
