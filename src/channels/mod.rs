//! Messaging platform integration.
//!
//! The bot talks to Lark/Feishu through the [`MessagingPlatform`] trait
//! defined in [`traits`]; [`lark::LarkClient`] is the HTTP implementation.
//! [`event`] turns webhook payloads into [`InboundEvent`]s and card
//! callbacks, [`cards`] builds the interactive cards the bot replies with,
//! and [`transcription`] prepares voice clips for speech-to-text.

pub mod cards;
pub mod event;
pub mod lark;
pub mod traits;
pub mod transcription;

pub use event::{parse_card_action, parse_message_event, CardAction, ChatType, InboundEvent, MessageType};
pub use lark::LarkClient;
pub use traits::{MessagingPlatform, ResourceKind};
