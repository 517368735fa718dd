use async_trait::async_trait;

/// Which resource endpoint an attachment lives behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    File,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::File => "file",
        }
    }
}

/// Outbound operations the bot performs against the chat platform.
///
/// Handlers only ever talk to the platform through this trait, so the
/// policy chain and the streaming orchestrator can be driven by in-memory
/// mocks in tests.
#[async_trait]
pub trait MessagingPlatform: Send + Sync {
    /// Human-readable platform name
    fn name(&self) -> &str;

    /// Post a new plain-text message into a chat.
    async fn send_text(&self, chat_id: &str, text: &str) -> anyhow::Result<()>;

    /// Reply to a message with plain text.
    async fn reply_text(&self, msg_id: &str, text: &str) -> anyhow::Result<()>;

    /// Reply with an interactive card; returns the id of the card message so
    /// it can be patched later.
    async fn reply_card(&self, msg_id: &str, card: &serde_json::Value) -> anyhow::Result<String>;

    /// Replace the content of a previously sent card.
    async fn patch_card(&self, card_id: &str, card: &serde_json::Value) -> anyhow::Result<()>;

    /// Download an image or file attached to a user message.
    async fn fetch_attachment(
        &self,
        msg_id: &str,
        file_key: &str,
        kind: ResourceKind,
    ) -> anyhow::Result<Vec<u8>>;

    /// Upload image bytes; returns the image key.
    async fn upload_image(&self, image: Vec<u8>) -> anyhow::Result<String>;

    /// Download an image this app uploaded earlier.
    async fn download_image(&self, image_key: &str) -> anyhow::Result<Vec<u8>>;
}
