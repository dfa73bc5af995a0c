use std::path::Path;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{MessagingCapabilities, Notify},
    Result,
};

/// Cross-messenger port.
///
/// Telegram is the first implementation; the shape is deliberately small
/// so the scheduler and assignment router depend only on "deliver this
/// content to chat X" and never on platform reply semantics.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_html(&self, chat_id: ChatId, html: &str, notify: Notify) -> Result<MessageRef>;

    async fn send_photo(&self, chat_id: ChatId, path: &Path, notify: Notify) -> Result<MessageRef>;

    async fn send_video(&self, chat_id: ChatId, path: &Path, notify: Notify) -> Result<MessageRef>;
}
