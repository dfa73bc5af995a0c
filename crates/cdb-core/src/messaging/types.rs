/// Whether an outbound message pushes a notification.
///
/// Silent lessons are unlocked without a push; the content is still
/// there when the user opens the chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notify {
    Push,
    Silent,
}

impl Notify {
    pub fn is_silent(self) -> bool {
        matches!(self, Notify::Silent)
    }
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_html: bool,
    pub supports_media: bool,
    pub supports_silent_delivery: bool,
    pub max_message_len: usize,
}
