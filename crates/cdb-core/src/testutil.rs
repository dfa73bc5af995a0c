//! Shared test doubles.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::atomic::{AtomicI32, Ordering},
    time::Duration,
};

use tokio::sync::Mutex;

use crate::{
    config::Config,
    domain::{ChatId, MessageId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{MessagingCapabilities, Notify},
    },
    Error, Result,
};

#[derive(Clone, Debug)]
pub struct SentMessage {
    pub chat_id: ChatId,
    pub html: Option<String>,
    pub media: Option<PathBuf>,
    pub notify: Notify,
}

/// In-memory messenger that records every outbound call and can be told
/// to fail for specific chats.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<SentMessage>>,
    failing: Mutex<HashSet<i64>>,
    next_id: AtomicI32,
}

impl RecordingMessenger {
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn fail_chat(&self, chat_id: ChatId) {
        self.failing.lock().await.insert(chat_id.0);
    }

    pub async fn unfail_chat(&self, chat_id: ChatId) {
        self.failing.lock().await.remove(&chat_id.0);
    }

    async fn record(&self, msg: SentMessage) -> Result<MessageRef> {
        if self.failing.lock().await.contains(&msg.chat_id.0) {
            return Err(Error::Transient("simulated send failure".to_string()));
        }
        let chat_id = msg.chat_id;
        self.sent.lock().await.push(msg);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(id),
        })
    }
}

#[async_trait::async_trait]
impl MessagingPort for RecordingMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_media: true,
            supports_silent_delivery: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str, notify: Notify) -> Result<MessageRef> {
        self.record(SentMessage {
            chat_id,
            html: Some(html.to_string()),
            media: None,
            notify,
        })
        .await
    }

    async fn send_photo(&self, chat_id: ChatId, path: &Path, notify: Notify) -> Result<MessageRef> {
        self.record(SentMessage {
            chat_id,
            html: None,
            media: Some(path.to_path_buf()),
            notify,
        })
        .await
    }

    async fn send_video(&self, chat_id: ChatId, path: &Path, notify: Notify) -> Result<MessageRef> {
        self.record(SentMessage {
            chat_id,
            html: None,
            media: Some(path.to_path_buf()),
            notify,
        })
        .await
    }
}

pub fn test_config(dir: &Path, course_len: u32) -> Config {
    Config {
        bot_token: "test-token".to_string(),
        review_chat_id: ChatId(-100),
        admin_user_ids: vec![42],
        course_len,
        lesson_interval: Duration::from_secs(24 * 3600),
        tick_interval: Duration::from_secs(300),
        data_dir: dir.to_path_buf(),
        snapshot_path: dir.join("lessons.json"),
        progress_path: dir.join("progress.json"),
        assignments_path: dir.join("assignments.json"),
        media_dir: dir.join("content_media"),
        content_source: None,
        download_concurrency: 4,
        download_timeout: Duration::from_secs(5),
    }
}
