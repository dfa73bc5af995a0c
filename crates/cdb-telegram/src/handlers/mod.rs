//! Telegram update handlers.
//!
//! One entry point dispatches on where the message came from:
//! review-chat replies resolve assignments, slash commands go to the
//! command table, and any other text from a direct chat is treated as
//! an assignment submission.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use crate::router::AppState;

mod commands;
mod review;
mod submission;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if msg.chat.id.0 == state.cfg.review_chat_id.0 {
        return review::handle_review_message(msg, state).await;
    }

    let Some(text) = msg.text() else {
        // Media submissions are not accepted; keep the reply short.
        let _ = bot
            .send_message(msg.chat.id, "Please send assignments as text.")
            .await;
        return Ok(());
    };

    if text.starts_with('/') {
        return commands::handle_command(bot, msg, state).await;
    }

    submission::handle_submission(msg, state).await
}
