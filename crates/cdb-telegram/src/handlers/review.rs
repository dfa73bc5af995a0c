//! Review-chat side of the assignment loop: a reviewer replies to a
//! forwarded submission, and the reply text becomes the feedback.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use cdb_core::{
    assignment::ReplyContext,
    domain::{ChatId, MessageId, MessageRef},
    formatting::extract_token,
    messaging::types::Notify,
    Error,
};

use crate::router::AppState;

pub async fn handle_review_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let (Some(replied), Some(feedback)) = (msg.reply_to_message(), msg.text()) else {
        // Ordinary chatter in the review chat.
        return Ok(());
    };

    let reply_text = replied.text().map(str::to_string);
    let looks_like_submission = reply_text
        .as_deref()
        .and_then(extract_token)
        .is_some();

    let reply = ReplyContext {
        reply_to: Some(MessageRef {
            chat_id: ChatId(replied.chat.id.0),
            message_id: MessageId(replied.id.0),
        }),
        reply_text,
    };

    let outcome = state.assignments.resolve(&reply, feedback).await;
    let notice = match outcome {
        Ok(()) => "✅ Feedback delivered.".to_string(),
        // Replies to non-submission messages are not errors.
        Err(Error::NotFound) if !looks_like_submission => return Ok(()),
        Err(Error::NotFound) => "⚠️ Unknown submission token.".to_string(),
        Err(Error::AlreadyResolved) => "⚠️ This submission was already resolved.".to_string(),
        Err(e) => {
            tracing::error!(error = %e, "assignment resolution failed");
            format!("🚨 Feedback could not be delivered: {e}")
        }
    };

    let _ = state
        .messenger
        .send_html(state.cfg.review_chat_id, &notice, Notify::Push)
        .await;
    Ok(())
}
