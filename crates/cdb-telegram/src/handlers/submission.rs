//! Direct-chat text from an enrolled user is an assignment submission
//! for the most recently delivered lesson.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use cdb_core::{
    assignment::AssignmentStatus,
    domain::{ChatId, UserId},
    messaging::types::Notify,
};

use crate::router::AppState;

pub async fn handle_submission(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let (Some(user), Some(text)) = (msg.from(), msg.text()) else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);

    let Some(enr) = state.progress.get(user_id).await else {
        let _ = state
            .messenger
            .send_html(
                chat_id,
                "You are not enrolled in the course yet. Contact support to get access.",
                Notify::Push,
            )
            .await;
        return Ok(());
    };

    let Some(mark) = enr.last_delivered else {
        let _ = state
            .messenger
            .send_html(
                chat_id,
                "Your first lesson has not arrived yet — there is nothing to submit.",
                Notify::Push,
            )
            .await;
        return Ok(());
    };

    match state.assignments.submit(&enr, mark.day, text).await {
        // Auto-resolved tiers already got their response from the router.
        Ok(a) if a.status == AssignmentStatus::AutoResolved => {}
        // Forward failed; the sweep will route it, don't claim it is
        // with the reviewers yet.
        Ok(a) if a.status == AssignmentStatus::Submitted => {
            tracing::info!(user = user_id.0, assignment = a.id.0, day = a.day, "submission recorded, forward pending");
            let _ = state
                .messenger
                .send_html(
                    chat_id,
                    &format!(
                        "📬 Your Day {} submission is recorded and will reach \
                         the review team shortly.",
                        a.day
                    ),
                    Notify::Push,
                )
                .await;
        }
        Ok(a) => {
            tracing::info!(user = user_id.0, assignment = a.id.0, day = a.day, "submission accepted");
            let _ = state
                .messenger
                .send_html(
                    chat_id,
                    &format!(
                        "📬 Your Day {} submission is with the review team. \
                         You will get feedback here.",
                        a.day
                    ),
                    Notify::Push,
                )
                .await;
        }
        Err(e) => {
            tracing::error!(user = user_id.0, error = %e, "submission failed");
            let _ = state
                .messenger
                .send_html(
                    chat_id,
                    "🚨 Your submission could not be recorded. Please try again.",
                    Notify::Push,
                )
                .await;
        }
    }
    Ok(())
}
