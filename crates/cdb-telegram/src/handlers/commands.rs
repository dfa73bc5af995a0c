use std::sync::Arc;

use chrono::Utc;
use teloxide::{prelude::*, types::Message};

use cdb_core::{
    config::ContentSource,
    domain::{ChatId, UserId},
    formatting::escape_html,
    messaging::types::Notify,
    scheduler::deliver_lesson,
    tariff::Tariff,
    Error,
};

use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);
    let (cmd, args) = parse_command(msg.text().unwrap_or(""));

    match cmd.as_str() {
        "start" | "help" => cmd_start(&state, chat_id, user_id).await,
        "lesson" => cmd_lesson(&state, chat_id, user_id).await,
        "progress" => cmd_progress(&state, chat_id, user_id).await,
        "enroll" => cmd_enroll(&state, chat_id, user_id, &args).await,
        "sync_content" => cmd_sync_content(&state, chat_id, user_id).await,
        _ => {
            let _ = bot
                .send_message(msg.chat.id, "Unknown command. Try /help.")
                .await;
        }
    }
    Ok(())
}

async fn cmd_start(state: &AppState, chat_id: ChatId, user_id: UserId) {
    let status = match state.progress.get(user_id).await {
        Some(enr) if enr.completed(state.progress.course_len()) => {
            "🎉 You have completed the course.".to_string()
        }
        Some(enr) => format!(
            "You are enrolled ({} tariff). Your next lesson arrives automatically.",
            enr.tariff.as_str()
        ),
        None => "You are not enrolled yet. Contact support to get access.".to_string(),
    };

    let text = format!(
        "👋 <b>Welcome!</b>\n\n{status}\n\n\
         /lesson — resend your latest lesson\n\
         /progress — where you are in the course",
    );
    let _ = state.messenger.send_html(chat_id, &text, Notify::Push).await;
}

/// Resend the most recently unlocked lesson. Silent days are available
/// here on request even though they were never pushed.
async fn cmd_lesson(state: &AppState, chat_id: ChatId, user_id: UserId) {
    let Some(enr) = state.progress.get(user_id).await else {
        let _ = state
            .messenger
            .send_html(chat_id, "You are not enrolled yet.", Notify::Push)
            .await;
        return;
    };
    let Some(mark) = enr.last_delivered else {
        let _ = state
            .messenger
            .send_html(
                chat_id,
                "Your first lesson has not been unlocked yet.",
                Notify::Push,
            )
            .await;
        return;
    };

    let snapshot = state.store.snapshot().await;
    let Some(lesson) = snapshot.get(mark.day) else {
        let _ = state
            .messenger
            .send_html(chat_id, "This lesson is temporarily unavailable.", Notify::Push)
            .await;
        return;
    };

    if let Err(e) = deliver_lesson(
        state.messenger.as_ref(),
        &state.cfg.data_dir,
        user_id,
        lesson,
        Notify::Push,
    )
    .await
    {
        tracing::warn!(user = user_id.0, day = mark.day, error = %e, "on-demand lesson send failed");
    }
}

async fn cmd_progress(state: &AppState, chat_id: ChatId, user_id: UserId) {
    let Some(enr) = state.progress.get(user_id).await else {
        let _ = state
            .messenger
            .send_html(chat_id, "You are not enrolled yet.", Notify::Push)
            .await;
        return;
    };

    let total = state.progress.course_len();
    let done = enr.last_delivered.map(|m| m.day).unwrap_or(0);
    let pct = if total > 0 { done * 100 / total } else { 0 };
    let text = format!(
        "📊 <b>Your progress</b>\n\n\
         Day {done} of {total} ({pct}%)\n\
         Tariff: {}",
        enr.tariff.as_str()
    );
    let _ = state.messenger.send_html(chat_id, &text, Notify::Push).await;
}

/// Administrative enrollment: `/enroll <user_id> <tariff>`. Stands in
/// for the payment-flow grant, which is out of scope for this bot.
async fn cmd_enroll(state: &AppState, chat_id: ChatId, admin: UserId, args: &str) {
    if !state.cfg.is_admin(admin.0) {
        let _ = state
            .messenger
            .send_html(chat_id, "This command is admin-only.", Notify::Push)
            .await;
        return;
    }

    let mut parts = args.split_whitespace();
    let target = parts.next().and_then(|s| s.parse::<i64>().ok());
    let tariff = parts.next().and_then(Tariff::parse);
    let (Some(target), Some(tariff)) = (target, tariff) else {
        let _ = state
            .messenger
            .send_html(
                chat_id,
                "Usage: /enroll &lt;user_id&gt; &lt;basic|feedback|premium|practic&gt;",
                Notify::Push,
            )
            .await;
        return;
    };

    match state
        .progress
        .enroll(UserId(target), None, tariff, Utc::now())
        .await
    {
        Ok(enr) => {
            tracing::info!(user = target, tariff = tariff.as_str(), "user enrolled");
            let _ = state
                .messenger
                .send_html(
                    chat_id,
                    &format!(
                        "✅ User <code>{target}</code> enrolled on <b>{}</b> (day {}).",
                        tariff.as_str(),
                        enr.current_day
                    ),
                    Notify::Push,
                )
                .await;
        }
        Err(e) => {
            tracing::error!(user = target, error = %e, "enrollment failed");
            let _ = state
                .messenger
                .send_html(chat_id, &format!("🚨 Enrollment failed: {e}"), Notify::Push)
                .await;
        }
    }
}

/// Admin-only content sync trigger. Replies with the run summary; a
/// concurrent run is reported, not queued.
async fn cmd_sync_content(state: &AppState, chat_id: ChatId, admin: UserId) {
    if !state.cfg.is_admin(admin.0) {
        let _ = state
            .messenger
            .send_html(chat_id, "This command is admin-only.", Notify::Push)
            .await;
        return;
    }

    let Some(source) = &state.cfg.content_source else {
        let _ = state
            .messenger
            .send_html(
                chat_id,
                "No content source configured (CONTENT_ROOT_DIR or CONTENT_MASTER_DOC).",
                Notify::Push,
            )
            .await;
        return;
    };

    let label = match source {
        ContentSource::DayFolders(p) | ContentSource::MasterDocument(p) => p.display().to_string(),
    };
    let _ = state
        .messenger
        .send_html(
            chat_id,
            &format!("⏳ Syncing content from <code>{}</code>…", escape_html(&label)),
            Notify::Push,
        )
        .await;

    let reply = match state.sync.sync(source).await {
        Ok(result) => result.summary_html(),
        Err(Error::AlreadyRunning) => "⚠️ A sync is already in progress.".to_string(),
        Err(e) => {
            tracing::error!(error = %e, "content sync failed");
            format!("🚨 Sync failed: {}", escape_html(&e.to_string()))
        }
    };
    let _ = state.messenger.send_html(chat_id, &reply, Notify::Push).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_bot_suffix_and_args() {
        assert_eq!(
            parse_command("/enroll@course_bot 42 premium"),
            ("enroll".to_string(), "42 premium".to_string())
        );
        assert_eq!(parse_command("/Lesson"), ("lesson".to_string(), String::new()));
        assert_eq!(
            parse_command("/sync_content"),
            ("sync_content".to_string(), String::new())
        );
    }
}
