use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;

use cdb_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use cdb_core::{
    assignment::AssignmentRouter, config::Config, messaging::port::MessagingPort,
    progress::ProgressStore, scheduler::LessonScheduler, store::LessonStore,
    sync::ContentSyncEngine,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<LessonStore>,
    pub progress: Arc<ProgressStore>,
    pub scheduler: LessonScheduler,
    pub sync: Arc<ContentSyncEngine>,
    pub assignments: Arc<AssignmentRouter>,
    pub messenger: Arc<dyn MessagingPort>,
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        tracing::info!(bot = me.username(), "course bot started");
    }

    // Throttle outbound sends: a tick can fan lessons out to many chats
    // at once. A 429 RetryAfter retry still sits in the adapter itself.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let store = Arc::new(LessonStore::open(cfg.snapshot_path.clone())?);
    let progress = Arc::new(ProgressStore::open(
        cfg.progress_path.clone(),
        cfg.course_len,
    )?);
    let assignments = Arc::new(AssignmentRouter::open(
        cfg.assignments_path.clone(),
        cfg.review_chat_id,
        messenger.clone(),
    )?);
    let sync = Arc::new(ContentSyncEngine::new(
        store.clone(),
        cfg.data_dir.clone(),
        cfg.media_dir.clone(),
        cfg.download_concurrency,
        cfg.download_timeout,
    ));

    let scheduler = LessonScheduler::new(
        cfg.clone(),
        store.clone(),
        progress.clone(),
        messenger.clone(),
    );
    let cancel = CancellationToken::new();
    let scheduler_task = scheduler.start(cancel.clone());

    // Submissions whose forward failed (review-chat outage, restart) are
    // retried on a timer until they route.
    let sweep_task = assignments.start_pending_sweep(cfg.tick_interval, cancel.clone());

    let state = Arc::new(AppState {
        cfg,
        store,
        progress,
        scheduler,
        sync,
        assignments,
        messenger,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    cancel.cancel();
    let _ = scheduler_task.await;
    let _ = sweep_task.await;

    Ok(())
}
