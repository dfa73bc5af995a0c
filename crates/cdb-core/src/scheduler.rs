//! Lesson delivery scheduler.
//!
//! A recurring tick enumerates every enrolled, non-completed user and
//! decides whether their next lesson is due. Eligibility is computed
//! from the enrollment start time plus an explicit last-delivered
//! marker, never from "did the previous tick fire", so a restart or a
//! late tick correctly drains a backlog — at most one lesson per user
//! per tick, so a long outage never floods anyone.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    domain::{ChatId, MessageRef, UserId},
    formatting::render_lesson_html,
    messaging::{port::MessagingPort, types::Notify},
    progress::{Enrollment, ProgressStore},
    store::{Lesson, LessonStore, MediaKind},
    Error, Result,
};

/// Cap on media attachments sent per lesson.
const MAX_MEDIA_PER_LESSON: usize = 5;

/// Which day (if any) is due for delivery right now.
///
/// Day N is due iff `now >= started_at + (N-1) * interval` and the
/// last-delivered marker has not reached N yet. Day 1 has a zero offset:
/// due at the enrollment instant.
pub fn due_day(
    enr: &Enrollment,
    now: DateTime<Utc>,
    interval: std::time::Duration,
    course_len: u32,
) -> Option<u32> {
    let day = enr.current_day;
    if day == 0 || day > course_len {
        return None;
    }
    // The marker, not wall-clock arithmetic, is what prevents a late or
    // repeated tick from double-firing.
    if enr.last_delivered.map(|m| m.day >= day).unwrap_or(false) {
        return None;
    }

    let offset = ChronoDuration::from_std(interval).ok()? * (day as i32 - 1);
    let due_at = enr.started_at + offset;
    (now >= due_at).then_some(day)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct LessonScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    cfg: Arc<Config>,
    store: Arc<LessonStore>,
    progress: Arc<ProgressStore>,
    messenger: Arc<dyn MessagingPort>,
    tick_running: AtomicBool,
}

impl LessonScheduler {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<LessonStore>,
        progress: Arc<ProgressStore>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                cfg,
                store,
                progress,
                messenger,
                tick_running: AtomicBool::new(false),
            }),
        }
    }

    /// Start the recurring tick loop. Returns the task handle; cancel
    /// the token to stop.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(scheduler.inner.cfg.tick_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let report = scheduler.tick(Utc::now()).await;
                        if report.delivered > 0 || report.failed > 0 {
                            tracing::info!(
                                delivered = report.delivered,
                                failed = report.failed,
                                skipped = report.skipped,
                                "scheduler tick"
                            );
                        }
                    }
                }
            }
        })
    }

    /// Run one tick at `now`. If a previous tick is still in flight the
    /// whole tick is skipped — two ticks never interleave work for the
    /// same user.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        if self
            .inner
            .tick_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("previous tick still running, skipping");
            return TickReport::default();
        }

        let report = self.tick_inner(now).await;
        self.inner.tick_running.store(false, Ordering::SeqCst);
        report
    }

    async fn tick_inner(&self, now: DateTime<Utc>) -> TickReport {
        let snapshot = self.inner.store.snapshot().await;
        let course_len = self.inner.cfg.course_len;
        let interval = self.inner.cfg.lesson_interval;

        let mut report = TickReport::default();

        for enr in self.inner.progress.active().await {
            let Some(day) = due_day(&enr, now, interval, course_len) else {
                report.skipped += 1;
                continue;
            };

            let Some(lesson) = snapshot.get(day) else {
                // Content for this day has not been synced yet; retry on a
                // later tick without advancing the pointer.
                tracing::warn!(user = enr.user_id.0, day, "due lesson missing from snapshot");
                report.skipped += 1;
                continue;
            };

            // One user's failure must not abort the others.
            match self.deliver_and_record(&enr, lesson, now).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(user = enr.user_id.0, day, error = %e, "lesson delivery failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Deliver one lesson and advance progress as a single atomic step.
    /// The progress update happens only after the send is confirmed.
    async fn deliver_and_record(
        &self,
        enr: &Enrollment,
        lesson: &Lesson,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let notify = if lesson.silent {
            Notify::Silent
        } else {
            Notify::Push
        };

        // Snapshot media paths are relative to the data dir.
        deliver_lesson(
            self.inner.messenger.as_ref(),
            &self.inner.cfg.data_dir,
            enr.user_id,
            lesson,
            notify,
        )
        .await?;

        self.inner
            .progress
            .record_delivery(enr.user_id, lesson.day, now)
            .await
    }
}

/// Send a rendered lesson (text + up to a few media attachments) to a
/// user. Shared between the scheduler and the on-demand `/lesson` path.
pub async fn deliver_lesson(
    messenger: &dyn MessagingPort,
    media_root: &Path,
    user_id: UserId,
    lesson: &Lesson,
    notify: Notify,
) -> Result<MessageRef> {
    let chat = ChatId::from(user_id);
    let sent = messenger
        .send_html(chat, &render_lesson_html(lesson), notify)
        .await
        .map_err(|e| Error::Transient(format!("lesson send: {e}")))?;

    for media in lesson.media.iter().take(MAX_MEDIA_PER_LESSON) {
        let path = media_root.join(&media.path);
        let res = match media.kind {
            MediaKind::Image => messenger.send_photo(chat, &path, notify).await,
            MediaKind::Video => messenger.send_video(chat, &path, notify).await,
        };
        if let Err(e) = res {
            // Media is best-effort once the text is out.
            tracing::warn!(user = user_id.0, day = lesson.day, path = %path.display(), error = %e,
                "lesson media send failed");
        }
    }

    Ok(sent)
}
