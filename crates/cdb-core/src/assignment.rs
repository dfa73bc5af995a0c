//! Assignment submission and correlation routing.
//!
//! A submission always creates a local record first. Reviewable tiers
//! get their submission forwarded to the review chat with an embedded
//! correlation token; a reviewer reply is traced back through that
//! token (or the forwarded-message reference) and resolved exactly
//! once. Records are never deleted — the store is the audit trail.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{AssignmentId, ChatId, CorrelationToken, MessageRef, UserId},
    formatting::{auto_response_html, extract_token, render_feedback_html, render_submission_html},
    messaging::{port::MessagingPort, types::Notify},
    progress::Enrollment,
    Error, Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Created locally; forward to the review chat has not succeeded yet.
    Submitted,
    /// Forwarded to the review chat, awaiting a reviewer reply.
    Routed,
    /// Reviewer feedback recorded and delivered.
    Resolved,
    /// Closed at submission time for tiers without review.
    AutoResolved,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub day: u32,
    pub text: String,
    pub token: CorrelationToken,
    pub status: AssignmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Review-chat message the submission was forwarded as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<MessageRef>,
}

/// What the adapter knows about a reviewer reply: which message it
/// replies to and that message's visible text. The router depends only
/// on this, not on any platform's reply semantics.
#[derive(Clone, Debug, Default)]
pub struct ReplyContext {
    pub reply_to: Option<MessageRef>,
    pub reply_text: Option<String>,
}

#[derive(Default, Serialize, Deserialize)]
struct RouterState {
    next_id: u64,
    records: BTreeMap<AssignmentId, Assignment>,
    /// Correlation table: forwarded-message identity -> assignment.
    /// Rebuilt from `records` on load.
    #[serde(skip)]
    by_forward: HashMap<MessageRef, AssignmentId>,
    #[serde(skip)]
    by_token: HashMap<String, AssignmentId>,
}

impl RouterState {
    fn reindex(&mut self) {
        self.by_forward.clear();
        self.by_token.clear();
        for (id, a) in &self.records {
            if let Some(fwd) = a.forward {
                self.by_forward.insert(fwd, *id);
            }
            self.by_token.insert(a.token.0.clone(), *id);
        }
    }
}

pub struct AssignmentRouter {
    path: PathBuf,
    review_chat: ChatId,
    messenger: Arc<dyn MessagingPort>,
    state: Mutex<RouterState>,
}

impl AssignmentRouter {
    pub fn open(
        path: PathBuf,
        review_chat: ChatId,
        messenger: Arc<dyn MessagingPort>,
    ) -> Result<Self> {
        let mut state: RouterState = match std::fs::read_to_string(&path) {
            Ok(txt) => serde_json::from_str(&txt)
                .map_err(|e| Error::Validation(format!("assignments {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RouterState::default(),
            Err(e) => return Err(e.into()),
        };
        state.reindex();

        Ok(Self {
            path,
            review_chat,
            messenger,
            state: Mutex::new(state),
        })
    }

    /// Submit an assignment. Always succeeds locally; the routing
    /// decision is keyed by the submitter's tariff.
    ///
    /// - No review entitlement: auto-resolve with the fixed response,
    ///   delivered synchronously; nothing is forwarded.
    /// - Review entitlement: forward with the embedded token. If the
    ///   forward fails the record stays `Submitted` and is retried by
    ///   `route_pending`, never silently lost.
    pub async fn submit(&self, enr: &Enrollment, day: u32, text: &str) -> Result<Assignment> {
        let now = Utc::now();
        let review = enr.tariff.policy().review_entitled;

        let assignment = {
            let mut st = self.state.lock().await;
            st.next_id += 1;
            let id = AssignmentId(st.next_id);
            let token = CorrelationToken::generate();
            let a = Assignment {
                id,
                user_id: enr.user_id,
                username: enr.username.clone(),
                day,
                text: text.to_string(),
                token: token.clone(),
                status: if review {
                    AssignmentStatus::Submitted
                } else {
                    AssignmentStatus::AutoResolved
                },
                feedback: (!review).then(|| auto_response_html(day)),
                submitted_at: now,
                resolved_at: (!review).then_some(now),
                forward: None,
            };
            st.by_token.insert(token.0, id);
            st.records.insert(id, a.clone());
            self.persist(&st)?;
            a
        };

        if !review {
            // Fixed auto-response, delivered synchronously; best-effort.
            let chat = ChatId::from(enr.user_id);
            if let Err(e) = self
                .messenger
                .send_html(chat, &auto_response_html(day), Notify::Push)
                .await
            {
                tracing::warn!(user = enr.user_id.0, error = %e, "auto-response send failed");
            }
            return Ok(assignment);
        }

        match self.forward(&assignment).await {
            Ok(a) => Ok(a),
            Err(e) => {
                tracing::warn!(
                    assignment = assignment.id.0,
                    error = %e,
                    "submission forward failed, will retry"
                );
                Ok(assignment)
            }
        }
    }

    /// Forward one record to the review chat and mark it `Routed`. The
    /// forward-ref/token mapping is recorded under the same lock that
    /// mutates the record.
    async fn forward(&self, a: &Assignment) -> Result<Assignment> {
        let html =
            render_submission_html(a.user_id, a.username.as_deref(), a.day, &a.text, &a.token);
        let fwd = self
            .messenger
            .send_html(self.review_chat, &html, Notify::Push)
            .await?;

        let mut st = self.state.lock().await;
        let rec = st.records.get_mut(&a.id).ok_or(Error::NotFound)?;
        rec.status = AssignmentStatus::Routed;
        rec.forward = Some(fwd);
        let updated = rec.clone();
        st.by_forward.insert(fwd, a.id);
        self.persist(&st)?;
        Ok(updated)
    }

    /// Run `route_pending` on a timer so a review-chat outage heals
    /// itself: the first tick fires immediately (covering submissions
    /// stuck from before a restart), then every `interval`. Cancel the
    /// token to stop.
    pub fn start_pending_sweep(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        match router.route_pending().await {
                            Ok(0) => {}
                            Ok(n) => tracing::info!(routed = n, "re-routed pending submissions"),
                            Err(e) => tracing::warn!(error = %e, "pending submission sweep failed"),
                        }
                    }
                }
            }
        })
    }

    /// Retry forwarding for records whose initial forward failed.
    pub async fn route_pending(&self) -> Result<usize> {
        let pending: Vec<Assignment> = {
            let st = self.state.lock().await;
            st.records
                .values()
                .filter(|a| a.status == AssignmentStatus::Submitted)
                .cloned()
                .collect()
        };

        let mut routed = 0usize;
        for a in pending {
            match self.forward(&a).await {
                Ok(_) => routed += 1,
                Err(e) => {
                    tracing::warn!(assignment = a.id.0, error = %e, "forward retry failed")
                }
            }
        }
        Ok(routed)
    }

    /// Resolve a reviewer reply: trace the token back to the assignment,
    /// deliver the feedback to the originating user, and consume the
    /// token. Exactly one concurrent `resolve` can win; the loser
    /// observes `AlreadyResolved`.
    pub async fn resolve(&self, reply: &ReplyContext, feedback: &str) -> Result<()> {
        // Claim the record under the lock, then send outside it so a slow
        // (throttled) delivery never blocks other submits and resolves.
        // A concurrent resolve for the same record sees Resolved already.
        let (id, user_chat, day, prev_status) = {
            let mut st = self.state.lock().await;

            let id = lookup(&st, reply).ok_or(Error::NotFound)?;
            let rec = st.records.get_mut(&id).ok_or(Error::NotFound)?;
            let prev = rec.status;
            match prev {
                AssignmentStatus::Resolved | AssignmentStatus::AutoResolved => {
                    return Err(Error::AlreadyResolved)
                }
                AssignmentStatus::Submitted | AssignmentStatus::Routed => {}
            }

            rec.status = AssignmentStatus::Resolved;
            rec.feedback = Some(feedback.to_string());
            rec.resolved_at = Some(Utc::now());
            let claimed = (id, ChatId::from(rec.user_id), rec.day, prev);
            self.persist(&st)?;
            claimed
        };

        match self
            .messenger
            .send_html(user_chat, &render_feedback_html(day, feedback), Notify::Push)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                // Undo the claim so the reviewer can retry; a swallowed
                // failure here would be lost feedback.
                let mut st = self.state.lock().await;
                if let Some(rec) = st.records.get_mut(&id) {
                    rec.status = prev_status;
                    rec.feedback = None;
                    rec.resolved_at = None;
                }
                self.persist(&st)?;
                Err(Error::Transient(format!("feedback delivery: {e}")))
            }
        }
    }

    pub async fn get(&self, id: AssignmentId) -> Option<Assignment> {
        self.state.lock().await.records.get(&id).cloned()
    }

    fn persist(&self, st: &RouterState) -> Result<()> {
        let txt = serde_json::to_string_pretty(st)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, txt)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Map a reply back to an assignment: forwarded-message identity first,
/// embedded token in the replied text as the restart-safe fallback.
fn lookup(st: &RouterState, reply: &ReplyContext) -> Option<AssignmentId> {
    if let Some(fwd) = reply.reply_to {
        if let Some(id) = st.by_forward.get(&fwd) {
            return Some(*id);
        }
    }
    let text = reply.reply_text.as_deref()?;
    let token = extract_token(text)?;
    st.by_token.get(&token.0).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tariff::Tariff;
    use crate::testutil::RecordingMessenger;
    use chrono::TimeZone;

    const REVIEW_CHAT: ChatId = ChatId(-100);

    fn enrollment(user: i64, tariff: Tariff) -> Enrollment {
        Enrollment {
            user_id: UserId(user),
            username: Some("student".to_string()),
            tariff,
            started_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            current_day: 3,
            last_delivered: None,
        }
    }

    fn router(
        dir: &tempfile::TempDir,
        messenger: Arc<RecordingMessenger>,
    ) -> AssignmentRouter {
        AssignmentRouter::open(dir.path().join("assignments.json"), REVIEW_CHAT, messenger)
            .unwrap()
    }

    #[tokio::test]
    async fn basic_tier_auto_resolves_without_forward() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let router = router(&dir, messenger.clone());

        let a = router
            .submit(&enrollment(1, Tariff::Basic), 3, "my work")
            .await
            .unwrap();
        assert_eq!(a.status, AssignmentStatus::AutoResolved);

        let sent = messenger.sent().await;
        assert_eq!(sent.len(), 1);
        // The one message is the auto-response to the user, not a forward.
        assert_eq!(sent[0].chat_id, ChatId(1));
    }

    #[tokio::test]
    async fn reviewable_tier_routes_with_embedded_token() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let router = router(&dir, messenger.clone());

        let a = router
            .submit(&enrollment(1, Tariff::Feedback), 3, "my work")
            .await
            .unwrap();
        assert_eq!(a.status, AssignmentStatus::Routed);
        assert!(a.forward.is_some());

        let sent = messenger.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, REVIEW_CHAT);
        let html = sent[0].html.as_deref().unwrap();
        assert_eq!(extract_token(html), Some(a.token));
    }

    #[tokio::test]
    async fn resolve_delivers_feedback_verbatim_then_rejects_second() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let router = router(&dir, messenger.clone());

        let a = router
            .submit(&enrollment(5, Tariff::Premium), 2, "answer")
            .await
            .unwrap();

        let reply = ReplyContext {
            reply_to: a.forward,
            reply_text: None,
        };
        router.resolve(&reply, "great work & keep going").await.unwrap();

        let sent = messenger.sent().await;
        let feedback = sent.last().unwrap();
        assert_eq!(feedback.chat_id, ChatId(5));
        assert!(feedback
            .html
            .as_deref()
            .unwrap()
            .contains("great work &amp; keep going"));

        // Token consumed: a second reply must not deliver twice.
        let before = messenger.sent().await.len();
        let err = router.resolve(&reply, "again").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyResolved));
        assert_eq!(messenger.sent().await.len(), before);
    }

    #[tokio::test]
    async fn resolve_by_embedded_token_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let a = {
            let router = router(&dir, messenger.clone());
            router
                .submit(&enrollment(9, Tariff::Feedback), 1, "w")
                .await
                .unwrap()
        };

        // Reopen: the forward map is rebuilt from the persisted records,
        // and even an unknown MessageRef falls back to the token text.
        let router = router(&dir, messenger.clone());
        let forwarded_text = format!("submission...\ntoken: {}\nreply to review", a.token);
        let reply = ReplyContext {
            reply_to: None,
            reply_text: Some(forwarded_text),
        };
        router.resolve(&reply, "ok").await.unwrap();

        let again = router.resolve(&reply, "ok").await.unwrap_err();
        assert!(matches!(again, Error::AlreadyResolved));
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let router = router(&dir, messenger);

        let reply = ReplyContext {
            reply_to: None,
            reply_text: Some("token: deadbeef".to_string()),
        };
        let err = router.resolve(&reply, "x").await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn failed_feedback_delivery_releases_the_record_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let router = router(&dir, messenger.clone());

        let a = router
            .submit(&enrollment(5, Tariff::Premium), 2, "answer")
            .await
            .unwrap();
        let reply = ReplyContext {
            reply_to: a.forward,
            reply_text: None,
        };

        // The user's chat is down: resolution must surface the failure
        // and leave the record resolvable, not consume the token.
        messenger.fail_chat(ChatId(5)).await;
        let err = router.resolve(&reply, "feedback").await.unwrap_err();
        assert!(matches!(err, Error::Transient(_)));

        let rec = router.get(a.id).await.unwrap();
        assert_eq!(rec.status, AssignmentStatus::Routed);
        assert!(rec.feedback.is_none());

        messenger.unfail_chat(ChatId(5)).await;
        router.resolve(&reply, "feedback").await.unwrap();
        assert_eq!(
            router.get(a.id).await.unwrap().status,
            AssignmentStatus::Resolved
        );
    }

    #[tokio::test]
    async fn pending_sweep_routes_once_the_review_chat_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        messenger.fail_chat(REVIEW_CHAT).await;
        let router = Arc::new(router(&dir, messenger.clone()));

        let a = router
            .submit(&enrollment(1, Tariff::Feedback), 1, "w")
            .await
            .unwrap();
        assert_eq!(a.status, AssignmentStatus::Submitted);

        messenger.unfail_chat(REVIEW_CHAT).await;
        let cancel = CancellationToken::new();
        let task = router.start_pending_sweep(Duration::from_millis(10), cancel.clone());

        // The sweep ticks on its own; no manual route_pending call.
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            if router.get(a.id).await.unwrap().status == AssignmentStatus::Routed {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "sweep never routed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn failed_forward_is_retryable_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        messenger.fail_chat(REVIEW_CHAT).await;
        let router = router(&dir, messenger.clone());

        let a = router
            .submit(&enrollment(1, Tariff::Feedback), 1, "w")
            .await
            .unwrap();
        assert_eq!(a.status, AssignmentStatus::Submitted);

        // Review chat comes back; the sweep forwards the stuck record.
        let messenger2 = Arc::new(RecordingMessenger::default());
        let router = AssignmentRouter::open(
            dir.path().join("assignments.json"),
            REVIEW_CHAT,
            messenger2.clone(),
        )
        .unwrap();
        assert_eq!(router.route_pending().await.unwrap(), 1);
        assert_eq!(
            router.get(a.id).await.unwrap().status,
            AssignmentStatus::Routed
        );
    }
}
