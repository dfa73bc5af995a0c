//! Per-user course progress, durably stored.
//!
//! The whole store is a JSON map on disk; every mutation goes through
//! one mutex-serialized read-modify-write that persists with a
//! write-to-temp-then-rename, so a record update is atomic both in
//! memory and on disk.

use std::{collections::BTreeMap, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{domain::UserId, tariff::Tariff, Error, Result};

/// Set only after a delivery is confirmed sent, never before.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMark {
    pub day: u32,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub tariff: Tariff,
    pub started_at: DateTime<Utc>,
    /// Next undelivered day, 1-based, monotonically non-decreasing.
    /// Never exceeds course length + 1.
    pub current_day: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivered: Option<DeliveryMark>,
}

impl Enrollment {
    pub fn completed(&self, course_len: u32) -> bool {
        self.current_day > course_len
    }
}

pub struct ProgressStore {
    path: PathBuf,
    course_len: u32,
    state: Mutex<BTreeMap<UserId, Enrollment>>,
}

impl ProgressStore {
    pub fn open(path: PathBuf, course_len: u32) -> Result<Self> {
        let state = match std::fs::read_to_string(&path) {
            Ok(txt) => serde_json::from_str(&txt)
                .map_err(|e| Error::Validation(format!("progress {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            course_len,
            state: Mutex::new(state),
        })
    }

    pub fn course_len(&self) -> u32 {
        self.course_len
    }

    /// Enroll a user at `now` with day pointer 1 (day 1 is due at the
    /// enrollment instant). Re-enrolling an already enrolled user only
    /// refreshes the tariff; progress is kept.
    pub async fn enroll(
        &self,
        user_id: UserId,
        username: Option<String>,
        tariff: Tariff,
        now: DateTime<Utc>,
    ) -> Result<Enrollment> {
        let mut st = self.state.lock().await;

        let enr = st
            .entry(user_id)
            .and_modify(|e| {
                e.tariff = tariff;
                if username.is_some() {
                    e.username = username.clone();
                }
            })
            .or_insert_with(|| Enrollment {
                user_id,
                username,
                tariff,
                started_at: now,
                current_day: 1,
                last_delivered: None,
            })
            .clone();

        self.persist(&st)?;
        Ok(enr)
    }

    pub async fn get(&self, user_id: UserId) -> Option<Enrollment> {
        self.state.lock().await.get(&user_id).cloned()
    }

    /// Enrolled users who have not completed the course.
    pub async fn active(&self) -> Vec<Enrollment> {
        let st = self.state.lock().await;
        st.values()
            .filter(|e| !e.completed(self.course_len))
            .cloned()
            .collect()
    }

    /// Record a confirmed delivery of `day` and advance the pointer, as
    /// one atomic step. Idempotent: recording a day at or below the
    /// current mark is a no-op, so a racing tick cannot double-advance.
    pub async fn record_delivery(
        &self,
        user_id: UserId,
        day: u32,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut st = self.state.lock().await;
        let enr = st.get_mut(&user_id).ok_or(Error::NotFound)?;

        if enr.last_delivered.map(|m| m.day >= day).unwrap_or(false) {
            return Ok(());
        }

        enr.last_delivered = Some(DeliveryMark { day, at });
        enr.current_day = (day + 1).min(self.course_len + 1);
        self.persist(&st)
    }

    fn persist(&self, st: &BTreeMap<UserId, Enrollment>) -> Result<()> {
        let txt = serde_json::to_string_pretty(st)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, txt)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    async fn store(course_len: u32) -> (tempfile::TempDir, ProgressStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(dir.path().join("progress.json"), course_len).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn enroll_starts_at_day_one() {
        let (_dir, store) = store(30).await;
        let enr = store
            .enroll(UserId(1), None, Tariff::Basic, now())
            .await
            .unwrap();
        assert_eq!(enr.current_day, 1);
        assert!(enr.last_delivered.is_none());
    }

    #[tokio::test]
    async fn re_enroll_keeps_progress() {
        let (_dir, store) = store(30).await;
        store
            .enroll(UserId(1), None, Tariff::Basic, now())
            .await
            .unwrap();
        store.record_delivery(UserId(1), 1, now()).await.unwrap();

        let enr = store
            .enroll(UserId(1), None, Tariff::Premium, now())
            .await
            .unwrap();
        assert_eq!(enr.current_day, 2);
        assert_eq!(enr.tariff, Tariff::Premium);
    }

    #[tokio::test]
    async fn record_delivery_is_idempotent() {
        let (_dir, store) = store(30).await;
        store
            .enroll(UserId(1), None, Tariff::Basic, now())
            .await
            .unwrap();

        store.record_delivery(UserId(1), 1, now()).await.unwrap();
        store.record_delivery(UserId(1), 1, now()).await.unwrap();

        let enr = store.get(UserId(1)).await.unwrap();
        assert_eq!(enr.current_day, 2);
        assert_eq!(enr.last_delivered.unwrap().day, 1);
    }

    #[tokio::test]
    async fn pointer_never_exceeds_course_len_plus_one() {
        let (_dir, store) = store(2).await;
        store
            .enroll(UserId(1), None, Tariff::Basic, now())
            .await
            .unwrap();

        store.record_delivery(UserId(1), 1, now()).await.unwrap();
        store.record_delivery(UserId(1), 2, now()).await.unwrap();

        let enr = store.get(UserId(1)).await.unwrap();
        assert_eq!(enr.current_day, 3);
        assert!(enr.completed(2));
        assert!(store.active().await.is_empty());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        {
            let store = ProgressStore::open(path.clone(), 30).unwrap();
            store
                .enroll(UserId(7), Some("alice".into()), Tariff::Feedback, now())
                .await
                .unwrap();
            store.record_delivery(UserId(7), 1, now()).await.unwrap();
        }

        let store = ProgressStore::open(path, 30).unwrap();
        let enr = store.get(UserId(7)).await.unwrap();
        assert_eq!(enr.current_day, 2);
        assert_eq!(enr.username.as_deref(), Some("alice"));
    }
}
