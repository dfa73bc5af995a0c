//! Lesson store: an immutable, fully-assembled snapshot of the course
//! catalog, keyed by day number.
//!
//! The sync engine produces whole snapshots; readers borrow the current
//! `Arc<Snapshot>` for the duration of one operation, so a concurrent
//! sync can never mutate content mid-delivery. Replacement is a pointer
//! swap.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Reference to a downloaded media file, path relative to the data dir.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub path: PathBuf,
    pub kind: MediaKind,
}

/// One published lesson. Immutable once part of a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub day: u32,
    pub title: String,
    /// Sanitized HTML subset, safe to send as-is.
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<String>,
    /// Unlock without a push notification.
    #[serde(default)]
    pub silent: bool,
}

/// One immutable version of the lesson catalog.
///
/// A `BTreeMap` keeps serialization order stable, so syncing identical
/// source content twice produces byte-identical snapshot files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub lessons: BTreeMap<u32, Lesson>,
}

impl Snapshot {
    pub fn get(&self, day: u32) -> Option<&Lesson> {
        self.lessons.get(&day)
    }

    /// Highest published day number; day gaps are tolerated.
    pub fn max_day(&self) -> u32 {
        self.lessons.keys().next_back().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Shared handle to the active snapshot.
pub struct LessonStore {
    path: PathBuf,
    current: RwLock<Arc<Snapshot>>,
}

impl LessonStore {
    /// Open the store, loading the snapshot file if it exists. A missing
    /// file is an empty catalog, not an error (first run before any sync).
    pub fn open(path: PathBuf) -> Result<Self> {
        let snapshot = match std::fs::read_to_string(&path) {
            Ok(txt) => serde_json::from_str::<Snapshot>(&txt)
                .map_err(|e| Error::Validation(format!("snapshot {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };

        if !snapshot.is_empty() {
            tracing::info!(lessons = snapshot.len(), path = %path.display(), "lesson snapshot loaded");
        }

        Ok(Self {
            path,
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Borrow the active snapshot for one operation.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().await.clone()
    }

    /// Swap in a freshly synced snapshot ("lessons changed" notification).
    pub async fn replace(&self, snapshot: Snapshot) {
        let mut cur = self.current.write().await;
        *cur = Arc::new(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(day: u32) -> Lesson {
        Lesson {
            day,
            title: format!("Day {day}"),
            body: "body".to_string(),
            media: Vec::new(),
            assignment: None,
            silent: false,
        }
    }

    #[test]
    fn snapshot_serialization_is_stable() {
        let mut snap = Snapshot::default();
        snap.lessons.insert(3, lesson(3));
        snap.lessons.insert(1, lesson(1));

        let a = snap.to_json().unwrap();
        let b = snap.to_json().unwrap();
        assert_eq!(a, b);

        let back: Snapshot = serde_json::from_str(&a).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn max_day_tolerates_gaps() {
        let mut snap = Snapshot::default();
        snap.lessons.insert(1, lesson(1));
        snap.lessons.insert(5, lesson(5));
        assert_eq!(snap.max_day(), 5);
        assert!(snap.get(3).is_none());
    }

    #[tokio::test]
    async fn replace_is_a_pointer_swap() {
        let dir = tempfile::tempdir().unwrap();
        let store = LessonStore::open(dir.path().join("lessons.json")).unwrap();

        let before = store.snapshot().await;
        assert!(before.is_empty());

        let mut snap = Snapshot::default();
        snap.lessons.insert(1, lesson(1));
        store.replace(snap).await;

        // The borrowed snapshot is unaffected by the swap.
        assert!(before.is_empty());
        assert_eq!(store.snapshot().await.len(), 1);
    }

    #[test]
    fn open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LessonStore::open(dir.path().join("nope.json")).unwrap();
        assert_eq!(store.path().file_name().unwrap(), "nope.json");
    }
}
