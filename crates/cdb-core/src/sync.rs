//! Content sync engine: assembles a fresh lesson snapshot from an
//! external source, downloads referenced media, and atomically replaces
//! the active catalog.
//!
//! Sync runs on explicit trigger only and never overlaps with itself.
//! Per-day and per-media problems degrade to warnings; the only hard
//! failures are an unreadable source root and a snapshot that cannot be
//! durably written. On any failure the previous snapshot stays
//! authoritative.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};

use regex::Regex;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    config::ContentSource,
    formatting::{escape_html, sanitize_html},
    store::{Lesson, LessonStore, MediaKind, MediaRef, Snapshot},
    Error, Result,
};

/// Marker line that starts the assignment sub-section of a day segment.
const ASSIGNMENT_MARKERS: &[&str] = &["#assignment", "#задание"];

/// Telegram caps messages at 4096 characters; the lesson renderer adds
/// separators, a title line and assignment chrome on top of the body.
const MAX_MESSAGE_LEN: usize = 4096;
const LESSON_CHROME_LEN: usize = 160;

fn day_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(?:day|день)\s+(\d{1,2})\s*(?::\s*(.*\S))?\s*$").unwrap())
}

fn day_folder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:day|день)?[ _\-]*0*(\d{1,2})$").unwrap())
}

fn drive_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"drive\.google\.com/(?:file/d/([A-Za-z0-9_-]{10,})|uc\?export=download&(?:amp;)?id=([A-Za-z0-9_-]{10,}))",
        )
        .unwrap()
    })
}

/// Outcome of one sync run. Ephemeral, logged and echoed to the admin.
#[derive(Clone, Debug, Default)]
pub struct SyncResult {
    pub days_synced: usize,
    pub media_downloaded: usize,
    pub warnings: Vec<String>,
    pub snapshot_path: PathBuf,
}

impl SyncResult {
    pub fn summary_html(&self) -> String {
        let mut out = format!(
            "📚 <b>Content sync finished</b>\n\n\
             Days synced: <b>{}</b>\n\
             Media downloaded: <b>{}</b>\n\
             Snapshot: <code>{}</code>",
            self.days_synced,
            self.media_downloaded,
            escape_html(&self.snapshot_path.display().to_string()),
        );
        if !self.warnings.is_empty() {
            out.push_str("\n\n⚠️ <b>Warnings</b>");
            for w in &self.warnings {
                out.push_str("\n• ");
                out.push_str(&escape_html(w));
            }
        }
        out
    }
}

/// A day's content before sanitizing and media resolution.
struct RawDay {
    day: u32,
    title: Option<String>,
    body: String,
    assignment: Option<String>,
    silent: bool,
    /// Local media files declared next to the lesson body, in sorted
    /// filename order for stable snapshot output.
    declared_media: Vec<(PathBuf, MediaKind)>,
}

#[derive(serde::Deserialize, Default)]
struct DayMeta {
    title: Option<String>,
    #[serde(default)]
    silent: bool,
}

/// Releases the singleton sync flag on every exit path.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::AlreadyRunning)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ContentSyncEngine {
    store: Arc<LessonStore>,
    data_dir: PathBuf,
    media_dir: PathBuf,
    http: reqwest::Client,
    download_concurrency: usize,
    download_timeout: Duration,
    running: AtomicBool,
}

impl ContentSyncEngine {
    pub fn new(
        store: Arc<LessonStore>,
        data_dir: PathBuf,
        media_dir: PathBuf,
        download_concurrency: usize,
        download_timeout: Duration,
    ) -> Self {
        Self {
            store,
            data_dir,
            media_dir,
            http: reqwest::Client::new(),
            download_concurrency: download_concurrency.max(1),
            download_timeout,
            running: AtomicBool::new(false),
        }
    }

    /// Run one full sync. Fails fast with [`Error::AlreadyRunning`] if
    /// another sync is in flight.
    pub async fn sync(&self, source: &ContentSource) -> Result<SyncResult> {
        let _guard = RunGuard::acquire(&self.running)?;

        let mut result = SyncResult {
            snapshot_path: self.store.path().to_path_buf(),
            ..SyncResult::default()
        };

        let raw_days = match source {
            ContentSource::DayFolders(root) => {
                collect_day_folders(root, &mut result.warnings)?
            }
            ContentSource::MasterDocument(path) => {
                let text = tokio::fs::read_to_string(path).await?;
                split_master_document(&text, &mut result.warnings)
            }
        };

        let mut lessons: BTreeMap<u32, Lesson> = BTreeMap::new();
        let mut downloads: Vec<(u32, String)> = Vec::new();

        for raw in raw_days {
            if raw.body.trim().is_empty() {
                result
                    .warnings
                    .push(format!("day {}: empty lesson body, skipped", raw.day));
                continue;
            }

            let body = sanitize_html(&raw.body);
            let assignment = raw
                .assignment
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(sanitize_html);

            // A lesson that cannot fit one Telegram message would fail on
            // every delivery tick; catch it here instead.
            let rendered_len = body.chars().count()
                + assignment.as_deref().map(|s| s.chars().count()).unwrap_or(0)
                + LESSON_CHROME_LEN;
            if rendered_len > MAX_MESSAGE_LEN {
                result.warnings.push(format!(
                    "day {}: lesson exceeds the {MAX_MESSAGE_LEN}-character message limit, skipped",
                    raw.day
                ));
                continue;
            }

            for id in extract_drive_ids(&raw.body) {
                downloads.push((raw.day, id));
            }

            let mut media = Vec::new();
            for (src, kind) in &raw.declared_media {
                match self.stage_local_media(raw.day, src).await {
                    Ok(path) => media.push(MediaRef { path, kind: *kind }),
                    Err(e) => result
                        .warnings
                        .push(format!("day {}: media {}: {e}", raw.day, src.display())),
                }
            }

            lessons.insert(
                raw.day,
                Lesson {
                    day: raw.day,
                    title: raw.title.unwrap_or_else(|| format!("Day {}", raw.day)),
                    body,
                    media,
                    assignment,
                    silent: raw.silent,
                },
            );
        }

        // Zero compiled days means the source itself is wrong (mistyped
        // root, document without day headings). Fail hard and leave the
        // active snapshot authoritative instead of publishing an empty
        // catalog that stalls every delivery.
        if lessons.is_empty() {
            return Err(Error::Validation(format!(
                "no lessons compiled from source (check the content {})",
                match source {
                    ContentSource::DayFolders(_) => "folder",
                    ContentSource::MasterDocument(_) => "document",
                }
            )));
        }

        let downloaded = self.fetch_remote_media(downloads, &mut result.warnings).await;
        result.media_downloaded = downloaded.len();
        for (day, media_ref) in downloaded {
            if let Some(lesson) = lessons.get_mut(&day) {
                lesson.media.push(media_ref);
            }
        }
        // Downloads complete in arbitrary order; sort for stable output.
        for lesson in lessons.values_mut() {
            lesson.media.sort_by(|a, b| a.path.cmp(&b.path));
        }

        result.days_synced = lessons.len();
        let snapshot = Snapshot { lessons };
        self.write_snapshot(&snapshot)?;
        self.store.replace(snapshot).await;

        tracing::info!(
            days = result.days_synced,
            media = result.media_downloaded,
            warnings = result.warnings.len(),
            "content sync finished"
        );
        Ok(result)
    }

    /// Copy a declared media file under the media dir and return its
    /// path relative to the data dir (the form stored in the snapshot).
    async fn stage_local_media(&self, day: u32, src: &Path) -> Result<PathBuf> {
        let name = src
            .file_name()
            .ok_or_else(|| Error::Validation(format!("bad media path {}", src.display())))?;
        let day_dir = self.media_dir.join(format!("day_{day:02}"));
        tokio::fs::create_dir_all(&day_dir).await?;
        let dest = day_dir.join(name);
        tokio::fs::copy(src, &dest).await?;
        Ok(self.relative_to_data_dir(&dest))
    }

    /// Download externally linked files with bounded concurrency. One
    /// failed file is a per-day warning, never a sync failure.
    async fn fetch_remote_media(
        &self,
        jobs: Vec<(u32, String)>,
        warnings: &mut Vec<String>,
    ) -> Vec<(u32, MediaRef)> {
        let semaphore = Arc::new(Semaphore::new(self.download_concurrency));
        let mut set = JoinSet::new();

        for (day, id) in jobs {
            let semaphore = semaphore.clone();
            let http = self.http.clone();
            let timeout = self.download_timeout;
            let day_dir = self.media_dir.join(format!("day_{day:02}"));
            set.spawn(async move {
                let _permit = semaphore.acquire().await;
                let res = download_one(&http, timeout, &day_dir, &id).await;
                (day, id, res)
            });
        }

        let mut out = Vec::new();
        while let Some(joined) = set.join_next().await {
            let Ok((day, id, res)) = joined else {
                warnings.push("media download task panicked".to_string());
                continue;
            };
            match res {
                Ok((dest, kind)) => out.push((
                    day,
                    MediaRef {
                        path: self.relative_to_data_dir(&dest),
                        kind,
                    },
                )),
                Err(e) => warnings.push(format!("day {day}: download {id}: {e}")),
            }
        }
        out
    }

    fn relative_to_data_dir(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.data_dir)
            .unwrap_or(path)
            .to_path_buf()
    }

    /// Write the snapshot next to its final location and rename, so the
    /// previous file is never observed half-written.
    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let path = self.store.path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, snapshot.to_json()?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

async fn download_one(
    http: &reqwest::Client,
    timeout: Duration,
    day_dir: &Path,
    id: &str,
) -> Result<(PathBuf, MediaKind)> {
    let url = format!("https://drive.google.com/uc?export=download&id={id}");
    let resp = http
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| Error::Transient(e.to_string()))?;

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let (kind, ext) = match content_type.split(';').next().unwrap_or("") {
        "image/jpeg" => (MediaKind::Image, "jpg"),
        "image/png" => (MediaKind::Image, "png"),
        "image/gif" => (MediaKind::Image, "gif"),
        "image/webp" => (MediaKind::Image, "webp"),
        "video/mp4" => (MediaKind::Video, "mp4"),
        "video/quicktime" => (MediaKind::Video, "mov"),
        "video/webm" => (MediaKind::Video, "webm"),
        other => {
            return Err(Error::Validation(format!(
                "unsupported content type {other:?}"
            )))
        }
    };

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| Error::Transient(e.to_string()))?;
    tokio::fs::create_dir_all(day_dir).await?;
    let dest = day_dir.join(format!("{id}.{ext}"));
    tokio::fs::write(&dest, &bytes).await?;
    Ok((dest, kind))
}

/// Parse a folder name into a day number: `day_01`, `day-1`, `день 3`,
/// or a bare `7` all work.
fn parse_day_number(name: &str) -> Option<u32> {
    let caps = day_folder_re().captures(name)?;
    caps.get(1)?.as_str().parse().ok()
}

fn classify_media(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "webp" => Some(MediaKind::Image),
        "mp4" | "mov" | "avi" | "mkv" | "webm" => Some(MediaKind::Video),
        _ => None,
    }
}

/// Recognize embedded file-sharing links, first occurrence order,
/// duplicates dropped.
fn extract_drive_ids(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in drive_link_re().captures_iter(text) {
        let id = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string());
        if let Some(id) = id {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
    }
    seen
}

fn read_day_meta(dir: &Path, day: u32, warnings: &mut Vec<String>) -> DayMeta {
    match std::fs::read_to_string(dir.join("meta.json")) {
        Ok(txt) => match serde_json::from_str(&txt) {
            Ok(meta) => meta,
            Err(e) => {
                warnings.push(format!("day {day}: meta.json: {e}"));
                DayMeta::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DayMeta::default(),
        Err(e) => {
            warnings.push(format!("day {day}: meta.json: {e}"));
            DayMeta::default()
        }
    }
}

fn list_day_dirs(root: &Path) -> Vec<(PathBuf, String)> {
    let mut dirs: Vec<(PathBuf, String)> = std::fs::read_dir(root)
        .into_iter()
        .flatten()
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| (e.path(), e.file_name().to_string_lossy().into_owned()))
        .collect();
    dirs.sort_by(|a, b| a.1.cmp(&b.1));
    dirs
}

/// Walk a per-day folder tree. Each day folder needs a lesson body
/// (`lesson.txt` or `lesson.html`); `task.*`, `meta.json` and media
/// files (in the folder or a `media/` subfolder) are optional.
fn collect_day_folders(root: &Path, warnings: &mut Vec<String>) -> Result<Vec<RawDay>> {
    if !root.is_dir() {
        return Err(Error::Validation(format!(
            "content root {} is not a directory",
            root.display()
        )));
    }

    let mut days = Vec::new();
    for (path, name) in list_day_dirs(root) {
        let Some(day) = parse_day_number(&name) else {
            continue;
        };

        let body = ["lesson.txt", "lesson.html"]
            .iter()
            .find_map(|f| std::fs::read_to_string(path.join(f)).ok());
        let Some(body) = body else {
            warnings.push(format!("day {day}: no lesson body in {name}, skipped"));
            continue;
        };

        let assignment = ["task.txt", "task.html"]
            .iter()
            .find_map(|f| std::fs::read_to_string(path.join(f)).ok());

        let meta = read_day_meta(&path, day, warnings);

        let mut declared_media = Vec::new();
        let mut media_dirs = vec![path.clone()];
        let sub = path.join("media");
        if sub.is_dir() {
            media_dirs.push(sub);
        }
        for dir in media_dirs {
            let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
                .into_iter()
                .flatten()
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            files.sort();
            for file in files {
                if let Some(kind) = classify_media(&file) {
                    declared_media.push((file, kind));
                }
            }
        }

        days.push(RawDay {
            day,
            title: meta.title,
            body,
            assignment,
            silent: meta.silent,
            declared_media,
        });
    }
    Ok(days)
}

/// Split one master document into day segments. A segment starts at a
/// `Day N[: title]` heading line; the assignment sub-section starts at
/// the marker line.
fn split_master_document(text: &str, warnings: &mut Vec<String>) -> Vec<RawDay> {
    let mut days: Vec<RawDay> = Vec::new();
    let mut current: Option<RawDay> = None;
    let mut in_assignment = false;

    for line in text.lines() {
        if let Some(caps) = day_heading_re().captures(line) {
            if let Some(done) = current.take() {
                days.push(done);
            }
            in_assignment = false;
            // 0-99 per the regex, so parse cannot fail.
            let day = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            current = Some(RawDay {
                day,
                title: caps.get(2).map(|m| m.as_str().to_string()),
                body: String::new(),
                assignment: None,
                silent: false,
                declared_media: Vec::new(),
            });
            continue;
        }

        let Some(raw) = current.as_mut() else {
            continue;
        };

        let lowered = line.trim().to_lowercase();
        if ASSIGNMENT_MARKERS.contains(&lowered.as_str()) {
            in_assignment = true;
            raw.assignment.get_or_insert_with(String::new);
            continue;
        }

        let target = if in_assignment {
            raw.assignment.get_or_insert_with(String::new)
        } else {
            &mut raw.body
        };
        if !target.is_empty() {
            target.push('\n');
        }
        target.push_str(line);
    }
    if let Some(done) = current.take() {
        days.push(done);
    }

    // Duplicate day headings: last segment wins, with a warning.
    let mut by_day: BTreeMap<u32, RawDay> = BTreeMap::new();
    for raw in days {
        let day = raw.day;
        if by_day.insert(day, raw).is_some() {
            warnings.push(format!("day {day}: duplicate heading, later segment kept"));
        }
    }
    let mut out: Vec<RawDay> = by_day.into_values().collect();
    for raw in &mut out {
        raw.body = raw.body.trim().to_string();
        if let Some(task) = &raw.assignment {
            let trimmed = task.trim().to_string();
            raw.assignment = if trimmed.is_empty() {
                warnings.push(format!("day {}: empty assignment section", raw.day));
                None
            } else {
                Some(trimmed)
            };
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn engine(dir: &Path) -> ContentSyncEngine {
        let store = Arc::new(LessonStore::open(dir.join("lessons.json")).unwrap());
        ContentSyncEngine::new(
            store,
            dir.to_path_buf(),
            dir.join("content_media"),
            4,
            Duration::from_secs(5),
        )
    }

    fn write_day(root: &Path, folder: &str, lesson: &str) -> PathBuf {
        let dir = root.join(folder);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("lesson.txt"), lesson).unwrap();
        dir
    }

    #[test]
    fn folder_names_parse_tolerantly() {
        assert_eq!(parse_day_number("day_01"), Some(1));
        assert_eq!(parse_day_number("day-1"), Some(1));
        assert_eq!(parse_day_number("Day 12"), Some(12));
        assert_eq!(parse_day_number("день 3"), Some(3));
        assert_eq!(parse_day_number("7"), Some(7));
        assert_eq!(parse_day_number("notes"), None);
        assert_eq!(parse_day_number("day_123"), None);
    }

    #[test]
    fn drive_links_are_extracted_once() {
        let text = "intro https://drive.google.com/file/d/1aBcDeFgHiJkLmNoP/view \
                    and https://drive.google.com/uc?export=download&id=1aBcDeFgHiJkLmNoP \
                    plus https://drive.google.com/file/d/2QrStUvWxYz012345/view";
        assert_eq!(
            extract_drive_ids(text),
            vec!["1aBcDeFgHiJkLmNoP".to_string(), "2QrStUvWxYz012345".to_string()]
        );
    }

    #[test]
    fn master_document_splits_days_and_assignments() {
        let doc = "Day 1: Getting started\n\
                   Welcome to the course.\n\
                   More intro text.\n\
                   #Assignment\n\
                   Write your goals.\n\
                   \n\
                   День 2\n\
                   Second lesson body.\n";
        let mut warnings = Vec::new();
        let days = split_master_document(doc, &mut warnings);

        assert_eq!(days.len(), 2);
        assert_eq!(days[0].day, 1);
        assert_eq!(days[0].title.as_deref(), Some("Getting started"));
        assert_eq!(days[0].body, "Welcome to the course.\nMore intro text.");
        assert_eq!(days[0].assignment.as_deref(), Some("Write your goals."));
        assert_eq!(days[1].day, 2);
        assert_eq!(days[1].title, None);
        assert!(days[1].assignment.is_none());
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn sync_from_folders_builds_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("source");
        write_day(&root, "day_01", "Hello <b>world</b> & 1 < 2");
        let d2 = write_day(&root, "day_02", "Second");
        fs::write(d2.join("task.txt"), "Do the thing").unwrap();
        fs::write(
            d2.join("meta.json"),
            r#"{"title": "Extras", "silent": true}"#,
        )
        .unwrap();
        fs::write(d2.join("chart.png"), b"png").unwrap();

        let engine = engine(tmp.path());
        let result = engine
            .sync(&ContentSource::DayFolders(root))
            .await
            .unwrap();

        assert_eq!(result.days_synced, 2);
        assert!(result.warnings.is_empty());

        let snap = engine.store.snapshot().await;
        let day1 = snap.get(1).unwrap();
        assert_eq!(day1.title, "Day 1");
        assert_eq!(day1.body, "Hello <b>world</b> &amp; 1 &lt; 2");
        assert!(!day1.silent);

        let day2 = snap.get(2).unwrap();
        assert_eq!(day2.title, "Extras");
        assert!(day2.silent);
        assert_eq!(day2.assignment.as_deref(), Some("Do the thing"));
        assert_eq!(day2.media.len(), 1);
        assert_eq!(day2.media[0].kind, MediaKind::Image);
        assert!(tmp.path().join(&day2.media[0].path).is_file());
    }

    #[tokio::test]
    async fn missing_lesson_body_skips_day_with_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("source");
        write_day(&root, "day_01", "ok");
        fs::create_dir_all(root.join("day_02")).unwrap();

        let engine = engine(tmp.path());
        let result = engine
            .sync(&ContentSource::DayFolders(root))
            .await
            .unwrap();

        assert_eq!(result.days_synced, 1);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("day 2"));
    }

    #[tokio::test]
    async fn identical_source_produces_byte_identical_snapshots() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("source");
        let d1 = write_day(&root, "day_01", "Body one");
        fs::write(d1.join("a.jpg"), b"a").unwrap();
        fs::write(d1.join("b.mp4"), b"b").unwrap();
        write_day(&root, "day_02", "Body two");

        let engine = engine(tmp.path());
        let source = ContentSource::DayFolders(root);
        engine.sync(&source).await.unwrap();
        let first = fs::read(tmp.path().join("lessons.json")).unwrap();
        engine.sync(&source).await.unwrap();
        let second = fs::read(tmp.path().join("lessons.json")).unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_sync_fails_fast() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("source");
        write_day(&root, "day_01", "Body");

        let engine = engine(tmp.path());
        engine.running.store(true, Ordering::SeqCst);
        let err = engine
            .sync(&ContentSource::DayFolders(root.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));

        // The guard belongs to the in-flight run; once cleared the next
        // sync proceeds and releases it on exit.
        engine.running.store(false, Ordering::SeqCst);
        engine.sync(&ContentSource::DayFolders(root)).await.unwrap();
        assert!(!engine.running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_source_never_replaces_the_active_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("source");
        write_day(&root, "day_01", "Original");

        let engine = engine(tmp.path());
        engine
            .sync(&ContentSource::DayFolders(root))
            .await
            .unwrap();
        let on_disk = fs::read(tmp.path().join("lessons.json")).unwrap();

        // A directory that exists but contains no day folders.
        let empty = tmp.path().join("mistyped");
        fs::create_dir_all(&empty).unwrap();
        let err = engine
            .sync(&ContentSource::DayFolders(empty))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // A document with no day headings.
        let doc = tmp.path().join("notes.txt");
        fs::write(&doc, "just some prose, no headings").unwrap();
        let err = engine
            .sync(&ContentSource::MasterDocument(doc))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let snap = engine.store.snapshot().await;
        assert_eq!(snap.get(1).unwrap().body, "Original");
        assert_eq!(fs::read(tmp.path().join("lessons.json")).unwrap(), on_disk);
    }

    #[tokio::test]
    async fn oversized_lesson_is_skipped_with_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("source");
        write_day(&root, "day_01", "fits");
        write_day(&root, "day_02", &"x".repeat(5000));

        let engine = engine(tmp.path());
        let result = engine
            .sync(&ContentSource::DayFolders(root))
            .await
            .unwrap();

        assert_eq!(result.days_synced, 1);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("day 2"));
        assert!(result.warnings[0].contains("message limit"));
        assert!(engine.store.snapshot().await.get(2).is_none());
    }

    #[tokio::test]
    async fn unreadable_root_is_a_hard_failure_keeping_old_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("source");
        write_day(&root, "day_01", "Original");

        let engine = engine(tmp.path());
        engine
            .sync(&ContentSource::DayFolders(root))
            .await
            .unwrap();

        let err = engine
            .sync(&ContentSource::DayFolders(tmp.path().join("missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let snap = engine.store.snapshot().await;
        assert_eq!(snap.get(1).unwrap().body, "Original");
    }
}
