use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::ChatId, errors::Error, Result};

/// Where the sync engine pulls lesson content from.
#[derive(Clone, Debug)]
pub enum ContentSource {
    /// One folder per day (`day_01/lesson.txt`, `day_01/task.txt`, ...).
    DayFolders(PathBuf),
    /// One document containing all days, segmented by `Day N` headings.
    MasterDocument(PathBuf),
}

/// Typed configuration, loaded from environment variables (with `.env`
/// support, never overriding real env).
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    /// Chat where submissions are forwarded for review.
    pub review_chat_id: ChatId,
    /// Users allowed to run /enroll and /sync_content.
    pub admin_user_ids: Vec<i64>,

    // Course
    pub course_len: u32,
    pub lesson_interval: Duration,
    pub tick_interval: Duration,

    // Storage
    pub data_dir: PathBuf,
    pub snapshot_path: PathBuf,
    pub progress_path: PathBuf,
    pub assignments_path: PathBuf,
    pub media_dir: PathBuf,

    // Content sync
    pub content_source: Option<ContentSource>,
    pub download_concurrency: usize,
    pub download_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let bot_token = env_str("COURSE_BOT_TOKEN").unwrap_or_default();
        if bot_token.trim().is_empty() {
            return Err(Error::Config(
                "COURSE_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let review_chat_id = env_i64("REVIEW_CHAT_ID").ok_or_else(|| {
            Error::Config("REVIEW_CHAT_ID environment variable is required".to_string())
        })?;
        let admin_user_ids = parse_csv_i64(env_str("ADMIN_USER_IDS"));
        if admin_user_ids.is_empty() {
            return Err(Error::Config(
                "ADMIN_USER_IDS environment variable is required".to_string(),
            ));
        }

        let course_len = env_u32("COURSE_DURATION_DAYS").unwrap_or(30);
        let lesson_interval =
            Duration::from_secs(env_u64("LESSON_INTERVAL_HOURS").unwrap_or(24) * 3600);
        let tick_interval = Duration::from_secs(env_u64("TICK_INTERVAL_SECS").unwrap_or(300));

        let data_dir = env_path("DATA_DIR").unwrap_or_else(|| PathBuf::from("data"));
        fs::create_dir_all(&data_dir)?;

        let snapshot_path = data_dir.join("lessons.json");
        let progress_path = data_dir.join("progress.json");
        let assignments_path = data_dir.join("assignments.json");
        let media_dir = env_path("MEDIA_DIR").unwrap_or_else(|| data_dir.join("content_media"));

        let content_source = match (env_path("CONTENT_ROOT_DIR"), env_path("CONTENT_MASTER_DOC")) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "set either CONTENT_ROOT_DIR or CONTENT_MASTER_DOC, not both".to_string(),
                ))
            }
            (Some(root), None) => Some(ContentSource::DayFolders(root)),
            (None, Some(doc)) => Some(ContentSource::MasterDocument(doc)),
            (None, None) => None,
        };

        let download_concurrency = env_usize("DOWNLOAD_CONCURRENCY").unwrap_or(4).clamp(1, 8);
        let download_timeout = Duration::from_secs(env_u64("DOWNLOAD_TIMEOUT_SECS").unwrap_or(60));

        Ok(Self {
            bot_token,
            review_chat_id: ChatId(review_chat_id),
            admin_user_ids,
            course_len,
            lesson_interval,
            tick_interval,
            data_dir,
            snapshot_path,
            progress_path,
            assignments_path,
            media_dir,
            content_source,
            download_concurrency,
            download_timeout,
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}
