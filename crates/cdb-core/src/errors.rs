/// Core error type for the course bot.
///
/// Adapter crates map their specific errors into this type so the core
/// can distinguish retryable failures from logical misuse. The taxonomy:
/// - `Transient` — network/IO trouble; safe to retry next tick or call.
/// - `Validation` — malformed source content; skip the unit, keep going.
/// - `AlreadyRunning` — concurrent sync attempt; fail fast, caller may retry.
/// - `NotFound` / `AlreadyResolved` — logical misuse, surfaced, no retry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("content sync already running")]
    AlreadyRunning,

    #[error("assignment not found for token")]
    NotFound,

    #[error("assignment already resolved")]
    AlreadyResolved,
}

pub type Result<T> = std::result::Result<T, Error>;
