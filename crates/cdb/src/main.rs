use std::sync::Arc;

use cdb_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), cdb_core::Error> {
    cdb_core::logging::init("cdb");

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        course_len = cfg.course_len,
        review_chat = cfg.review_chat_id.0,
        data_dir = %cfg.data_dir.display(),
        "starting course delivery bot"
    );

    cdb_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| cdb_core::Error::Transient(format!("telegram bot failed: {e}")))?;

    Ok(())
}
