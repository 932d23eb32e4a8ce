mod config;
pub mod database;
mod session_log;

pub use config::{Config, NotificationsConfig, UiConfig};
pub use database::{Database, Stats, StoredSession};
pub use session_log::{NullSink, SessionLog, SessionSink};

use std::path::PathBuf;

/// Returns `~/.config/practimer[-<env>]/` based on PRACTIMER_ENV.
///
/// Any value other than `production` selects a suffixed directory, so dev
/// and test runs never touch real data.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("PRACTIMER_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "production" {
        base_dir.join("practimer")
    } else {
        base_dir.join(format!("practimer-{env}"))
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
