// src/config.rs

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;

/// Fixed key of the persisted offline queue blob.
pub const QUEUE_STORAGE_KEY: &str = "stayfocus_offline_queue";

/// Key of the persisted dead-letter blob, kept beside the queue.
pub const DEAD_LETTER_STORAGE_KEY: &str = "stayfocus_offline_queue_dead_letters";

/// Daily-rolled log file, `logs/app.log.<date>`.
pub const LOG_DIR: &str = "logs";
pub const LOG_FILE_NAME: &str = "app.log";

/// Dead letters kept at most; the oldest are discarded first.
pub const MAX_DEAD_LETTERS: usize = 1000;

/// Retry budget for a queued mutation when `QUEUE_MAX_RETRIES` is unset.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Minimum number of attempts before a recent trend is reported.
pub const TREND_MIN_ATTEMPTS: usize = 10;

/// Size of each of the two windows compared by the recent trend.
pub const TREND_WINDOW: usize = 5;

/// Number of calendar months in the monthly progress rollup.
pub const MONTHLY_WINDOW: u32 = 6;

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Upper bound on the number of answers stored with a single attempt.
pub const MAX_ANSWERS_PER_ATTEMPT: usize = 500;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub rust_log: String,
    pub port: u16,
    pub queue_dir: PathBuf,
    pub queue_max_retries: u32,
    pub connectivity_interval: Duration,
    pub cors_origins: Vec<String>,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let jwt_secret = env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let port = parse_var("PORT", 3000)?;
        let queue_max_retries = parse_var("QUEUE_MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
        let interval_secs: u64 = parse_var("CONNECTIVITY_INTERVAL_SECS", 15)?;

        let queue_dir = env::var("QUEUE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            database_url,
            jwt_secret,
            rust_log,
            port,
            queue_dir,
            queue_max_retries,
            connectivity_interval: Duration::from_secs(interval_secs.max(1)),
            cors_origins,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
