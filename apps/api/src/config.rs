use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::llm_client::DEFAULT_API_URL;
use crate::queue::QueueConfig;

const MB: u64 = 1024 * 1024;

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or a numeric one is malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Enables the Redis progress fan-out when set.
    pub redis_url: Option<String>,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub port: u16,
    pub rust_log: String,
    pub llm_api_url: String,
    pub llm_timeout: Duration,
    pub key_cooldown: Duration,
    pub key_default_max_requests: u32,
    pub queue: QueueConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let queue = QueueConfig {
            max_projects: env_or("QUEUE_MAX_PROJECTS", 50)?,
            sweep_interval: Duration::from_secs(env_or("QUEUE_SWEEP_INTERVAL_SECONDS", 900)?),
            max_age: Duration::from_secs(env_or("QUEUE_MAX_AGE_SECONDS", 7200)?),
            abandoned_grace: Duration::from_secs(env_or("QUEUE_ABANDONED_GRACE_SECONDS", 30)?),
            jitter_min: Duration::from_millis(env_or("QUEUE_JITTER_MIN_MS", 500)?),
            jitter_max: Duration::from_millis(env_or("QUEUE_JITTER_MAX_MS", 1500)?),
            inter_request_delay: Duration::from_millis(env_or("QUEUE_INTER_REQUEST_DELAY_MS", 1500)?),
            memory_warn_bytes: env_or::<u64>("MEMORY_WARN_MB", 512)? * MB,
            memory_critical_bytes: env_or::<u64>("MEMORY_CRITICAL_MB", 1024)? * MB,
            pressure_evictions: env_or("MEMORY_PRESSURE_EVICTIONS", 5)?,
        };

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: optional_env("REDIS_URL"),
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            llm_api_url: optional_env("LLM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            llm_timeout: Duration::from_secs(env_or("LLM_TIMEOUT_SECONDS", 120)?),
            key_cooldown: Duration::from_secs(env_or("KEY_COOLDOWN_SECONDS", 3600)?),
            key_default_max_requests: env_or("KEY_DEFAULT_MAX_REQUESTS", 1000)?,
            queue,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}")),
        None => Ok(default),
    }
}
