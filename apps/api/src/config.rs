use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing. Tuning knobs — the
/// similarity threshold, phash rejection distance, lock TTL — are deliberate
/// configuration, not constants; there is no adaptive policy behind them.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub render_api_url: String,
    pub render_api_key: String,
    pub port: u16,
    pub rust_log: String,

    /// Cosine similarity at or above which two cues share a cache key.
    pub similarity_threshold: f64,
    /// Hamming distance below which a fresh artifact is a near-duplicate.
    pub phash_reject_distance: u32,
    /// Fresh-seed regeneration attempts before surfacing DEDUP_EXHAUSTED.
    pub max_dedup_attempts: u32,
    /// Work-lock TTL. Must exceed expected generation latency with margin;
    /// expiry is the backstop for crashed holders.
    pub lock_ttl: Duration,
    /// Upper bound on a single provider render call.
    pub render_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            render_api_url: require_env("RENDER_API_URL")?,
            render_api_key: require_env("RENDER_API_KEY")?,
            port: env_or("PORT", "8080")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: env_or("RUST_LOG", "info"),
            similarity_threshold: env_or("PROMPT_SIMILARITY_THRESHOLD", "0.85")
                .parse::<f64>()
                .context("PROMPT_SIMILARITY_THRESHOLD must be a float")?,
            phash_reject_distance: env_or("PHASH_REJECT_DISTANCE", "5")
                .parse::<u32>()
                .context("PHASH_REJECT_DISTANCE must be an integer")?,
            max_dedup_attempts: env_or("MAX_DEDUP_ATTEMPTS", "3")
                .parse::<u32>()
                .context("MAX_DEDUP_ATTEMPTS must be an integer")?,
            lock_ttl: Duration::from_secs(
                env_or("LOCK_TTL_SECONDS", "300")
                    .parse::<u64>()
                    .context("LOCK_TTL_SECONDS must be an integer")?,
            ),
            render_timeout: Duration::from_secs(
                env_or("RENDER_TIMEOUT_SECONDS", "120")
                    .parse::<u64>()
                    .context("RENDER_TIMEOUT_SECONDS must be an integer")?,
            ),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
