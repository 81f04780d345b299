use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::db::RetryPolicy;
use crate::page::Waits;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Runtime settings: defaults, then `profile_scraper.toml`, then `PROFILE_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub page_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub retry_base_ms: u64,
    pub max_retries: u32,
    /// Levels of per-company overflow pages to follow; 0 keeps truncated lists.
    pub overflow_depth: usize,
    pub session_cookie: Option<String>,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Config::builder()
            .set_default("db_path", "data/profiles.sqlite")?
            .set_default("page_timeout_ms", 10_000)?
            .set_default("poll_interval_ms", 250)?
            .set_default("retry_base_ms", 1_000)?
            .set_default("max_retries", 3)?
            .set_default("overflow_depth", 1)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("request_timeout_secs", 30)?
            .add_source(File::with_name("profile_scraper").required(false))
            .add_source(Environment::with_prefix("PROFILE"))
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")
    }

    pub fn waits(&self) -> Waits {
        Waits {
            timeout: Duration::from_millis(self.page_timeout_ms),
            poll: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
