//! TOML configuration for the daemon. Every section and field has a default
//! so a missing or partial `meetsync.toml` still yields a runnable config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::info;

use crate::core::dispatcher::RetryPolicy;
use crate::core::sweeps::SweepSettings;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub summarizer: SummarizerConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub sweeps: SweepsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Sqlite database file. Defaults to the platform data directory.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_summarizer_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_summarizer_model")]
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Shared HMAC secret. Empty disables signature verification.
    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,

    #[serde(default = "default_idempotency_max_entries")]
    pub idempotency_max_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepsConfig {
    #[serde(default = "default_status_poll_cron")]
    pub status_poll_cron: String,

    #[serde(default = "default_calendar_sync_cron")]
    pub calendar_sync_cron: String,

    #[serde(default = "default_auto_schedule_cron")]
    pub auto_schedule_cron: String,

    #[serde(default = "default_cleanup_cron")]
    pub cleanup_cron: String,

    #[serde(default = "default_tenant_delay_ms")]
    pub tenant_delay_ms: u64,

    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: i64,

    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    #[serde(default = "default_true")]
    pub auto_schedule: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8380
}
fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("meetsync")
        .join("meetsync.db")
}
fn default_provider_url() -> String {
    "https://api.recorder.example.com/v1".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_summarizer_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_summarizer_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_idempotency_ttl_secs() -> u64 {
    300
}
fn default_idempotency_max_entries() -> usize {
    4096
}
fn default_status_poll_cron() -> String {
    "10 0/2 * * * *".to_string()
}
fn default_calendar_sync_cron() -> String {
    "25 0/15 * * * *".to_string()
}
fn default_auto_schedule_cron() -> String {
    "40 0/30 * * * *".to_string()
}
fn default_cleanup_cron() -> String {
    "0 45 3 * * *".to_string()
}
fn default_tenant_delay_ms() -> u64 {
    200
}
fn default_lookback_days() -> i64 {
    7
}
fn default_lookahead_days() -> i64 {
    30
}
fn default_retention_days() -> i64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_summarizer_url(),
            api_key: String::new(),
            model: default_summarizer_model(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            idempotency_max_entries: default_idempotency_max_entries(),
        }
    }
}

impl Default for SweepsConfig {
    fn default() -> Self {
        Self {
            status_poll_cron: default_status_poll_cron(),
            calendar_sync_cron: default_calendar_sync_cron(),
            auto_schedule_cron: default_auto_schedule_cron(),
            cleanup_cron: default_cleanup_cron(),
            tenant_delay_ms: default_tenant_delay_ms(),
            lookback_days: default_lookback_days(),
            lookahead_days: default_lookahead_days(),
            retention_days: default_retention_days(),
            auto_schedule: true,
        }
    }
}

impl Config {
    /// Platform config file path, e.g. `~/.config/meetsync/meetsync.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("meetsync")
            .join("meetsync.toml")
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&content)?;
        info!(
            "Loaded config: listen={}:{}, db={}, provider={}, sweeps={}",
            config.server.host,
            config.server.port,
            config.storage.db_path.display(),
            config.provider.base_url,
            if config.sweeps.auto_schedule {
                "full"
            } else {
                "no auto-schedule"
            }
        );
        Ok(config)
    }

    pub fn webhook_secret(&self) -> Option<String> {
        if self.webhook.secret.is_empty() {
            None
        } else {
            Some(self.webhook.secret.clone())
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.webhook.max_attempts,
            base_delay: Duration::from_millis(self.webhook.base_delay_ms),
        }
    }

    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            status_poll_cron: self.sweeps.status_poll_cron.clone(),
            calendar_sync_cron: self.sweeps.calendar_sync_cron.clone(),
            auto_schedule_cron: self.sweeps.auto_schedule_cron.clone(),
            cleanup_cron: self.sweeps.cleanup_cron.clone(),
            tenant_delay_ms: self.sweeps.tenant_delay_ms,
            lookback_days: self.sweeps.lookback_days,
            lookahead_days: self.sweeps.lookahead_days,
            retention_days: self.sweeps.retention_days,
            auto_schedule: self.sweeps.auto_schedule,
        }
    }
}
