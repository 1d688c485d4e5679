//! Service configuration
//!
//! Environment variables (all optional):
//! - ALERTWATCH_HOST: Bind address (default: 0.0.0.0)
//! - ALERTWATCH_PORT: Port number (default: 8000)
//! - ALERTWATCH_STORE: `sqlite` or `memory` (default: sqlite)
//! - ALERTWATCH_DB_PATH: SQLite file, `:memory:` allowed (default: ./alertwatch.db)
//! - ALERTWATCH_TZ_OFFSET_HOURS: Reference timezone offset from UTC (default: 8)
//! - ALERT_TIMEOUT_MINUTES: Deadline after a trigger, fractional allowed (default: 25)
//! - CHECK_INTERVAL_SECONDS: Sweep interval (default: 60)
//! - RETENTION_RUN_AT: Reaper time of day, HH:MM:SS (default: 00:00:05)
//! - RETENTION_GRACE_MINUTES: Open records this close to midnight survive (default: 25)
//! - RETENTION_RETRY_SECONDS: Reaper back-off after a failed run (default: 3600)
//! - NOTIFY_WEBHOOK_URL: Timeout workflow endpoint (default: unset, dispatch disabled)
//! - NOTIFY_API_KEY: Bearer token for the endpoint
//! - NOTIFY_USER_ID: Sender identity in the payload (default: alert-system)

use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, Offset, Utc};

use crate::alerts::WebhookConfig;
use crate::retention::RetentionConfig;

/// Which [`AlertStore`](crate::storage::AlertStore) backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    pub db_path: String,
    pub tz: FixedOffset,
    pub alert_timeout: Duration,
    pub check_interval: Duration,
    pub retention: RetentionConfig,
    pub webhook: WebhookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            store: StoreBackend::Sqlite,
            db_path: "./alertwatch.db".to_string(),
            tz: FixedOffset::east_opt(8 * 3600).unwrap_or(Utc.fix()),
            alert_timeout: Duration::from_secs(25 * 60),
            check_interval: Duration::from_secs(60),
            retention: RetentionConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(host) = get("ALERTWATCH_HOST") {
            config.host = host;
        }
        if let Some(port) = get("ALERTWATCH_PORT") {
            config.port = parse_var("ALERTWATCH_PORT", &port)?;
        }
        if let Some(store) = get("ALERTWATCH_STORE") {
            config.store = store
                .parse()
                .map_err(|reason| ConfigError::invalid("ALERTWATCH_STORE", &store, reason))?;
        }
        if let Some(path) = get("ALERTWATCH_DB_PATH") {
            config.db_path = path;
        }
        if let Some(hours) = get("ALERTWATCH_TZ_OFFSET_HOURS") {
            let hours: i32 = parse_var("ALERTWATCH_TZ_OFFSET_HOURS", &hours)?;
            config.tz = FixedOffset::east_opt(hours * 3600).ok_or_else(|| {
                ConfigError::invalid(
                    "ALERTWATCH_TZ_OFFSET_HOURS",
                    &hours.to_string(),
                    "offset out of range",
                )
            })?;
        }
        if let Some(minutes) = get("ALERT_TIMEOUT_MINUTES") {
            config.alert_timeout = minutes_var("ALERT_TIMEOUT_MINUTES", &minutes)?;
        }
        if let Some(secs) = get("CHECK_INTERVAL_SECONDS") {
            let secs: u64 = parse_var("CHECK_INTERVAL_SECONDS", &secs)?;
            if secs == 0 {
                return Err(ConfigError::invalid(
                    "CHECK_INTERVAL_SECONDS",
                    "0",
                    "must be greater than zero",
                ));
            }
            config.check_interval = Duration::from_secs(secs);
        }
        if let Some(run_at) = get("RETENTION_RUN_AT") {
            config.retention.run_at = NaiveTime::parse_from_str(run_at.trim(), "%H:%M:%S")
                .map_err(|e| ConfigError::invalid("RETENTION_RUN_AT", &run_at, e))?;
        }
        if let Some(minutes) = get("RETENTION_GRACE_MINUTES") {
            config.retention.grace = minutes_var("RETENTION_GRACE_MINUTES", &minutes)?;
        }
        if let Some(secs) = get("RETENTION_RETRY_SECONDS") {
            let secs: u64 = parse_var("RETENTION_RETRY_SECONDS", &secs)?;
            config.retention.retry_after = Duration::from_secs(secs);
        }

        config.webhook.url = get("NOTIFY_WEBHOOK_URL");
        config.webhook.api_key = get("NOTIFY_API_KEY");
        if let Some(user) = get("NOTIFY_USER_ID") {
            config.webhook.user_id = user;
        }

        Ok(config)
    }
}

fn parse_var<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::invalid(name, value, e))
}

fn minutes_var(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let minutes: f64 = parse_var(name, value)?;
    let duration = Duration::try_from_secs_f64(minutes * 60.0)
        .map_err(|e| ConfigError::invalid(name, value, e))?;
    // Deadlines are computed with chrono, which has a narrower range
    chrono::Duration::from_std(duration).map_err(|e| ConfigError::invalid(name, value, e))?;
    Ok(duration)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(name: &'static str, value: &str, reason: impl std::fmt::Display) -> Self {
        ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
