//! Bot configuration.
//!
//! Stored as JSON at `~/.timesheet-bot/config.json`. The bot token can also
//! come from the `TIMESHEET_BOT_TOKEN` environment variable, which wins over
//! the file.

use crate::error::{ConfigError, ConfigResult};
use crate::util::{config_dir, data_path};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable overriding the Telegram token.
pub const TOKEN_ENV: &str = "TIMESHEET_BOT_TOKEN";

/// Telegram settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    /// Whether to connect to Telegram.
    pub enabled: bool,
    /// Bot token from @BotFather.
    pub token: Option<String>,
    /// Numeric user ids allowed to talk to the bot. Empty allows everyone.
    pub allow_from: Vec<String>,
}

/// Scheduling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Hours between refreshes of every live post.
    pub refresh_hours: i64,
    /// Seconds between due checks of periodic actions.
    pub check_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            refresh_hours: 24,
            check_interval_secs: 60,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Telegram channel.
    pub telegram: TelegramSettings,
    /// Periodic work.
    pub schedule: ScheduleConfig,
    /// Where records are persisted.
    pub data_path: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            telegram: TelegramSettings::default(),
            schedule: ScheduleConfig::default(),
            data_path: data_path(),
        }
    }
}

/// Severity of a [`ConfigIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    /// The bot will not start.
    Error,
    /// The bot starts, but probably not as intended.
    Warning,
}

/// One problem found by [`BotConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Severity.
    pub level: IssueLevel,
    /// Offending field, dotted.
    pub field: &'static str,
    /// What is wrong.
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            field,
            message: message.into(),
        }
    }

    fn warning(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.level {
            IssueLevel::Error => "error",
            IssueLevel::Warning => "warning",
        };
        write!(f, "{level}: {}: {}", self.field, self.message)
    }
}

impl BotConfig {
    /// Apply environment overrides.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        if let Ok(token) = std::env::var(TOKEN_ENV)
            && !token.trim().is_empty()
        {
            debug!("telegram token taken from environment");
            self.telegram.token = Some(token);
            self.telegram.enabled = true;
        }
        self
    }

    /// Telegram token when Telegram is enabled and a token is set.
    #[must_use]
    pub fn telegram_token(&self) -> Option<&str> {
        self.telegram
            .token
            .as_deref()
            .filter(|t| self.telegram.enabled && !t.trim().is_empty())
    }

    /// Allowed Telegram user ids that parse as numbers.
    #[must_use]
    pub fn allowed_users(&self) -> Vec<i64> {
        self.telegram
            .allow_from
            .iter()
            .filter_map(|id| id.trim().parse().ok())
            .collect()
    }

    /// Check the configuration for problems.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.telegram.enabled && self.telegram_token().is_none() {
            issues.push(ConfigIssue::error(
                "telegram.token",
                format!("telegram is enabled but no token is set (config or {TOKEN_ENV})"),
            ));
        }
        for id in &self.telegram.allow_from {
            if id.trim().parse::<i64>().is_err() {
                issues.push(ConfigIssue::warning(
                    "telegram.allow_from",
                    format!("'{id}' is not a numeric user id and is ignored"),
                ));
            }
        }
        if self.schedule.refresh_hours <= 0 {
            issues.push(ConfigIssue::error(
                "schedule.refresh_hours",
                "must be a positive number of hours",
            ));
        }
        if self.schedule.check_interval_secs == 0 {
            issues.push(ConfigIssue::error(
                "schedule.check_interval_secs",
                "must be at least one second",
            ));
        }

        issues
    }

    /// Fail on the first error-level issue.
    pub fn ensure_valid(&self) -> ConfigResult<()> {
        match self
            .validate()
            .into_iter()
            .find(|issue| issue.level == IssueLevel::Error)
        {
            Some(issue) => Err(ConfigError::invalid(issue.to_string())),
            None => Ok(()),
        }
    }
}

/// Default config file location.
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load the default config file, falling back to defaults when it is missing.
pub async fn load_config() -> ConfigResult<BotConfig> {
    load_config_from(&config_path()).await
}

/// Load a config file, falling back to defaults when it is missing.
pub async fn load_config_from(path: &Path) -> ConfigResult<BotConfig> {
    let config = if tokio::fs::try_exists(path).await? {
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content)?
    } else {
        debug!(path = %path.display(), "no config file, using defaults");
        BotConfig::default()
    };
    Ok(config.with_env())
}

/// Write `config` to `path`, creating parent directories.
pub async fn save_config_to(config: &BotConfig, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    info!(path = %path.display(), "config saved");
    Ok(())
}

/// Write `config` to the default location.
pub async fn save_config(config: &BotConfig) -> ConfigResult<()> {
    save_config_to(config, &config_path()).await
}

/// Write a default config file and return it.
pub async fn init_config() -> ConfigResult<BotConfig> {
    let config = BotConfig::default();
    save_config(&config).await?;
    Ok(config)
}
