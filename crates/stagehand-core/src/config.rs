//! Stagehand configuration system.
//!
//! Loaded from `~/.stagehand/config.toml` (or an explicit path), then
//! overlaid with environment variables for the secrets and the few knobs
//! operators flip at deploy time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StagehandError};

/// Longest look-back or wait window accepted for day/minute settings.
pub const MAX_WINDOW_DAYS: i64 = 3650;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagehandConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ats: AtsConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub advancement: AdvancementConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub feedback_sync: FeedbackSyncConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StagehandConfig {
    /// Load config from the default path, falling back to defaults, then
    /// apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific path. Environment overrides are not applied.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StagehandError::Configuration(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| StagehandError::Configuration(format!("Failed to parse config: {e}")))
    }

    /// Overlay well-known environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup (tests inject a map here).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("STAGEHAND_DB_PATH") {
            self.database.path = v;
        }
        if let Some(v) = non_empty("ATS_API_KEY") {
            self.ats.api_key = v;
        }
        if let Some(v) = non_empty("ATS_BASE_URL") {
            self.ats.base_url = v;
        }
        if let Some(v) = non_empty("SLACK_BOT_TOKEN") {
            self.notify.slack_bot_token = Some(v);
        }
        if let Some(v) = non_empty("ADMIN_SLACK_CHANNEL_ID") {
            self.notify.admin_channel_id = Some(v);
        }
        if let Some(v) = non_empty("ADVANCEMENT_DRY_RUN_MODE") {
            self.advancement.dry_run = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(v) = non_empty("ADVANCEMENT_FEEDBACK_TIMEOUT_DAYS") {
            match v.trim().parse() {
                Ok(days) => self.advancement.feedback_timeout_days = days,
                Err(_) => tracing::warn!("Ignoring invalid ADVANCEMENT_FEEDBACK_TIMEOUT_DAYS={v}"),
            }
        }
        if let Some(v) = non_empty("ADVANCEMENT_FEEDBACK_MIN_WAIT_MINUTES") {
            match v.trim().parse() {
                Ok(mins) => self.advancement.feedback_min_wait_minutes = mins,
                Err(_) => tracing::warn!("Ignoring invalid ADVANCEMENT_FEEDBACK_MIN_WAIT_MINUTES={v}"),
            }
        }
        if let Some(v) = non_empty("DEFAULT_ARCHIVE_REASON_ID") {
            self.advancement.default_archive_reason_id = Some(v);
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.advancement.advance_max_attempts == 0 {
            return Err(StagehandError::Configuration(
                "advancement.advance_max_attempts must be at least 1".into(),
            ));
        }
        if self.enrichment.max_attempts == 0 {
            return Err(StagehandError::Configuration(
                "enrichment.max_attempts must be at least 1".into(),
            ));
        }
        if self.advancement.advance_retry_delays_secs.is_empty()
            || self.enrichment.retry_delays_ms.is_empty()
        {
            return Err(StagehandError::Configuration(
                "retry delay lists cannot be empty".into(),
            ));
        }
        if self.advancement.evaluation_interval_mins == 0 {
            return Err(StagehandError::Configuration(
                "advancement.evaluation_interval_mins must be at least 1".into(),
            ));
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&self.advancement.feedback_timeout_days) {
            return Err(StagehandError::Configuration(format!(
                "advancement.feedback_timeout_days must be between 1 and {MAX_WINDOW_DAYS}"
            )));
        }
        if !(0..=MAX_WINDOW_DAYS * 24 * 60).contains(&self.advancement.feedback_min_wait_minutes) {
            return Err(StagehandError::Configuration(format!(
                "advancement.feedback_min_wait_minutes must be between 0 and {}",
                MAX_WINDOW_DAYS * 24 * 60
            )));
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&self.enrichment.refetch_lookback_days) {
            return Err(StagehandError::Configuration(format!(
                "enrichment.refetch_lookback_days must be between 1 and {MAX_WINDOW_DAYS}"
            )));
        }
        let r = &self.reminders;
        if r.window_start_mins < 0
            || r.window_end_mins <= r.window_start_mins
            || r.window_end_mins > MAX_WINDOW_DAYS * 24 * 60
        {
            return Err(StagehandError::Configuration(
                "reminders window must satisfy 0 <= window_start_mins < window_end_mins".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Stagehand home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".stagehand")
    }
}

/// SQLite location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.stagehand/stagehand.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Applicant tracking system API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtsConfig {
    #[serde(default = "default_ats_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_ats_timeout")]
    pub timeout_secs: u64,
    /// Prefix for candidate profile links in notifications.
    #[serde(default = "default_profile_url_base")]
    pub profile_url_base: String,
}

fn default_ats_base_url() -> String { "https://api.ashbyhq.com".into() }
fn default_ats_timeout() -> u64 { 30 }
fn default_profile_url_base() -> String { "https://app.ashbyhq.com/candidates".into() }

impl Default for AtsConfig {
    fn default() -> Self {
        Self {
            base_url: default_ats_base_url(),
            api_key: String::new(),
            timeout_secs: default_ats_timeout(),
            profile_url_base: default_profile_url_base(),
        }
    }
}

/// Where operator notifications go.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Chat channel for rejection prompts and error alerts.
    #[serde(default)]
    pub admin_channel_id: Option<String>,
    #[serde(default)]
    pub slack_bot_token: Option<String>,
    /// Generic JSON webhook receiving the same notifications.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Decision engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancementConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_timeout_days")]
    pub feedback_timeout_days: i64,
    #[serde(default = "default_min_wait")]
    pub feedback_min_wait_minutes: i64,
    #[serde(default = "default_eval_interval")]
    pub evaluation_interval_mins: u64,
    /// Upper bound on one schedule's evaluation within a tick.
    #[serde(default = "default_schedule_timeout")]
    pub schedule_timeout_secs: u64,
    #[serde(default)]
    pub default_archive_reason_id: Option<String>,
    #[serde(default = "default_advance_attempts")]
    pub advance_max_attempts: u32,
    #[serde(default = "default_advance_delays")]
    pub advance_retry_delays_secs: Vec<u64>,
}

fn default_timeout_days() -> i64 { 7 }
fn default_min_wait() -> i64 { 30 }
fn default_eval_interval() -> u64 { 30 }
fn default_schedule_timeout() -> u64 { 120 }
fn default_advance_attempts() -> u32 { 3 }
fn default_advance_delays() -> Vec<u64> { vec![2, 4, 8] }

impl Default for AdvancementConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            feedback_timeout_days: default_timeout_days(),
            feedback_min_wait_minutes: default_min_wait(),
            evaluation_interval_mins: default_eval_interval(),
            schedule_timeout_secs: default_schedule_timeout(),
            default_archive_reason_id: None,
            advance_max_attempts: default_advance_attempts(),
            advance_retry_delays_secs: default_advance_delays(),
        }
    }
}

/// Stage → plan/job resolution and the refetch sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_enrich_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_enrich_delays")]
    pub retry_delays_ms: Vec<u64>,
    #[serde(default = "default_refetch_interval")]
    pub refetch_interval_mins: u64,
    #[serde(default = "default_refetch_batch")]
    pub refetch_batch_size: u32,
    #[serde(default = "default_refetch_lookback")]
    pub refetch_lookback_days: i64,
}

fn default_enrich_attempts() -> u32 { 3 }
fn default_enrich_delays() -> Vec<u64> { vec![500, 1000] }
fn default_refetch_interval() -> u64 { 60 }
fn default_refetch_batch() -> u32 { 50 }
fn default_refetch_lookback() -> i64 { 7 }

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_enrich_attempts(),
            retry_delays_ms: default_enrich_delays(),
            refetch_interval_mins: default_refetch_interval(),
            refetch_batch_size: default_refetch_batch(),
            refetch_lookback_days: default_refetch_lookback(),
        }
    }
}

/// Feedback pull from the ATS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSyncConfig {
    #[serde(default = "default_sync_interval")]
    pub interval_mins: u64,
}

fn default_sync_interval() -> u64 { 30 }

impl Default for FeedbackSyncConfig {
    fn default() -> Self {
        Self { interval_mins: default_sync_interval() }
    }
}

/// Pre-interview reminders sent to each assigned interviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reminder_interval")]
    pub interval_mins: u64,
    /// Events starting between `window_start_mins` and `window_end_mins`
    /// from now are reminded. The window is wider than the interval so no
    /// event slips between two runs.
    #[serde(default = "default_window_start")]
    pub window_start_mins: i64,
    #[serde(default = "default_window_end")]
    pub window_end_mins: i64,
}

fn default_true() -> bool { true }
fn default_reminder_interval() -> u64 { 5 }
fn default_window_start() -> i64 { 4 }
fn default_window_end() -> i64 { 20 }

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_mins: default_reminder_interval(),
            window_start_mins: default_window_start(),
            window_end_mins: default_window_end(),
        }
    }
}

/// HTTP gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 8000 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = StagehandConfig::default();
        assert!(!cfg.advancement.dry_run);
        assert_eq!(cfg.advancement.feedback_timeout_days, 7);
        assert_eq!(cfg.advancement.feedback_min_wait_minutes, 30);
        assert_eq!(cfg.advancement.advance_retry_delays_secs, vec![2, 4, 8]);
        assert_eq!(cfg.enrichment.refetch_batch_size, 50);
        assert_eq!(cfg.gateway.port, 8000);
        assert!(cfg.reminders.enabled);
        assert_eq!((cfg.reminders.window_start_mins, cfg.reminders.window_end_mins), (4, 20));
        assert!(cfg.notify.admin_channel_id.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let cfg = StagehandConfig::from_toml(
            r#"
            [advancement]
            dry_run = true
            feedback_min_wait_minutes = 5

            [notify]
            admin_channel_id = "C123"
            "#,
        )
        .unwrap();
        assert!(cfg.advancement.dry_run);
        assert_eq!(cfg.advancement.feedback_min_wait_minutes, 5);
        assert_eq!(cfg.advancement.feedback_timeout_days, 7);
        assert_eq!(cfg.notify.admin_channel_id.as_deref(), Some("C123"));
    }

    #[test]
    fn test_bad_toml() {
        let err = StagehandConfig::from_toml("[advancement\n").unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ADVANCEMENT_DRY_RUN_MODE", "TRUE"),
            ("ADVANCEMENT_FEEDBACK_TIMEOUT_DAYS", "14"),
            ("ADVANCEMENT_FEEDBACK_MIN_WAIT_MINUTES", "not-a-number"),
            ("DEFAULT_ARCHIVE_REASON_ID", "reason-1"),
            ("ADMIN_SLACK_CHANNEL_ID", ""),
        ]
        .into_iter()
        .collect();

        let mut cfg = StagehandConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert!(cfg.advancement.dry_run);
        assert_eq!(cfg.advancement.feedback_timeout_days, 14);
        assert_eq!(cfg.advancement.feedback_min_wait_minutes, 30);
        assert_eq!(cfg.advancement.default_archive_reason_id.as_deref(), Some("reason-1"));
        assert!(cfg.notify.admin_channel_id.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut cfg = StagehandConfig::default();
        cfg.advancement.advance_max_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_time_windows() {
        let cfg = StagehandConfig::from_toml(
            r#"
            [advancement]
            feedback_timeout_days = 1000000000000000
            "#,
        )
        .unwrap();
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        let mut cfg = StagehandConfig::default();
        cfg.advancement.feedback_min_wait_minutes = i64::MAX;
        assert!(cfg.validate().is_err());

        let mut cfg = StagehandConfig::default();
        cfg.enrichment.refetch_lookback_days = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = StagehandConfig::default();
        cfg.reminders.window_end_mins = cfg.reminders.window_start_mins;
        assert!(cfg.validate().is_err());

        let mut cfg = StagehandConfig::default();
        cfg.advancement.feedback_timeout_days = MAX_WINDOW_DAYS;
        cfg.advancement.feedback_min_wait_minutes = 0;
        assert!(cfg.validate().is_ok());
    }
}
