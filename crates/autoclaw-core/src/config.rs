//! AutoClaw configuration system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AutoClawError, Result};
use crate::types::Region;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoClawConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub playbooks: PlaybookConfig,
    #[serde(default = "default_triggers")]
    pub triggers: Vec<TriggerConfig>,
}

impl Default for AutoClawConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            watcher: WatcherConfig::default(),
            state: StateConfig::default(),
            scheduler: SchedulerConfig::default(),
            playbooks: PlaybookConfig::default(),
            triggers: default_triggers(),
        }
    }
}

impl AutoClawConfig {
    /// Load config from the default path (~/.autoclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AutoClawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AutoClawError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let exec = &self.executor;
        if exec.match_retries == 0 {
            return Err(AutoClawError::Config(
                "executor.match_retries must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&exec.match_threshold) {
            return Err(AutoClawError::Config(format!(
                "executor.match_threshold must be within 0..=1, got {}",
                exec.match_threshold
            )));
        }
        if exec.retry_delay_min_ms > exec.retry_delay_max_ms {
            return Err(AutoClawError::Config(
                "executor.retry_delay_min_ms exceeds retry_delay_max_ms".into(),
            ));
        }
        if self.watcher.interval_ms == 0 || self.scheduler.tick_secs == 0 {
            return Err(AutoClawError::Config(
                "watcher.interval_ms and scheduler.tick_secs must be positive".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for trigger in &self.triggers {
            if !seen.insert(trigger.name.as_str()) {
                return Err(AutoClawError::Config(format!(
                    "duplicate trigger name '{}'",
                    trigger.name
                )));
            }
            if matches!(trigger.schedule, TriggerSchedule::Interval(0)) {
                return Err(AutoClawError::Config(format!(
                    "trigger '{}' has a zero interval",
                    trigger.name
                )));
            }
            let too_long = |secs: u64| secs > MAX_TRIGGER_SECS;
            if matches!(trigger.schedule, TriggerSchedule::Interval(secs) if too_long(secs))
                || trigger.min_interval_secs.is_some_and(too_long)
            {
                return Err(AutoClawError::Config(format!(
                    "trigger '{}': intervals are limited to {MAX_TRIGGER_SECS}s",
                    trigger.name
                )));
            }
        }
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AutoClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the AutoClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autoclaw")
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).as_ref())
}

/// Action executor pacing and locate budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Minimum spacing between two physical actions.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Locate attempts per step before giving up with NotFound.
    #[serde(default = "default_match_retries")]
    pub match_retries: u32,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    #[serde(default = "default_retry_delay_min_ms")]
    pub retry_delay_min_ms: u64,
    #[serde(default = "default_retry_delay_max_ms")]
    pub retry_delay_max_ms: u64,
    #[serde(default = "default_move_duration_ms")]
    pub move_duration_ms: u64,
    /// Max random offset applied to every pointer target, in pixels.
    #[serde(default = "default_jitter_px")]
    pub jitter_px: i32,
    /// Poll spacing for wait_for steps.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// wait_for timeout when a step does not set one.
    #[serde(default = "default_wait_timeout_secs")]
    pub default_timeout_secs: f64,
    /// hold/wait duration when a step does not set one.
    #[serde(default = "default_duration_secs")]
    pub default_duration_secs: f64,
}

fn default_cooldown_ms() -> u64 { 500 }
fn default_match_retries() -> u32 { 3 }
fn default_match_threshold() -> f32 { 0.8 }
fn default_retry_delay_min_ms() -> u64 { 300 }
fn default_retry_delay_max_ms() -> u64 { 800 }
fn default_move_duration_ms() -> u64 { 200 }
fn default_jitter_px() -> i32 { 2 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_wait_timeout_secs() -> f64 { 10.0 }
fn default_duration_secs() -> f64 { 1.0 }

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            match_retries: default_match_retries(),
            match_threshold: default_match_threshold(),
            retry_delay_min_ms: default_retry_delay_min_ms(),
            retry_delay_max_ms: default_retry_delay_max_ms(),
            move_duration_ms: default_move_duration_ms(),
            jitter_px: default_jitter_px(),
            poll_interval_ms: default_poll_interval_ms(),
            default_timeout_secs: default_wait_timeout_secs(),
            default_duration_secs: default_duration_secs(),
        }
    }
}

/// Resource watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_watch_region")]
    pub region: Region,
    #[serde(default = "default_watch_interval_ms")]
    pub interval_ms: u64,
    /// Playbook enqueued when the reading goes up.
    #[serde(default = "default_on_increase")]
    pub on_increase: String,
}

fn bool_true() -> bool { true }
fn default_watch_region() -> Region { Region::new(500, 300, 200, 50) }
fn default_watch_interval_ms() -> u64 { 1000 }
fn default_on_increase() -> String { "resource_gain".into() }

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            region: default_watch_region(),
            interval_ms: default_watch_interval_ms(),
            on_increase: default_on_increase(),
        }
    }
}

/// Durable state location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: String,
}

fn default_state_path() -> String { "~/.autoclaw/bot_data.json".into() }

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// Trigger engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

fn default_tick_secs() -> u64 { 1 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
        }
    }
}

/// Where playbooks come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookConfig {
    /// Directory of `<name>.toml` playbook manifests.
    #[serde(default = "default_playbook_dir")]
    pub dir: String,
    /// Register the builtin playbooks before loading the directory.
    #[serde(default = "bool_true")]
    pub builtin: bool,
}

fn default_playbook_dir() -> String { "~/.autoclaw/playbooks".into() }

impl Default for PlaybookConfig {
    fn default() -> Self {
        Self {
            dir: default_playbook_dir(),
            builtin: true,
        }
    }
}

/// When a trigger fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSchedule {
    /// 5-field cron expression in local time (e.g., "0 9 * * *").
    Cron(String),
    /// Every N seconds.
    Interval(u64),
    /// Once at a fixed instant.
    Once(DateTime<Utc>),
}

impl std::fmt::Display for TriggerSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cron(expr) => write!(f, "cron({expr})"),
            Self::Interval(secs) => {
                if *secs >= 3600 {
                    write!(f, "every {}h", secs / 3600)
                } else if *secs >= 60 {
                    write!(f, "every {}min", secs / 60)
                } else {
                    write!(f, "every {secs}s")
                }
            }
            Self::Once(at) => write!(f, "once at {}", at.to_rfc3339()),
        }
    }
}

/// Longest trigger interval or minimum spacing accepted (one year).
pub const MAX_TRIGGER_SECS: u64 = 365 * 24 * 3600;

/// A time-based producer of playbook tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub name: String,
    /// Playbook to enqueue when the trigger fires.
    pub playbook: String,
    pub schedule: TriggerSchedule,
    /// Skip a firing when the previous one was less than this long ago.
    #[serde(default)]
    pub min_interval_secs: Option<u64>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn default_triggers() -> Vec<TriggerConfig> {
    vec![
        TriggerConfig {
            name: "daily_login".into(),
            playbook: "daily_login".into(),
            schedule: TriggerSchedule::Cron("0 9 * * *".into()),
            min_interval_secs: None,
            enabled: true,
        },
        TriggerConfig {
            name: "mail_check".into(),
            playbook: "mail_check".into(),
            schedule: TriggerSchedule::Interval(600),
            min_interval_secs: Some(7200),
            enabled: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AutoClawConfig::default();
        assert_eq!(config.executor.cooldown_ms, 500);
        assert_eq!(config.executor.match_retries, 3);
        assert!((config.executor.match_threshold - 0.8).abs() < 0.001);
        assert_eq!(config.watcher.region, Region::new(500, 300, 200, 50));
        assert_eq!(config.triggers.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [executor]
            cooldown_ms = 250
            match_retries = 5

            [watcher]
            enabled = false
            region = { left = 10, top = 20, width = 80, height = 30 }
            on_increase = "confirm_gift"

            [[triggers]]
            name = "collect"
            playbook = "collect_rewards"
            schedule = { cron = "30 8 * * *" }

            [[triggers]]
            name = "arena"
            playbook = "arena_run"
            schedule = { interval = 900 }
            min_interval_secs = 3600
        "#;

        let config: AutoClawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.executor.cooldown_ms, 250);
        assert_eq!(config.executor.match_retries, 5);
        assert_eq!(config.executor.jitter_px, 2);
        assert!(!config.watcher.enabled);
        assert_eq!(config.watcher.on_increase, "confirm_gift");
        assert_eq!(config.triggers.len(), 2);
        assert_eq!(
            config.triggers[0].schedule,
            TriggerSchedule::Cron("30 8 * * *".into())
        );
        assert_eq!(config.triggers[1].min_interval_secs, Some(3600));
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: AutoClawConfig = toml::from_str("").unwrap();
        assert_eq!(config.scheduler.tick_secs, 1);
        assert_eq!(config.watcher.interval_ms, 1000);
        assert_eq!(config.triggers[0].name, "daily_login");
    }

    #[test]
    fn test_validate_rejects_duplicate_triggers() {
        let mut config = AutoClawConfig::default();
        config.triggers.push(config.triggers[0].clone());
        assert!(matches!(config.validate(), Err(AutoClawError::Config(_))));
    }

    #[test]
    fn test_validate_bounds_trigger_intervals() {
        let mut config = AutoClawConfig::default();
        config.triggers[0].schedule = TriggerSchedule::Interval(MAX_TRIGGER_SECS);
        config.triggers[0].min_interval_secs = Some(MAX_TRIGGER_SECS);
        assert!(config.validate().is_ok());

        config.triggers[0].schedule = TriggerSchedule::Interval(u64::MAX);
        assert!(matches!(config.validate(), Err(AutoClawError::Config(_))));

        config.triggers[0].schedule = TriggerSchedule::Interval(600);
        config.triggers[0].min_interval_secs = Some(MAX_TRIGGER_SECS + 1);
        assert!(matches!(config.validate(), Err(AutoClawError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_match_retries() {
        let mut config = AutoClawConfig::default();
        config.executor.match_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schedule_display() {
        assert_eq!(TriggerSchedule::Interval(600).to_string(), "every 10min");
        assert_eq!(TriggerSchedule::Interval(7200).to_string(), "every 2h");
        assert_eq!(
            TriggerSchedule::Cron("0 9 * * *".into()).to_string(),
            "cron(0 9 * * *)"
        );
    }

    #[test]
    fn test_home_dir() {
        let home = AutoClawConfig::home_dir();
        assert!(home.to_string_lossy().contains("autoclaw"));
    }
}
