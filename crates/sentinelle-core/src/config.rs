use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;

use crate::error::AppError;
use crate::models::CleanupTarget;
use crate::selector::DuePolicy;

/// Retention in days per cleanup target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    pub mentions_days: u32,
    pub alerts_days: u32,
    pub reports_days: u32,
    pub logs_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            mentions_days: 90,
            alerts_days: 30,
            reports_days: 365,
            logs_days: 14,
        }
    }
}

impl RetentionConfig {
    pub fn days_for(&self, target: CleanupTarget) -> u32 {
        match target {
            CleanupTarget::Mentions => self.mentions_days,
            CleanupTarget::Alerts => self.alerts_days,
            CleanupTarget::Reports => self.reports_days,
            CleanupTarget::Logs => self.logs_days,
        }
    }
}

/// Pipeline tunables, read from `SENTINELLE_*` environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub scheduler_interval: Duration,
    pub due_policy: DuePolicy,
    /// Maximum sources enqueued per scheduler pass.
    pub due_batch_limit: usize,
    /// Upper bound of the random delay added to each scheduled collection.
    pub collection_jitter: Duration,
    pub max_consecutive_errors: u32,
    pub collection_timeout: Duration,
    pub analysis_timeout: Duration,
    pub virality_alert_threshold: f64,
    pub critical_virality_threshold: f64,
    pub stall_timeout: Duration,
    pub retention: RetentionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scheduler_interval: Duration::from_secs(300),
            due_policy: DuePolicy::default(),
            due_batch_limit: 500,
            collection_jitter: Duration::from_secs(30),
            max_consecutive_errors: 5,
            collection_timeout: Duration::from_secs(120),
            analysis_timeout: Duration::from_secs(30),
            virality_alert_threshold: 0.7,
            critical_virality_threshold: 0.8,
            stall_timeout: Duration::from_secs(60),
            retention: RetentionConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let default_interval = env_or("SENTINELLE_DEFAULT_COLLECTION_INTERVAL_SECS", 21_600i64)?;
        let min_interval = env_or("SENTINELLE_MIN_COLLECTION_INTERVAL_SECS", 300i64)?;
        if default_interval <= 0 || min_interval <= 0 {
            return Err(AppError::ConfigError(
                "collection intervals must be positive".into(),
            ));
        }

        let virality: f64 = env_or(
            "SENTINELLE_VIRALITY_ALERT_THRESHOLD",
            defaults.virality_alert_threshold,
        )?;
        let critical: f64 = env_or(
            "SENTINELLE_CRITICAL_VIRALITY_THRESHOLD",
            defaults.critical_virality_threshold,
        )?;
        if !(0.0..=1.0).contains(&virality) || !(0.0..=1.0).contains(&critical) {
            return Err(AppError::ConfigError(
                "virality thresholds must be between 0 and 1".into(),
            ));
        }

        Ok(Self {
            scheduler_interval: secs("SENTINELLE_SCHEDULER_INTERVAL_SECS", 300)?,
            due_policy: DuePolicy {
                default_interval: TimeDelta::seconds(default_interval),
                min_interval: TimeDelta::seconds(min_interval),
            },
            due_batch_limit: env_or("SENTINELLE_DUE_BATCH_LIMIT", defaults.due_batch_limit)?,
            collection_jitter: Duration::from_secs(env_or(
                "SENTINELLE_COLLECTION_JITTER_SECS",
                defaults.collection_jitter.as_secs(),
            )?),
            max_consecutive_errors: env_or(
                "SENTINELLE_MAX_CONSECUTIVE_ERRORS",
                defaults.max_consecutive_errors,
            )?
            .max(1),
            collection_timeout: secs("SENTINELLE_COLLECTION_TIMEOUT_SECS", 120)?,
            analysis_timeout: secs("SENTINELLE_ANALYSIS_TIMEOUT_SECS", 30)?,
            virality_alert_threshold: virality,
            critical_virality_threshold: critical,
            stall_timeout: secs("SENTINELLE_STALL_TIMEOUT_SECS", 60)?,
            retention: RetentionConfig {
                mentions_days: env_or("SENTINELLE_RETENTION_MENTIONS_DAYS", 90)?,
                alerts_days: env_or("SENTINELLE_RETENTION_ALERTS_DAYS", 30)?,
                reports_days: env_or("SENTINELLE_RETENTION_REPORTS_DAYS", 365)?,
                logs_days: env_or("SENTINELLE_RETENTION_LOGS_DAYS", 14)?,
            },
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::ConfigError(format!("Invalid {key} '{raw}'"))),
    }
}

fn secs(key: &str, default: u64) -> Result<Duration, AppError> {
    let value: u64 = env_or(key, default)?;
    if value == 0 {
        return Err(AppError::ConfigError(format!("{key} must be at least 1")));
    }
    Ok(Duration::from_secs(value))
}
