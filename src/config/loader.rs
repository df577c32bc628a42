/// Configuration loading from TOML file with environment overrides
use std::path::Path;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::types::Frequency;

/// Environment prefix, e.g. `BARSYNC__BUDGET__DAILY_CALL_LIMIT=5000`
const ENV_PREFIX: &str = "BARSYNC";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig> {
    let path = path.as_ref();
    let built = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| SyncError::ConfigError(format!("Failed to read config {}: {}", path.display(), e)))?;

    let config: SyncConfig = built
        .try_deserialize()
        .map_err(|e| SyncError::ConfigError(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

/// Parse and validate a TOML document without touching the environment
pub fn parse_config(content: &str) -> Result<SyncConfig> {
    let config: SyncConfig = toml::from_str(content)
        .map_err(|e| SyncError::ConfigError(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &SyncConfig) -> Result<()> {
    // Budget
    if config.budget.daily_call_limit == 0 {
        return Err(SyncError::ConfigError("budget.daily_call_limit must be > 0".to_string()));
    }

    // History
    if config.history.workers == 0 {
        return Err(SyncError::ConfigError("history.workers must be >= 1".to_string()));
    }
    if config.history.minute_start_date < config.history.start_date {
        return Err(SyncError::ConfigError(
            "history.minute_start_date must not precede history.start_date".to_string(),
        ));
    }
    for (tag, days) in &config.history.integrity_windows {
        tag.parse::<Frequency>()
            .map_err(|_| SyncError::ConfigError(format!("Unknown integrity window frequency: {}", tag)))?;
        if *days < 0 {
            return Err(SyncError::ConfigError(format!(
                "Integrity window for {} must be >= 0, got {}",
                tag, days
            )));
        }
    }
    for tag in config.history.lookbacks.keys() {
        tag.parse::<Frequency>()
            .map_err(|_| SyncError::ConfigError(format!("Unknown lookback frequency: {}", tag)))?;
    }
    if config.history.limit_up.days < 1 {
        return Err(SyncError::ConfigError("history.limit_up.days must be >= 1".to_string()));
    }
    if !config.history.limit_up.frequency.is_intraday() {
        return Err(SyncError::ConfigError(
            "history.limit_up.frequency must be a minute frequency".to_string(),
        ));
    }

    // Retry
    if config.retry.max_attempts == 0 {
        return Err(SyncError::ConfigError("retry.max_attempts must be >= 1".to_string()));
    }
    if config.retry.multiplier < 1.0 {
        return Err(SyncError::ConfigError(format!(
            "retry.multiplier must be >= 1.0, got {}",
            config.retry.multiplier
        )));
    }

    // Realtime
    if config.realtime.enabled && config.realtime.poll_interval_secs == 0 {
        return Err(SyncError::ConfigError("realtime.poll_interval_secs must be > 0".to_string()));
    }
    if config.realtime.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(SyncError::ConfigError(format!(
            "Unknown realtime.timezone: {}",
            config.realtime.timezone
        )));
    }
    if config
        .realtime
        .timeframes
        .iter()
        .any(|tf| matches!(tf, Frequency::Weekly | Frequency::Monthly))
    {
        return Err(SyncError::ConfigError(
            "realtime.timeframes supports minute frequencies and d only".to_string(),
        ));
    }

    Ok(())
}
