//! Reconciler configuration.

use std::time::Duration;

use serde::Deserialize;

use fresco_core::LogFormat;

use crate::error::{Error, Result};

/// Exponential backoff applied to assets whose materializations keep failing.
///
/// After `n` consecutive failures an asset is not planned again until
/// `last_failure + min(base * 2^(n-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BackoffConfig {
    /// Whether failed assets are held back at all.
    pub enabled: bool,
    /// Delay after the first failure.
    #[serde(with = "duration_secs")]
    pub base: Duration,
    /// Upper bound on the delay.
    #[serde(with = "duration_secs")]
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base: Duration::from_secs(30),
            max: Duration::from_secs(30 * 60),
        }
    }
}

impl BackoffConfig {
    /// A configuration that never holds assets back.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Returns the delay after `consecutive_failures` failures in a row.
    #[must_use]
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = consecutive_failures.saturating_sub(1).min(31);
        self.base
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max)
    }
}

/// Configuration for a reconciler and the service that drives it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ReconcilerConfig {
    /// Interval between ticks when driven by the service's ticker.
    #[serde(with = "duration_secs")]
    pub tick_interval: Duration,
    /// Failure backoff.
    pub backoff: BackoffConfig,
    /// Evict keys that stay in flight longer than this. `None` disables the
    /// watchdog.
    #[serde(with = "optional_duration_secs")]
    pub in_flight_ceiling: Option<Duration>,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
            in_flight_ceiling: None,
            log_format: LogFormat::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Loads configuration from `FRESCO_*` environment variables, falling
    /// back to defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a variable is set but invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(secs) = env_u64("FRESCO_TICK_INTERVAL_SECS")? {
            if secs == 0 {
                return Err(Error::configuration(
                    "FRESCO_TICK_INTERVAL_SECS must be greater than zero",
                ));
            }
            config.tick_interval = Duration::from_secs(secs);
        }
        if let Some(enabled) = env_bool("FRESCO_BACKOFF_ENABLED")? {
            config.backoff.enabled = enabled;
        }
        if let Some(secs) = env_u64("FRESCO_BACKOFF_BASE_SECS")? {
            config.backoff.base = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("FRESCO_BACKOFF_MAX_SECS")? {
            config.backoff.max = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("FRESCO_IN_FLIGHT_CEILING_SECS")? {
            config.in_flight_ceiling = Some(Duration::from_secs(secs));
        }
        if let Some(format) = env_string("FRESCO_LOG_FORMAT") {
            config.log_format = parse_log_format("FRESCO_LOG_FORMAT", &format)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the backoff bounds are inverted.
    pub fn validate(&self) -> Result<()> {
        if self.backoff.base > self.backoff.max {
            return Err(Error::configuration(format!(
                "backoff base ({}s) exceeds backoff max ({}s)",
                self.backoff.base.as_secs(),
                self.backoff.max.as_secs()
            )));
        }
        Ok(())
    }
}

fn parse_log_format(name: &str, value: &str) -> Result<LogFormat> {
    LogFormat::from_name(value).ok_or_else(|| {
        Error::configuration(format!(
            "{name} must be 'json' or 'pretty', got '{value}'"
        ))
    })
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::configuration(format!("{name} must be a u64: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::configuration(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod optional_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}
