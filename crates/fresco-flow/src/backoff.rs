//! Failure backoff for repeatedly failing assets.
//!
//! A failed materialization returns the asset to Idle, so the next tick
//! would normally re-plan it immediately. The gate holds such assets back
//! with exponentially growing delays until one run succeeds.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::asset::AssetKey;
use crate::config::BackoffConfig;
use crate::planner::SkipReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FailureState {
    consecutive: u32,
    retry_at: DateTime<Utc>,
}

/// Tracks consecutive failures per asset.
#[derive(Debug, Clone)]
pub struct BackoffGate {
    config: BackoffConfig,
    failures: HashMap<AssetKey, FailureState>,
}

impl BackoffGate {
    /// Creates a gate with no recorded failures.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: HashMap::new(),
        }
    }

    /// Records a failure of `key` at `now` and returns the instant before
    /// which it will not be planned again.
    pub fn record_failure(&mut self, key: &AssetKey, now: DateTime<Utc>) -> DateTime<Utc> {
        let consecutive = self
            .failures
            .get(key)
            .map_or(1, |state| state.consecutive.saturating_add(1));
        let delay = if self.config.enabled {
            chrono::Duration::from_std(self.config.delay_for(consecutive))
                .unwrap_or(chrono::Duration::MAX)
        } else {
            chrono::Duration::zero()
        };
        let retry_at = now
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.failures.insert(
            key.clone(),
            FailureState {
                consecutive,
                retry_at,
            },
        );
        retry_at
    }

    /// Clears the failure history of `key`.
    pub fn record_success(&mut self, key: &AssetKey) {
        self.failures.remove(key);
    }

    /// Returns the consecutive failure count of `key`.
    #[must_use]
    pub fn consecutive_failures(&self, key: &AssetKey) -> u32 {
        self.failures.get(key).map_or(0, |state| state.consecutive)
    }

    /// Returns when `key` may be planned again, if it is still held back.
    #[must_use]
    pub fn blocked_until(&self, key: &AssetKey, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.config.enabled {
            return None;
        }
        self.failures
            .get(key)
            .map(|state| state.retry_at)
            .filter(|retry_at| *retry_at > now)
    }

    /// Returns every asset held back at `now`, as planner exclusions.
    pub fn exclusions(&self, now: DateTime<Utc>) -> impl Iterator<Item = (AssetKey, SkipReason)> + '_ {
        self.failures.iter().filter_map(move |(key, state)| {
            (self.config.enabled && state.retry_at > now).then(|| {
                (
                    key.clone(),
                    SkipReason::BackingOff {
                        retry_at: state.retry_at,
                    },
                )
            })
        })
    }

    /// Drops failure history for assets no longer declared.
    pub fn retain(&mut self, mut keep: impl FnMut(&AssetKey) -> bool) {
        self.failures.retain(|key, _| keep(key));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;

    fn key() -> AssetKey {
        AssetKey::new("mart", "orders")
    }

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, second).unwrap()
    }

    fn config() -> BackoffConfig {
        BackoffConfig {
            enabled: true,
            base: Duration::from_secs(5),
            max: Duration::from_secs(12),
        }
    }

    #[test]
    fn failures_back_off_exponentially_and_cap() {
        let mut gate = BackoffGate::new(config());

        assert_eq!(gate.record_failure(&key(), at(0)), at(5));
        assert_eq!(gate.record_failure(&key(), at(5)), at(15));
        assert_eq!(gate.record_failure(&key(), at(15)), at(27));
        assert_eq!(gate.consecutive_failures(&key()), 3);
    }

    #[test]
    fn blocked_until_expires_at_retry_instant() {
        let mut gate = BackoffGate::new(config());
        gate.record_failure(&key(), at(0));

        assert_eq!(gate.blocked_until(&key(), at(4)), Some(at(5)));
        assert_eq!(gate.blocked_until(&key(), at(5)), None);
        assert_eq!(gate.exclusions(at(1)).count(), 1);
        assert_eq!(gate.exclusions(at(5)).count(), 0);
    }

    #[test]
    fn success_clears_history() {
        let mut gate = BackoffGate::new(config());
        gate.record_failure(&key(), at(0));
        gate.record_success(&key());

        assert_eq!(gate.consecutive_failures(&key()), 0);
        assert_eq!(gate.blocked_until(&key(), at(1)), None);
    }

    #[test]
    fn disabled_gate_never_blocks() {
        let mut gate = BackoffGate::new(BackoffConfig::disabled());
        gate.record_failure(&key(), at(0));

        assert_eq!(gate.blocked_until(&key(), at(0)), None);
        assert_eq!(gate.exclusions(at(0)).count(), 0);
        assert_eq!(gate.consecutive_failures(&key()), 1);
    }

    #[test]
    fn retain_forgets_undeclared_assets() {
        let mut gate = BackoffGate::new(config());
        gate.record_failure(&key(), at(0));
        gate.retain(|_| false);
        assert_eq!(gate.consecutive_failures(&key()), 0);
    }
}
