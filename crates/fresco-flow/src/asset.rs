//! Asset declarations: keys, dependencies, freshness policies, code versions.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Asset identifier (namespace + name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetKey {
    /// Namespace (e.g., "raw", "staging", "mart").
    pub namespace: String,
    /// Asset name within the namespace.
    pub name: String,
}

impl AssetKey {
    /// Creates a new asset key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns the canonical string representation (namespace/name).
    #[must_use]
    pub fn canonical_string(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for AssetKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(Error::Core(fresco_core::Error::InvalidInput(format!(
                "asset key must be 'namespace/name', got '{s}'"
            )))),
        }
    }
}

/// Maximum tolerable lag of an asset's data.
///
/// The lag is stored as integer milliseconds so declarations serialize
/// identically everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessPolicy {
    /// Maximum allowed lag in milliseconds.
    pub maximum_lag_ms: u64,
}

impl FreshnessPolicy {
    /// Creates a policy from a lag duration. Negative lags clamp to zero.
    #[must_use]
    pub fn new(maximum_lag: Duration) -> Self {
        Self {
            maximum_lag_ms: u64::try_from(maximum_lag.num_milliseconds()).unwrap_or(0),
        }
    }

    /// Creates a policy with a lag in whole minutes.
    #[must_use]
    pub fn from_minutes(minutes: i64) -> Self {
        Self::new(Duration::try_minutes(minutes).unwrap_or(Duration::MAX))
    }

    /// Returns the maximum lag.
    #[must_use]
    pub fn maximum_lag(&self) -> Duration {
        i64::try_from(self.maximum_lag_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .unwrap_or(Duration::MAX)
    }

    /// Returns true for a zero-lag ("always fresh") policy.
    #[must_use]
    pub const fn is_always_fresh(&self) -> bool {
        self.maximum_lag_ms == 0
    }
}

/// Declaration of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDefinition {
    /// Key of the asset.
    pub key: AssetKey,
    /// Upstream asset keys this asset reads from.
    #[serde(default)]
    pub deps: Vec<AssetKey>,
    /// Optional freshness policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness_policy: Option<FreshnessPolicy>,
    /// Version of the asset's defining logic. Changing it makes the asset stale.
    #[serde(default)]
    pub code_version: String,
}

impl AssetDefinition {
    /// Creates a source-like definition with no dependencies and no policy.
    #[must_use]
    pub fn new(key: AssetKey) -> Self {
        Self {
            key,
            deps: Vec::new(),
            freshness_policy: None,
            code_version: String::new(),
        }
    }

    /// Adds an upstream dependency.
    #[must_use]
    pub fn with_dep(mut self, upstream: AssetKey) -> Self {
        self.deps.push(upstream);
        self
    }

    /// Sets the freshness policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: FreshnessPolicy) -> Self {
        self.freshness_policy = Some(policy);
        self
    }

    /// Sets the code version.
    #[must_use]
    pub fn with_code_version(mut self, code_version: impl Into<String>) -> Self {
        self.code_version = code_version.into();
        self
    }
}

/// Execution status of an asset as seen by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Not part of any outstanding plan.
    Idle,
    /// Selected by the current tick, not yet handed to the backend.
    Planned,
    /// Submitted to the backend and awaiting a terminal result.
    InFlight,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Planned => write!(f, "planned"),
            Self::InFlight => write!(f, "in_flight"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_key_canonical_string_uses_slash_separator() {
        let key = AssetKey::new("raw", "events");
        assert_eq!(key.canonical_string(), "raw/events");
        assert_eq!(key.to_string(), "raw/events");
    }

    #[test]
    fn asset_key_parses_canonical_form() {
        let key: AssetKey = "staging/cleaned".parse().unwrap();
        assert_eq!(key, AssetKey::new("staging", "cleaned"));
        assert!("no_namespace".parse::<AssetKey>().is_err());
        assert!("/name".parse::<AssetKey>().is_err());
    }

    #[test]
    fn policy_lag_round_trips_through_millis() {
        let policy = FreshnessPolicy::new(Duration::minutes(2) + Duration::seconds(1));
        assert_eq!(policy.maximum_lag_ms, 121_000);
        assert_eq!(policy.maximum_lag(), Duration::seconds(121));
        assert!(!policy.is_always_fresh());
        assert!(FreshnessPolicy::new(Duration::zero()).is_always_fresh());
    }

    #[test]
    fn negative_lag_clamps_to_zero() {
        let policy = FreshnessPolicy::new(Duration::seconds(-5));
        assert!(policy.is_always_fresh());
    }

    #[test]
    fn definition_deserializes_with_defaults() {
        let json = r#"{"key":{"namespace":"raw","name":"events"}}"#;
        let def: AssetDefinition = serde_json::from_str(json).unwrap();
        assert!(def.deps.is_empty());
        assert!(def.freshness_policy.is_none());
        assert_eq!(def.code_version, "");
    }

    #[test]
    fn definition_builder_sets_fields() {
        let def = AssetDefinition::new(AssetKey::new("mart", "report"))
            .with_dep(AssetKey::new("raw", "events"))
            .with_policy(FreshnessPolicy::from_minutes(5))
            .with_code_version("v2");
        assert_eq!(def.deps, vec![AssetKey::new("raw", "events")]);
        assert_eq!(def.freshness_policy, Some(FreshnessPolicy::from_minutes(5)));
        assert_eq!(def.code_version, "v2");
    }
}
