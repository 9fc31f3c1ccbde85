//! Opaque change-detection tokens for materialized assets.
//!
//! A fingerprint summarizes everything that determined an asset's data at its
//! last materialization: its code version, the fingerprints of the upstream
//! data it read, and the data version the backend reported. Two equal
//! fingerprints mean "same logical state"; they say nothing about how much
//! changed.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::asset::AssetKey;

/// Version of the fingerprint preimage format.
///
/// Increment when intentionally changing fingerprint semantics.
pub const FINGERPRINT_VERSION: u32 = 1;

/// SHA-256 based fingerprint, rendered as `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of one materialization.
    ///
    /// Upstream pairs are hashed in key order; every field is length-prefixed
    /// so adjacent fields cannot run into each other.
    #[must_use]
    pub fn compute(
        code_version: &str,
        upstreams: &BTreeMap<AssetKey, Fingerprint>,
        data_version: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("fresco-asset:v{FINGERPRINT_VERSION}:").as_bytes());
        update_field(&mut hasher, code_version);
        hasher.update((upstreams.len() as u64).to_be_bytes());
        for (key, fingerprint) in upstreams {
            update_field(&mut hasher, &key.canonical_string());
            update_field(&mut hasher, fingerprint.as_str());
        }
        update_field(&mut hasher, data_version);
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    /// Wraps an existing fingerprint string (e.g. loaded from storage).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the fingerprint string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint of an ordered materialization plan, for spotting identical
/// consecutive plans.
#[must_use]
pub fn plan_fingerprint(keys: &[AssetKey]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("fresco-plan:v{FINGERPRINT_VERSION}:").as_bytes());
    for key in keys {
        update_field(&mut hasher, &key.canonical_string());
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

fn update_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}
