//! Materialization Ledger: the last successful run of every asset.
//!
//! Records are created on an asset's first successful materialization and
//! overwritten on every later one; they are never deleted. An asset without
//! a record is stale by definition.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fresco_core::MaterializationId;

use crate::asset::AssetKey;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::graph::AssetGraph;

/// What the ledger remembers about an asset's last successful materialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializationRecord {
    /// Identifier of the materialization.
    pub materialization_id: MaterializationId,
    /// When the materialization completed.
    pub completed_at: DateTime<Utc>,
    /// Fingerprint of each upstream as observed when this run completed.
    ///
    /// Upstreams that had never materialized at that point are absent.
    #[serde(with = "snapshot_serde")]
    pub upstream_fingerprint_snapshot: BTreeMap<AssetKey, Fingerprint>,
    /// The asset's own code version at the time of the run.
    pub code_fingerprint_at_run: String,
    /// Data version reported by the backend, or the materialization ID.
    pub data_version: String,
    /// Fingerprint of the data this run produced.
    pub fingerprint: Fingerprint,
}

impl MaterializationRecord {
    /// Builds the record for a successful materialization of `key` completing
    /// at `completed_at`, snapshotting the upstream fingerprints currently in
    /// `ledger`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetNotFound`] if `key` is not declared in `graph`.
    pub fn for_success(
        graph: &AssetGraph,
        ledger: &MaterializationLedger,
        key: &AssetKey,
        data_version: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> Result<Self> {
        let definition = graph.definition(key).ok_or_else(|| Error::AssetNotFound {
            asset: key.to_string(),
        })?;

        let upstream_fingerprint_snapshot: BTreeMap<AssetKey, Fingerprint> = graph
            .upstreams(key)?
            .into_iter()
            .filter_map(|upstream| {
                let fingerprint = ledger.fingerprint(&upstream)?.clone();
                Some((upstream, fingerprint))
            })
            .collect();

        let materialization_id = MaterializationId::generate();
        let data_version = data_version.unwrap_or_else(|| materialization_id.to_string());
        let fingerprint = Fingerprint::compute(
            &definition.code_version,
            &upstream_fingerprint_snapshot,
            &data_version,
        );

        Ok(Self {
            materialization_id,
            completed_at,
            upstream_fingerprint_snapshot,
            code_fingerprint_at_run: definition.code_version.clone(),
            data_version,
            fingerprint,
        })
    }
}

/// In-memory view of every asset's latest [`MaterializationRecord`].
///
/// Owned by the reconciler; persistence goes through
/// [`crate::store::LedgerStore`].
#[derive(Debug, Clone, Default)]
pub struct MaterializationLedger {
    records: HashMap<AssetKey, MaterializationRecord>,
}

impl MaterializationLedger {
    /// Creates an empty ledger (cold start).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of assets with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no asset has ever materialized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the record for `key`.
    #[must_use]
    pub fn record(&self, key: &AssetKey) -> Option<&MaterializationRecord> {
        self.records.get(key)
    }

    /// Returns the current fingerprint of `key`.
    #[must_use]
    pub fn fingerprint(&self, key: &AssetKey) -> Option<&Fingerprint> {
        self.records.get(key).map(|r| &r.fingerprint)
    }

    /// Inserts or overwrites the record for `key`.
    pub fn insert(&mut self, key: AssetKey, record: MaterializationRecord) {
        self.records.insert(key, record);
    }

    /// Inserts `record` only if `key` has none yet; used when hydrating from
    /// storage so a record written by a completion is never clobbered.
    pub fn insert_if_absent(&mut self, key: AssetKey, record: MaterializationRecord) {
        self.records.entry(key).or_insert(record);
    }

    /// Records a successful materialization and returns the new record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetNotFound`] if `key` is not declared in `graph`.
    pub fn record_success(
        &mut self,
        graph: &AssetGraph,
        key: &AssetKey,
        data_version: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> Result<MaterializationRecord> {
        let record =
            MaterializationRecord::for_success(graph, self, key, data_version, completed_at)?;
        self.records.insert(key.clone(), record.clone());
        Ok(record)
    }
}

/// Serializes the snapshot as a JSON object keyed by canonical asset key.
mod snapshot_serde {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::asset::AssetKey;
    use crate::fingerprint::Fingerprint;

    pub(super) fn serialize<S>(
        snapshot: &BTreeMap<AssetKey, Fingerprint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let by_name: BTreeMap<String, &Fingerprint> = snapshot
            .iter()
            .map(|(key, fp)| (key.canonical_string(), fp))
            .collect();
        by_name.serialize(serializer)
    }

    pub(super) fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<AssetKey, Fingerprint>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let by_name = BTreeMap::<String, Fingerprint>::deserialize(deserializer)?;
        by_name
            .into_iter()
            .map(|(name, fp)| {
                name.parse::<AssetKey>()
                    .map(|key| (key, fp))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}
