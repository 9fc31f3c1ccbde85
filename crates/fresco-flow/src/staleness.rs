//! Staleness Evaluator.
//!
//! An asset is stale when its last successful materialization no longer
//! reflects its inputs:
//!
//! - it has never materialized;
//! - its code version changed since that run;
//! - its declared dependency set changed since that run;
//! - an upstream's current fingerprint differs from the snapshot; or
//! - an upstream is itself stale.
//!
//! The evaluation visits every asset once in topological order, so the
//! "upstream is stale" check reads an already computed result. Cost is
//! O(nodes + edges) per tick.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::asset::AssetKey;
use crate::error::Result;
use crate::graph::AssetGraph;
use crate::ledger::MaterializationLedger;

/// Why an asset is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StalenessReason {
    /// The asset has no ledger record.
    NeverMaterialized,
    /// The declared code version differs from the one recorded at run time.
    CodeVersionChanged {
        /// Code version recorded by the last run.
        recorded: String,
        /// Currently declared code version.
        declared: String,
    },
    /// The declared upstream set differs from the snapshot's upstream set.
    DependenciesChanged,
    /// An upstream rematerialized with different data since the last run.
    UpstreamChanged {
        /// The upstream whose fingerprint changed.
        upstream: AssetKey,
    },
    /// An upstream is itself stale.
    UpstreamStale {
        /// The stale upstream.
        upstream: AssetKey,
    },
}

impl StalenessReason {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NeverMaterialized => "never_materialized",
            Self::CodeVersionChanged { .. } => "code_version_changed",
            Self::DependenciesChanged => "dependencies_changed",
            Self::UpstreamChanged { .. } => "upstream_changed",
            Self::UpstreamStale { .. } => "upstream_stale",
        }
    }
}

/// Result of one staleness evaluation over a graph snapshot.
#[derive(Debug, Clone, Default)]
pub struct StalenessReport {
    stale: HashMap<AssetKey, StalenessReason>,
    /// Stale keys in topological order.
    order: Vec<AssetKey>,
}

impl StalenessReport {
    /// Returns true if `key` is stale.
    ///
    /// Keys outside the evaluated graph are reported as not stale.
    #[must_use]
    pub fn is_stale(&self, key: &AssetKey) -> bool {
        self.stale.contains_key(key)
    }

    /// Returns why `key` is stale.
    #[must_use]
    pub fn reason(&self, key: &AssetKey) -> Option<&StalenessReason> {
        self.stale.get(key)
    }

    /// Iterates over stale assets in topological order.
    pub fn stale_assets(&self) -> impl Iterator<Item = (&AssetKey, &StalenessReason)> + '_ {
        self.order
            .iter()
            .filter_map(|key| self.stale.get(key).map(|reason| (key, reason)))
    }

    /// Returns the number of stale assets.
    #[must_use]
    pub fn stale_count(&self) -> usize {
        self.order.len()
    }
}

/// Evaluates staleness of every asset against the ledger.
#[derive(Debug, Clone, Copy)]
pub struct StalenessEvaluator<'a> {
    graph: &'a AssetGraph,
    ledger: &'a MaterializationLedger,
}

impl<'a> StalenessEvaluator<'a> {
    /// Creates an evaluator over a graph snapshot and the current ledger.
    #[must_use]
    pub const fn new(graph: &'a AssetGraph, ledger: &'a MaterializationLedger) -> Self {
        Self { graph, ledger }
    }

    /// Evaluates every asset in one topological pass.
    ///
    /// # Errors
    ///
    /// Propagates graph lookup errors, which a validated graph never yields.
    pub fn evaluate(&self) -> Result<StalenessReport> {
        let mut report = StalenessReport::default();

        for key in self.graph.topological_keys() {
            if let Some(reason) = self.check(key, &report)? {
                report.stale.insert(key.clone(), reason);
                report.order.push(key.clone());
            }
        }

        tracing::debug!(
            assets = self.graph.len(),
            stale = report.stale_count(),
            "staleness evaluated"
        );
        Ok(report)
    }

    fn check(&self, key: &AssetKey, report: &StalenessReport) -> Result<Option<StalenessReason>> {
        let Some(record) = self.ledger.record(key) else {
            return Ok(Some(StalenessReason::NeverMaterialized));
        };

        if let Some(definition) = self.graph.definition(key) {
            if definition.code_version != record.code_fingerprint_at_run {
                return Ok(Some(StalenessReason::CodeVersionChanged {
                    recorded: record.code_fingerprint_at_run.clone(),
                    declared: definition.code_version.clone(),
                }));
            }
        }

        let upstreams = self.graph.upstreams(key)?;
        let snapshot_keys: BTreeSet<&AssetKey> = record.upstream_fingerprint_snapshot.keys().collect();
        let declared_keys: BTreeSet<&AssetKey> = upstreams.iter().collect();

        for upstream in &upstreams {
            let current = self.ledger.fingerprint(upstream);
            let recorded = record.upstream_fingerprint_snapshot.get(upstream);
            // Both absent means the upstream never materialized; that case is
            // covered by the upstream being stale below.
            if current.is_some() && current != recorded {
                return Ok(Some(StalenessReason::UpstreamChanged {
                    upstream: upstream.clone(),
                }));
            }
            if report.is_stale(upstream) {
                return Ok(Some(StalenessReason::UpstreamStale {
                    upstream: upstream.clone(),
                }));
            }
        }

        if snapshot_keys != declared_keys {
            return Ok(Some(StalenessReason::DependenciesChanged));
        }

        Ok(None)
    }
}
