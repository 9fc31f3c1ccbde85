//! Run Planner.
//!
//! Turns staleness and freshness results into a deduplicated, topologically
//! ordered set of assets to materialize:
//!
//! ```text
//! candidates = stale assets without a policy
//!            ∪ minimal cause set of every violated policy
//! plan       = topological_order(candidates \ excluded)
//! ```
//!
//! Excluded assets are those already in flight or backing off after a
//! failure. Candidates downstream of an excluded candidate are held back as
//! well: running them before their upstream cannot make them current. Both
//! are reported as skipped rather than silently dropped. Planning is a pure
//! function of its inputs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::asset::AssetKey;
use crate::error::Result;
use crate::fingerprint::plan_fingerprint;
use crate::freshness::{FreshnessEvaluator, FreshnessReport};
use crate::graph::AssetGraph;
use crate::ledger::MaterializationLedger;
use crate::staleness::{StalenessEvaluator, StalenessReason, StalenessReport};

/// Why an asset was selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InclusionReason {
    /// The asset is stale.
    Stale {
        /// Why it is stale.
        reason: StalenessReason,
    },
    /// The asset is in the minimal cause set of a violated policy.
    Policy {
        /// The asset owning the violated policy.
        asset: AssetKey,
        /// The policy's maximum lag in milliseconds.
        maximum_lag_ms: u64,
    },
}

/// One asset in a [`RunPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    /// Asset to materialize.
    pub key: AssetKey,
    /// Every reason the asset was selected.
    pub reasons: Vec<InclusionReason>,
    /// The tightest violated policy that requires this asset, if any.
    ///
    /// When several violations share the asset it runs once; this records
    /// the one with the smallest lag (ties go to the smaller asset key).
    pub driving_policy: Option<AssetKey>,
}

/// Why a candidate was left out of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Already submitted and awaiting a terminal result.
    InFlight,
    /// Recently failed; not retried before `retry_at`.
    BackingOff {
        /// Earliest instant the asset may be planned again.
        retry_at: DateTime<Utc>,
    },
    /// A transitive upstream also needs work but is itself skipped.
    UpstreamPending {
        /// The skipped upstream holding this asset back.
        upstream: AssetKey,
    },
}

/// A candidate that was not planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedAsset {
    /// The candidate asset.
    pub key: AssetKey,
    /// Why it was skipped.
    pub reason: SkipReason,
}

/// Ordered set of assets to materialize this tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPlan {
    /// Entries in topological order (dependencies first).
    pub entries: Vec<PlanEntry>,
    /// Candidates excluded from this plan.
    pub skipped: Vec<SkippedAsset>,
    /// SHA-256 fingerprint of the ordered keys.
    pub fingerprint: String,
}

impl RunPlan {
    /// Returns the number of planned assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing needs to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the planned keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<AssetKey> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    /// Returns true if `key` is planned.
    #[must_use]
    pub fn contains(&self, key: &AssetKey) -> bool {
        self.entries.iter().any(|e| &e.key == key)
    }

    /// Returns the entry for `key`.
    #[must_use]
    pub fn entry(&self, key: &AssetKey) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| &e.key == key)
    }
}

/// Builds a [`RunPlan`] from one tick's evaluation results.
#[derive(Debug, Clone)]
pub struct RunPlanner<'a> {
    graph: &'a AssetGraph,
    staleness: &'a StalenessReport,
    freshness: &'a FreshnessReport,
    excluded: BTreeMap<AssetKey, SkipReason>,
}

impl<'a> RunPlanner<'a> {
    /// Creates a planner with nothing excluded.
    #[must_use]
    pub const fn new(
        graph: &'a AssetGraph,
        staleness: &'a StalenessReport,
        freshness: &'a FreshnessReport,
    ) -> Self {
        Self {
            graph,
            staleness,
            freshness,
            excluded: BTreeMap::new(),
        }
    }

    /// Excludes `key` from the plan.
    #[must_use]
    pub fn excluding(mut self, key: AssetKey, reason: SkipReason) -> Self {
        self.excluded.insert(key, reason);
        self
    }

    /// Excludes every key in `excluded`.
    #[must_use]
    pub fn excluding_all(mut self, excluded: impl IntoIterator<Item = (AssetKey, SkipReason)>) -> Self {
        self.excluded.extend(excluded);
        self
    }

    /// Computes the plan.
    ///
    /// # Errors
    ///
    /// Propagates graph lookup errors, which a validated graph never yields.
    #[tracing::instrument(
        skip(self),
        fields(
            stale = self.staleness.stale_count(),
            violations = self.freshness.violations().len(),
            excluded = self.excluded.len()
        )
    )]
    pub fn plan(&self) -> Result<RunPlan> {
        let mut reasons: BTreeMap<AssetKey, Vec<InclusionReason>> = BTreeMap::new();
        let mut driving: BTreeMap<AssetKey, (u64, AssetKey)> = BTreeMap::new();

        for (key, reason) in self.staleness.stale_assets() {
            if self.graph.policy(key).is_none() {
                reasons
                    .entry(key.clone())
                    .or_default()
                    .push(InclusionReason::Stale {
                        reason: reason.clone(),
                    });
            }
        }

        for violation in self.freshness.violations() {
            let lag = violation.policy.maximum_lag_ms;
            for member in &violation.minimal_cause {
                reasons
                    .entry(member.clone())
                    .or_default()
                    .push(InclusionReason::Policy {
                        asset: violation.asset.clone(),
                        maximum_lag_ms: lag,
                    });
                let candidate = (lag, violation.asset.clone());
                driving
                    .entry(member.clone())
                    .and_modify(|current| {
                        if candidate < *current {
                            *current = candidate.clone();
                        }
                    })
                    .or_insert_with(|| candidate.clone());
            }
        }

        if reasons.is_empty() {
            return Ok(RunPlan {
                fingerprint: plan_fingerprint(&[]),
                ..RunPlan::default()
            });
        }

        let held_back = self.held_back(&reasons)?;
        let mut skipped = Vec::new();
        let mut selected: BTreeSet<&AssetKey> = BTreeSet::new();
        for key in reasons.keys() {
            let reason = self.excluded.get(key).cloned().or_else(|| {
                held_back
                    .get(key)
                    .map(|upstream| SkipReason::UpstreamPending {
                        upstream: upstream.clone(),
                    })
            });
            match reason {
                Some(reason) => skipped.push(SkippedAsset {
                    key: key.clone(),
                    reason,
                }),
                None => {
                    selected.insert(key);
                }
            }
        }

        let ordered = self.graph.topological_order(selected)?;
        let fingerprint = plan_fingerprint(&ordered);
        let entries = ordered
            .into_iter()
            .map(|key| {
                let reasons = reasons.remove(&key).unwrap_or_default();
                let driving_policy = driving.remove(&key).map(|(_, asset)| asset);
                PlanEntry {
                    key,
                    reasons,
                    driving_policy,
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(planned = entries.len(), skipped = skipped.len(), "run plan built");
        Ok(RunPlan {
            entries,
            skipped,
            fingerprint,
        })
    }

    /// Maps every candidate with an excluded candidate among its transitive
    /// upstreams to one such upstream (the smallest key reaching it).
    fn held_back(
        &self,
        candidates: &BTreeMap<AssetKey, Vec<InclusionReason>>,
    ) -> Result<BTreeMap<AssetKey, AssetKey>> {
        let mut held = BTreeMap::new();
        if !candidates.keys().any(|key| self.excluded.contains_key(key)) {
            return Ok(held);
        }

        // Propagates through non-candidates too: a blocked upstream two hops
        // away still feeds the candidate.
        let mut blocked_by: HashMap<&AssetKey, &AssetKey> = HashMap::new();
        for key in self.graph.topological_keys() {
            if candidates.contains_key(key) && self.excluded.contains_key(key) {
                blocked_by.insert(key, key);
                continue;
            }
            let root = self
                .graph
                .upstreams(key)?
                .iter()
                .filter_map(|upstream| blocked_by.get(upstream).copied())
                .min();
            if let Some(root) = root {
                blocked_by.insert(key, root);
                if candidates.contains_key(key) {
                    held.insert(key.clone(), root.clone());
                }
            }
        }
        Ok(held)
    }
}

/// Everything one tick computes before deciding what to submit.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Staleness of every asset.
    pub staleness: StalenessReport,
    /// Violated policies and upcoming deadlines.
    pub freshness: FreshnessReport,
    /// Assets to materialize.
    pub plan: RunPlan,
}

/// Runs staleness, freshness, and planning against one graph snapshot.
///
/// # Errors
///
/// Propagates graph lookup errors, which a validated graph never yields.
pub fn evaluate(
    graph: &AssetGraph,
    ledger: &MaterializationLedger,
    excluded: impl IntoIterator<Item = (AssetKey, SkipReason)>,
    now: DateTime<Utc>,
) -> Result<Evaluation> {
    let staleness = StalenessEvaluator::new(graph, ledger).evaluate()?;
    let freshness = FreshnessEvaluator::new(graph, ledger, &staleness, now).evaluate()?;
    let plan = RunPlanner::new(graph, &staleness, &freshness)
        .excluding_all(excluded)
        .plan()?;
    Ok(Evaluation {
        staleness,
        freshness,
        plan,
    })
}
