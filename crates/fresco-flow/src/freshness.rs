//! Freshness Evaluator.
//!
//! A policy asset is *late* when it is stale, or when its last successful
//! materialization completed at least `maximum_lag` ago. Every late policy
//! asset yields a [`PolicyViolation`] carrying its minimal cause set: the
//! asset itself plus every transitive upstream that must rematerialize for
//! the policy to be satisfied again.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::asset::{AssetKey, FreshnessPolicy};
use crate::error::Result;
use crate::graph::AssetGraph;
use crate::ledger::MaterializationLedger;
use crate::staleness::{StalenessReason, StalenessReport};

/// Why a policy asset is late.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LatenessReason {
    /// The asset is stale.
    Stale {
        /// Why it is stale.
        reason: StalenessReason,
    },
    /// The asset is current but its last run is older than the allowed lag.
    Overdue {
        /// Completion time of the last successful run.
        completed_at: DateTime<Utc>,
        /// Instant at which the asset became late.
        deadline: DateTime<Utc>,
    },
}

/// A violated freshness policy and the assets that must run to satisfy it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyViolation {
    /// The asset whose policy is violated.
    pub asset: AssetKey,
    /// The violated policy.
    pub policy: FreshnessPolicy,
    /// Why the asset is late.
    pub reason: LatenessReason,
    /// The asset plus every upstream that is stale or itself late, stopping
    /// at the first current, on-time upstream on each path.
    pub minimal_cause: BTreeSet<AssetKey>,
}

/// Result of one freshness evaluation.
#[derive(Debug, Clone, Default)]
pub struct FreshnessReport {
    violations: Vec<PolicyViolation>,
    next_deadlines: BTreeMap<AssetKey, DateTime<Utc>>,
}

impl FreshnessReport {
    /// Violations in topological order of their policy asset.
    #[must_use]
    pub fn violations(&self) -> &[PolicyViolation] {
        &self.violations
    }

    /// Returns true if no policy is violated.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.violations.is_empty()
    }

    /// Returns true if the policy on `key` is violated.
    #[must_use]
    pub fn is_late(&self, key: &AssetKey) -> bool {
        self.violations.iter().any(|v| &v.asset == key)
    }

    /// For each satisfied, non-zero-lag policy: the instant it becomes late
    /// if nothing rematerializes.
    #[must_use]
    pub const fn next_deadlines(&self) -> &BTreeMap<AssetKey, DateTime<Utc>> {
        &self.next_deadlines
    }

    /// Earliest upcoming deadline across all satisfied policies.
    #[must_use]
    pub fn earliest_deadline(&self) -> Option<DateTime<Utc>> {
        self.next_deadlines.values().min().copied()
    }
}

/// Evaluates freshness policies against staleness and the ledger.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessEvaluator<'a> {
    graph: &'a AssetGraph,
    ledger: &'a MaterializationLedger,
    staleness: &'a StalenessReport,
    now: DateTime<Utc>,
}

impl<'a> FreshnessEvaluator<'a> {
    /// Creates an evaluator. `now` is injected so evaluation is pure.
    #[must_use]
    pub const fn new(
        graph: &'a AssetGraph,
        ledger: &'a MaterializationLedger,
        staleness: &'a StalenessReport,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            graph,
            ledger,
            staleness,
            now,
        }
    }

    /// Decides whether an asset with `policy` is late.
    ///
    /// A zero-lag policy is late only while the asset is stale.
    #[must_use]
    pub fn lateness(&self, key: &AssetKey, policy: FreshnessPolicy) -> Option<LatenessReason> {
        if let Some(reason) = self.staleness.reason(key) {
            return Some(LatenessReason::Stale {
                reason: reason.clone(),
            });
        }
        if policy.is_always_fresh() {
            return None;
        }
        let record = self.ledger.record(key)?;
        let deadline = deadline(record.completed_at, policy);
        (self.now >= deadline).then_some(LatenessReason::Overdue {
            completed_at: record.completed_at,
            deadline,
        })
    }

    /// Returns every violated policy with its minimal cause set, plus the
    /// next deadline of every satisfied policy.
    ///
    /// # Errors
    ///
    /// Propagates graph lookup errors, which a validated graph never yields.
    pub fn evaluate(&self) -> Result<FreshnessReport> {
        let mut late: HashMap<&AssetKey, LatenessReason> = HashMap::new();
        let mut report = FreshnessReport::default();

        for (key, policy) in self.graph.policy_assets() {
            match self.lateness(key, policy) {
                Some(reason) => {
                    late.insert(key, reason);
                }
                None => {
                    if !policy.is_always_fresh() {
                        if let Some(record) = self.ledger.record(key) {
                            report
                                .next_deadlines
                                .insert(key.clone(), deadline(record.completed_at, policy));
                        }
                    }
                }
            }
        }

        for (key, policy) in self.graph.policy_assets() {
            let Some(reason) = late.get(key) else {
                continue;
            };
            let minimal_cause = self.minimal_cause(key, &late)?;
            report.violations.push(PolicyViolation {
                asset: key.clone(),
                policy,
                reason: reason.clone(),
                minimal_cause,
            });
        }

        tracing::debug!(
            policies = self.graph.policy_assets().count(),
            violated = report.violations.len(),
            "freshness evaluated"
        );
        Ok(report)
    }

    /// Walks upstream from `key`, including every upstream that is stale or
    /// whose own policy is late, and stopping at current, on-time ones.
    fn minimal_cause(
        &self,
        key: &AssetKey,
        late: &HashMap<&AssetKey, LatenessReason>,
    ) -> Result<BTreeSet<AssetKey>> {
        let mut cause = BTreeSet::from([key.clone()]);
        let mut stack = vec![key.clone()];

        while let Some(current) = stack.pop() {
            for upstream in self.graph.upstreams(&current)? {
                if cause.contains(&upstream) {
                    continue;
                }
                if self.staleness.is_stale(&upstream) || late.contains_key(&upstream) {
                    cause.insert(upstream.clone());
                    stack.push(upstream);
                }
            }
        }

        Ok(cause)
    }
}

fn deadline(completed_at: DateTime<Utc>, policy: FreshnessPolicy) -> DateTime<Utc> {
    completed_at
        .checked_add_signed(policy.maximum_lag())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::asset::AssetDefinition;
    use crate::staleness::StalenessEvaluator;

    fn key(name: &str) -> AssetKey {
        AssetKey::new("test", name)
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, minute, 0).unwrap()
    }

    fn evaluate(
        graph: &AssetGraph,
        ledger: &MaterializationLedger,
        now: DateTime<Utc>,
    ) -> FreshnessReport {
        let staleness = StalenessEvaluator::new(graph, ledger).evaluate().unwrap();
        FreshnessEvaluator::new(graph, ledger, &staleness, now)
            .evaluate()
            .unwrap()
    }

    /// a -> b -> c(policy 10m)
    fn chain() -> AssetGraph {
        AssetGraph::from_definitions(vec![
            AssetDefinition::new(key("a")),
            AssetDefinition::new(key("b")).with_dep(key("a")),
            AssetDefinition::new(key("c"))
                .with_dep(key("b"))
                .with_policy(FreshnessPolicy::from_minutes(10)),
        ])
        .unwrap()
    }

    #[test]
    fn fresh_policy_reports_next_deadline() {
        let graph = chain();
        let mut ledger = MaterializationLedger::new();
        for k in graph.topological_keys() {
            ledger.record_success(&graph, k, None, at(0)).unwrap();
        }

        let report = evaluate(&graph, &ledger, at(9));
        assert!(report.is_satisfied());
        assert_eq!(report.next_deadlines().get(&key("c")), Some(&at(10)));
        assert_eq!(report.earliest_deadline(), Some(at(10)));
    }

    #[test]
    fn overdue_at_exact_deadline() {
        let graph = chain();
        let mut ledger = MaterializationLedger::new();
        for k in graph.topological_keys() {
            ledger.record_success(&graph, k, None, at(0)).unwrap();
        }

        let report = evaluate(&graph, &ledger, at(10));
        assert_eq!(report.violations().len(), 1);
        let violation = &report.violations()[0];
        assert_eq!(
            violation.reason,
            LatenessReason::Overdue {
                completed_at: at(0),
                deadline: at(10)
            }
        );
        // Upstreams are current and carry no policy: only c must run.
        assert_eq!(violation.minimal_cause, BTreeSet::from([key("c")]));
    }

    #[test]
    fn stale_policy_asset_pulls_in_stale_upstreams() {
        let graph = chain();
        let mut ledger = MaterializationLedger::new();
        for k in graph.topological_keys() {
            ledger.record_success(&graph, k, None, at(0)).unwrap();
        }
        ledger.record_success(&graph, &key("a"), None, at(1)).unwrap();

        let report = evaluate(&graph, &ledger, at(2));
        let violation = &report.violations()[0];
        assert!(matches!(violation.reason, LatenessReason::Stale { .. }));
        // a is current (just rematerialized); b and c are stale.
        assert_eq!(violation.minimal_cause, BTreeSet::from([key("b"), key("c")]));
    }

    #[test]
    fn cold_start_cause_covers_whole_ancestry() {
        let graph = chain();
        let ledger = MaterializationLedger::new();
        let report = evaluate(&graph, &ledger, at(0));
        assert_eq!(
            report.violations()[0].minimal_cause,
            BTreeSet::from([key("a"), key("b"), key("c")])
        );
        assert!(report.next_deadlines().is_empty());
    }

    #[test]
    fn late_upstream_policy_joins_cause_set() {
        // a(policy 5m) -> b(policy 60m)
        let graph = AssetGraph::from_definitions(vec![
            AssetDefinition::new(key("a")).with_policy(FreshnessPolicy::from_minutes(5)),
            AssetDefinition::new(key("b"))
                .with_dep(key("a"))
                .with_policy(FreshnessPolicy::from_minutes(60)),
        ])
        .unwrap();
        let mut ledger = MaterializationLedger::new();
        ledger.record_success(&graph, &key("a"), None, at(0)).unwrap();
        ledger.record_success(&graph, &key("b"), None, at(0)).unwrap();

        let report = evaluate(&graph, &ledger, at(5));
        assert_eq!(report.violations().len(), 1);
        assert!(report.is_late(&key("a")));
        assert!(!report.is_late(&key("b")));
        let expected = at(0) + Duration::minutes(60);
        assert_eq!(report.next_deadlines().get(&key("b")), Some(&expected));
    }

    #[test]
    fn zero_lag_policy_is_late_only_when_stale() {
        let graph = AssetGraph::from_definitions(vec![
            AssetDefinition::new(key("a")).with_policy(FreshnessPolicy::from_minutes(0)),
        ])
        .unwrap();
        let mut ledger = MaterializationLedger::new();

        assert!(evaluate(&graph, &ledger, at(0)).is_late(&key("a")));

        ledger.record_success(&graph, &key("a"), None, at(0)).unwrap();
        let report = evaluate(&graph, &ledger, at(59));
        assert!(report.is_satisfied());
        assert!(report.next_deadlines().is_empty());
    }
}
