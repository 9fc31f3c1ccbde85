//! Custom assertion helpers for integration tests.

use std::collections::HashSet;

use fresco_flow::asset::AssetKey;
use fresco_flow::graph::AssetGraph;
use fresco_flow::planner::{InclusionReason, RunPlan};

/// Asserts that every planned asset appears after all of its planned
/// upstreams.
///
/// # Panics
///
/// Panics if an upstream is ordered after its downstream.
pub fn assert_topological(plan: &RunPlan, graph: &AssetGraph) {
    let keys = plan.keys();
    for (position, key) in keys.iter().enumerate() {
        for upstream in graph.upstreams(key).expect("planned key is declared") {
            if let Some(upstream_position) = keys.iter().position(|k| *k == upstream) {
                assert!(
                    upstream_position < position,
                    "{upstream} must be ordered before {key} in {keys:?}"
                );
            }
        }
    }
}

/// Asserts that no asset appears twice in the plan.
///
/// # Panics
///
/// Panics on a duplicate.
pub fn assert_no_duplicates(plan: &RunPlan) {
    let mut seen = HashSet::new();
    for key in plan.keys() {
        assert!(seen.insert(key.clone()), "{key} planned more than once");
    }
}

/// Asserts that the plan contains exactly `expected`, in any order.
///
/// # Panics
///
/// Panics if the planned set differs.
pub fn assert_plan_set(plan: &RunPlan, expected: &[AssetKey]) {
    let actual: HashSet<AssetKey> = plan.keys().into_iter().collect();
    let expected: HashSet<AssetKey> = expected.iter().cloned().collect();
    assert_eq!(actual, expected, "unexpected plan contents");
}

/// Asserts that `key` is planned only as a stale, policy-less asset.
///
/// # Panics
///
/// Panics if `key` is not planned or was pulled in by a policy.
pub fn assert_planned_as_stale(plan: &RunPlan, key: &AssetKey) {
    let entry = plan
        .entry(key)
        .unwrap_or_else(|| panic!("{key} is not planned"));
    assert!(
        entry
            .reasons
            .iter()
            .all(|reason| matches!(reason, InclusionReason::Stale { .. })),
        "{key} was planned for a policy: {:?}",
        entry.reasons
    );
}
