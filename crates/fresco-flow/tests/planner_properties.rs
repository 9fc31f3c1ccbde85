//! Property-based tests for planner invariants.
//!
//! These tests use proptest to verify invariants hold across randomly
//! generated DAGs, ledger states and in-flight sets.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use fresco_flow::asset::{AssetDefinition, AssetKey, FreshnessPolicy};
use fresco_flow::graph::AssetGraph;
use fresco_flow::ledger::MaterializationLedger;
use fresco_flow::planner::{self, SkipReason};
use fresco_test_utils::{assert_no_duplicates, assert_topological};

/// One randomly generated asset.
#[derive(Debug, Clone)]
struct NodeSpec {
    /// Indices of earlier nodes this one depends on (keeps the graph acyclic).
    deps: Vec<usize>,
    /// Policy lag in minutes.
    lag: Option<i64>,
    /// Minute of last materialization, if any.
    materialized_at: Option<i64>,
    /// Data version reported at materialization.
    data_version: u8,
    /// Whether the node is currently in flight.
    in_flight: bool,
}

fn node_key(i: usize) -> AssetKey {
    AssetKey::new("prop", format!("n{i:03}"))
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

fn arb_node() -> impl Strategy<Value = NodeSpec> {
    (
        prop::collection::vec(any::<prop::sample::Index>(), 0..3),
        prop::option::of(0i64..30),
        prop::option::of(0i64..60),
        0u8..3,
        prop::bool::weighted(0.2),
    )
        .prop_map(|(deps, lag, materialized_at, data_version, in_flight)| NodeSpec {
            // Resolved against the node's position in `arb_world`.
            deps: deps.into_iter().map(|idx| idx.index(usize::MAX)).collect(),
            lag,
            materialized_at,
            data_version,
            in_flight,
        })
}

/// Graph, ledger, in-flight set and evaluation time.
fn arb_world() -> impl Strategy<Value = (AssetGraph, MaterializationLedger, Vec<AssetKey>, DateTime<Utc>)>
{
    (prop::collection::vec(arb_node(), 1..25), 0i64..120).prop_map(|(nodes, now_minute)| {
        let definitions: Vec<AssetDefinition> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let mut def = AssetDefinition::new(node_key(i));
                if i > 0 {
                    let deps: HashSet<usize> = node.deps.iter().map(|d| d % i).collect();
                    for dep in deps {
                        def = def.with_dep(node_key(dep));
                    }
                }
                if let Some(lag) = node.lag {
                    def = def.with_policy(FreshnessPolicy::from_minutes(lag));
                }
                def
            })
            .collect();
        let graph = AssetGraph::from_definitions(definitions).expect("acyclic by construction");

        // Materialize in topological order so snapshots see earlier upstreams.
        let mut ledger = MaterializationLedger::new();
        for (i, node) in nodes.iter().enumerate() {
            if let Some(minute) = node.materialized_at {
                ledger
                    .record_success(
                        &graph,
                        &node_key(i),
                        Some(node.data_version.to_string()),
                        base() + Duration::minutes(minute),
                    )
                    .unwrap();
            }
        }

        let in_flight = nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.in_flight)
            .map(|(i, _)| node_key(i))
            .collect();

        (graph, ledger, in_flight, base() + Duration::minutes(now_minute))
    })
}

fn exclusions(in_flight: &[AssetKey]) -> Vec<(AssetKey, SkipReason)> {
    in_flight
        .iter()
        .map(|key| (key.clone(), SkipReason::InFlight))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn planning_is_idempotent((graph, ledger, in_flight, now) in arb_world()) {
        let first = planner::evaluate(&graph, &ledger, exclusions(&in_flight), now).unwrap();
        let second = planner::evaluate(&graph, &ledger, exclusions(&in_flight), now).unwrap();
        prop_assert_eq!(first.plan, second.plan);
    }

    #[test]
    fn plans_are_topological_without_duplicates((graph, ledger, in_flight, now) in arb_world()) {
        let eval = planner::evaluate(&graph, &ledger, exclusions(&in_flight), now).unwrap();
        assert_topological(&eval.plan, &graph);
        assert_no_duplicates(&eval.plan);
    }

    #[test]
    fn in_flight_assets_are_never_planned((graph, ledger, in_flight, now) in arb_world()) {
        let eval = planner::evaluate(&graph, &ledger, exclusions(&in_flight), now).unwrap();
        for key in &in_flight {
            prop_assert!(!eval.plan.contains(key), "{} is in flight but planned", key);
        }
    }

    #[test]
    fn planned_assets_never_wait_on_a_skipped_upstream((graph, ledger, in_flight, now) in arb_world()) {
        let eval = planner::evaluate(&graph, &ledger, exclusions(&in_flight), now).unwrap();
        let skipped: HashSet<&AssetKey> = eval.plan.skipped.iter().map(|s| &s.key).collect();
        for entry in &eval.plan.entries {
            let mut stack = vec![entry.key.clone()];
            let mut seen = HashSet::new();
            while let Some(current) = stack.pop() {
                for upstream in graph.upstreams(&current).unwrap() {
                    prop_assert!(
                        !skipped.contains(&upstream),
                        "{} planned while upstream {} is skipped",
                        entry.key,
                        upstream
                    );
                    if seen.insert(upstream.clone()) {
                        stack.push(upstream);
                    }
                }
            }
        }
    }

    #[test]
    fn every_planned_asset_is_justified((graph, ledger, in_flight, now) in arb_world()) {
        let eval = planner::evaluate(&graph, &ledger, exclusions(&in_flight), now).unwrap();
        let caused: HashSet<&AssetKey> = eval
            .freshness
            .violations()
            .iter()
            .flat_map(|v| v.minimal_cause.iter())
            .collect();
        for entry in &eval.plan.entries {
            prop_assert!(!entry.reasons.is_empty());
            prop_assert!(
                eval.staleness.is_stale(&entry.key) || caused.contains(&entry.key),
                "{} planned without being stale or in a cause set",
                entry.key
            );
        }
    }

    #[test]
    fn every_stale_asset_is_planned_or_skipped((graph, ledger, in_flight, now) in arb_world()) {
        let eval = planner::evaluate(&graph, &ledger, exclusions(&in_flight), now).unwrap();
        let skipped: HashSet<&AssetKey> = eval.plan.skipped.iter().map(|s| &s.key).collect();
        for (key, _) in eval.staleness.stale_assets() {
            prop_assert!(
                eval.plan.contains(key) || skipped.contains(key),
                "stale asset {} neither planned nor skipped",
                key
            );
        }
    }

    #[test]
    fn cause_sets_contain_their_policy_asset((graph, ledger, in_flight, now) in arb_world()) {
        let eval = planner::evaluate(&graph, &ledger, exclusions(&in_flight), now).unwrap();
        for violation in eval.freshness.violations() {
            prop_assert!(violation.minimal_cause.contains(&violation.asset));
            for member in &violation.minimal_cause {
                prop_assert!(
                    member == &violation.asset
                        || eval.staleness.is_stale(member)
                        || eval.freshness.is_late(member)
                );
            }
        }
    }
}
