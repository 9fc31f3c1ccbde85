//! Pre-built test fixtures for common test scenarios.
//!
//! Provides factory functions to create asset graphs and a wired reconciler
//! with sensible defaults.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use fresco_flow::asset::{AssetDefinition, AssetKey, FreshnessPolicy};
use fresco_flow::backend::CompletionOutcome;
use fresco_flow::config::{BackoffConfig, ReconcilerConfig};
use fresco_flow::graph::AssetGraph;
use fresco_flow::reconciler::{CompletionDisposition, Reconciler};
use fresco_flow::source::StaticDefinitionSource;
use fresco_flow::store::memory::InMemoryLedgerStore;

use crate::backend::ScriptedBackend;

/// Key in the `test` namespace.
pub fn key(name: &str) -> AssetKey {
    AssetKey::new("test", name)
}

/// Fixed test epoch plus `minutes`.
pub fn minute(minutes: i64) -> DateTime<Utc> {
    epoch() + Duration::minutes(minutes)
}

/// Fixed test epoch plus `seconds`.
pub fn second(seconds: i64) -> DateTime<Utc> {
    epoch() + Duration::seconds(seconds)
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
}

/// Factory for asset declarations.
pub struct GraphFactory;

impl GraphFactory {
    /// `n0 -> n1 -> ... -> n{len-1}`, no policies.
    pub fn chain(len: usize) -> Vec<AssetDefinition> {
        (0..len)
            .map(|i| {
                let def = AssetDefinition::new(key(&format!("n{i}")));
                if i == 0 {
                    def
                } else {
                    def.with_dep(key(&format!("n{}", i - 1)))
                }
            })
            .collect()
    }

    /// `a -> b`, `a -> c`, with the given lags in minutes (`None` for no
    /// policy).
    pub fn fan_out(lag_b: Option<i64>, lag_c: Option<i64>) -> Vec<AssetDefinition> {
        let with_lag = |def: AssetDefinition, lag: Option<i64>| match lag {
            Some(minutes) => def.with_policy(FreshnessPolicy::from_minutes(minutes)),
            None => def,
        };
        vec![
            AssetDefinition::new(key("a")),
            with_lag(AssetDefinition::new(key("b")).with_dep(key("a")), lag_b),
            with_lag(AssetDefinition::new(key("c")).with_dep(key("a")), lag_c),
        ]
    }

    /// `a -> b -> c` with a policy of `lag_c` minutes on `c` only.
    pub fn policy_chain(lag_c: i64) -> Vec<AssetDefinition> {
        vec![
            AssetDefinition::new(key("a")),
            AssetDefinition::new(key("b")).with_dep(key("a")),
            AssetDefinition::new(key("c"))
                .with_dep(key("b"))
                .with_policy(FreshnessPolicy::from_minutes(lag_c)),
        ]
    }

    /// `a -> {b, c} -> d`, policy of `lag_d` minutes on `d`.
    pub fn diamond(lag_d: i64) -> Vec<AssetDefinition> {
        vec![
            AssetDefinition::new(key("a")),
            AssetDefinition::new(key("b")).with_dep(key("a")),
            AssetDefinition::new(key("c")).with_dep(key("a")),
            AssetDefinition::new(key("d"))
                .with_dep(key("b"))
                .with_dep(key("c"))
                .with_policy(FreshnessPolicy::from_minutes(lag_d)),
        ]
    }

    /// `width` independent roots feeding one sink with a 60 minute policy.
    pub fn wide(width: usize) -> Vec<AssetDefinition> {
        let mut sink = AssetDefinition::new(key("sink")).with_policy(FreshnessPolicy::from_minutes(60));
        let mut defs = Vec::with_capacity(width + 1);
        for i in 0..width {
            let root = key(&format!("root{i:04}"));
            sink = sink.with_dep(root.clone());
            defs.push(AssetDefinition::new(root));
        }
        defs.push(sink);
        defs
    }

    /// Builds a validated graph from declarations.
    pub fn graph(definitions: Vec<AssetDefinition>) -> AssetGraph {
        AssetGraph::from_definitions(definitions).expect("valid test graph")
    }
}

/// Reconciler wired to in-memory collaborators, with handles to each.
pub struct TestContext {
    /// Mutable declarations.
    pub source: Arc<StaticDefinitionSource>,
    /// Scripted execution backend.
    pub backend: Arc<ScriptedBackend>,
    /// Ledger store.
    pub store: Arc<InMemoryLedgerStore>,
    /// The reconciler under test.
    pub reconciler: Reconciler,
}

impl TestContext {
    /// Creates a context with failure backoff disabled.
    pub fn new(definitions: Vec<AssetDefinition>) -> Self {
        Self::with_config(
            definitions,
            ReconcilerConfig {
                backoff: BackoffConfig::disabled(),
                ..ReconcilerConfig::default()
            },
        )
    }

    /// Creates a context with `config`.
    pub fn with_config(definitions: Vec<AssetDefinition>, config: ReconcilerConfig) -> Self {
        Self::with_store(definitions, config, Arc::new(InMemoryLedgerStore::new()))
    }

    /// Creates a context reading previously persisted records from `store`.
    pub fn with_store(
        definitions: Vec<AssetDefinition>,
        config: ReconcilerConfig,
        store: Arc<InMemoryLedgerStore>,
    ) -> Self {
        let source = Arc::new(StaticDefinitionSource::new(definitions));
        let backend = Arc::new(ScriptedBackend::new());
        let reconciler = Reconciler::new(source.clone(), backend.clone(), store.clone(), config);
        Self {
            source,
            backend,
            store,
            reconciler,
        }
    }

    /// Reports success for every key of the most recent submission, in plan
    /// order, at `now`.
    pub async fn complete_last_submission(&self, now: DateTime<Utc>) -> Vec<CompletionDisposition> {
        let mut dispositions = Vec::new();
        let Some(request) = self.backend.take_last() else {
            return dispositions;
        };
        for key in request.keys {
            let disposition = self
                .reconciler
                .on_complete(&key, Some(request.submission_id), CompletionOutcome::succeeded(), now)
                .await
                .expect("completion applied");
            dispositions.push(disposition);
        }
        dispositions
    }
}
