//! # fresco-flow
//!
//! Declarative, freshness-driven reconciliation for asset graphs.
//!
//! Users declare assets, their upstream dependencies and optional freshness
//! policies ("this asset's data must never lag more than N minutes"). The
//! reconciler repeatedly compares that desired state against what has
//! actually materialized and submits the smallest set of runs that restores
//! it.
//!
//! ## Core Concepts
//!
//! - **Asset Graph**: Validated, immutable snapshot of declarations
//! - **Materialization Ledger**: Last successful run of every asset, with
//!   the upstream fingerprints it consumed
//! - **Staleness**: An asset whose inputs or code changed since its last run
//! - **Freshness**: A policy asset is late when stale or overdue; its minimal
//!   cause set names everything that must run to fix it
//! - **Run Plan**: Deduplicated, topologically ordered union of what must run,
//!   minus in-flight and backing-off assets and the dependents waiting on them
//!
//! ## Guarantees
//!
//! - **Deterministic**: Same graph, ledger, in-flight set and `now` always
//!   produce the same plan
//! - **No double submission**: An in-flight asset is never planned again
//!   until its completion arrives or the host evicts it
//! - **Explainable**: Every planned asset carries the reasons it was chosen
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use fresco_flow::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let raw = AssetKey::new("raw", "events");
//! let daily = AssetKey::new("mart", "daily");
//! let source = Arc::new(StaticDefinitionSource::new(vec![
//!     AssetDefinition::new(raw.clone()),
//!     AssetDefinition::new(daily.clone())
//!         .with_dep(raw)
//!         .with_policy(FreshnessPolicy::from_minutes(60)),
//! ]));
//!
//! let reconciler = Reconciler::new(
//!     source,
//!     Arc::new(InMemoryBackend::new()),
//!     Arc::new(InMemoryLedgerStore::new()),
//!     ReconcilerConfig::default(),
//! );
//!
//! let report = reconciler.tick(Utc::now()).await;
//! if let TickOutcome::Submitted { submission_id, keys } = report.outcome {
//!     for key in keys {
//!         reconciler
//!             .on_complete(&key, Some(submission_id), CompletionOutcome::succeeded(), Utc::now())
//!             .await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// Internal modules - not exposed in public API.
pub(crate) mod dag;

pub mod asset;
pub mod backend;
pub mod backoff;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod freshness;
pub mod graph;
pub mod ledger;
pub mod metrics;
pub mod planner;
pub mod reconciler;
pub mod source;
pub mod staleness;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::asset::{AssetDefinition, AssetKey, ExecutionStatus, FreshnessPolicy};
    pub use crate::backend::memory::InMemoryBackend;
    pub use crate::backend::{CompletionOutcome, ExecutionBackend, SubmissionHandle, SubmissionRequest};
    pub use crate::config::{BackoffConfig, ReconcilerConfig};
    pub use crate::error::{Error, Result};
    pub use crate::graph::AssetGraph;
    pub use crate::ledger::{MaterializationLedger, MaterializationRecord};
    pub use crate::planner::{PlanEntry, RunPlan, RunPlanner};
    pub use crate::reconciler::{CompletionDisposition, Reconciler, TickOutcome, TickReport};
    pub use crate::source::{DefinitionSource, StaticDefinitionSource};
    pub use crate::store::LedgerStore;
    pub use crate::store::memory::InMemoryLedgerStore;
}
