//! Reconciliation Loop.
//!
//! A [`Reconciler`] owns the ledger, the in-flight set and the failure
//! backoff. Each [`Reconciler::tick`]:
//!
//! 1. loads a fresh graph snapshot from the [`DefinitionSource`];
//! 2. hydrates ledger records for assets it has not seen yet;
//! 3. evaluates staleness and freshness and builds a plan that excludes
//!    in-flight and backing-off assets;
//! 4. submits the plan to the [`ExecutionBackend`] and marks its keys in
//!    flight.
//!
//! Completions arrive through [`Reconciler::on_complete`] in any order. A
//! success writes a ledger record (and persists it through the
//! [`LedgerStore`]); a failure only returns the asset to idle, so the next
//! tick re-plans it. The state lock is never held across an await.
//!
//! A tick never returns an error: integrity or infrastructure problems abort
//! the tick, are logged, and surface in the [`TickReport`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;

use fresco_core::observability::{completion_span, reconcile_span};
use fresco_core::{MaterializationId, SubmissionId};

use crate::asset::{AssetKey, ExecutionStatus};
use crate::backend::{CompletionOutcome, ExecutionBackend, SubmissionRequest};
use crate::backoff::BackoffGate;
use crate::config::ReconcilerConfig;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::freshness::PolicyViolation;
use crate::graph::AssetGraph;
use crate::ledger::{MaterializationLedger, MaterializationRecord};
use crate::metrics::{ReconcileMetrics, TimingGuard};
use crate::planner::{self, InclusionReason, RunPlan, SkipReason};
use crate::source::DefinitionSource;
use crate::store::LedgerStore;

/// What a tick ended up doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickOutcome {
    /// A non-empty plan was handed to the backend.
    Submitted {
        /// Identifier of the submission.
        submission_id: SubmissionId,
        /// Submitted keys in plan order.
        keys: Vec<AssetKey>,
    },
    /// Nothing needed to run.
    Idle,
    /// The backend rejected the plan; its keys were returned to idle.
    SubmissionFailed {
        /// Backend error.
        reason: String,
        /// Keys that were not submitted.
        keys: Vec<AssetKey>,
    },
    /// The tick stopped before planning (invalid declarations, storage
    /// failure). No state changed.
    Aborted {
        /// What went wrong.
        reason: String,
    },
}

impl TickOutcome {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::Idle => "idle",
            Self::SubmissionFailed { .. } => "submission_failed",
            Self::Aborted { .. } => "aborted",
        }
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// Monotonic tick counter, starting at 1.
    pub tick_seq: u64,
    /// The `now` the tick evaluated against.
    pub evaluated_at: DateTime<Utc>,
    /// What the tick did.
    pub outcome: TickOutcome,
    /// The computed plan; `None` when the tick aborted.
    pub plan: Option<RunPlan>,
    /// Number of stale assets.
    pub stale_assets: usize,
    /// Violated policies.
    pub violations: Vec<PolicyViolation>,
    /// Earliest upcoming policy deadline among satisfied policies.
    pub next_deadline: Option<DateTime<Utc>>,
}

impl TickReport {
    fn aborted(tick_seq: u64, evaluated_at: DateTime<Utc>, reason: String) -> Self {
        Self {
            tick_seq,
            evaluated_at,
            outcome: TickOutcome::Aborted { reason },
            plan: None,
            stale_assets: 0,
            violations: Vec::new(),
            next_deadline: None,
        }
    }
}

/// How a completion callback was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionDisposition {
    /// A success was written to the ledger.
    Recorded {
        /// The new materialization.
        materialization_id: MaterializationId,
        /// The asset's new fingerprint.
        fingerprint: Fingerprint,
    },
    /// A failure returned the asset to idle.
    Failed {
        /// Instant before which the asset will not be re-planned, if backoff
        /// holds it back.
        retry_at: Option<DateTime<Utc>>,
    },
    /// The asset is no longer declared; the result was discarded.
    Orphaned,
    /// The asset was not in flight, or the result belongs to another run
    /// (duplicate, evicted or superseded); ignored.
    Unknown,
}

impl CompletionDisposition {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Recorded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Orphaned => "orphaned",
            Self::Unknown => "unknown",
        }
    }
}

/// An asset awaiting a terminal result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightAsset {
    /// The asset.
    pub key: AssetKey,
    /// Submission the asset belongs to.
    pub submission_id: SubmissionId,
    /// When the tick that planned it ran.
    pub submitted_at: DateTime<Utc>,
    /// [`ExecutionStatus::Planned`] until the backend acknowledges.
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Copy)]
struct InFlightEntry {
    submission_id: SubmissionId,
    submitted_at: DateTime<Utc>,
    acknowledged: bool,
}

#[derive(Debug)]
struct ReconcilerState {
    graph: Option<Arc<AssetGraph>>,
    ledger: MaterializationLedger,
    hydrated: HashSet<AssetKey>,
    in_flight: HashMap<AssetKey, InFlightEntry>,
    backoff: BackoffGate,
    tick_seq: u64,
    last_report: Option<TickReport>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("reconciler state lock poisoned")
}

/// Drives assets toward their freshness policies.
///
/// Share it behind an `Arc`; every method takes `&self`. Ticks are expected
/// to be issued one at a time, while completions may arrive concurrently.
pub struct Reconciler {
    source: Arc<dyn DefinitionSource>,
    backend: Arc<dyn ExecutionBackend>,
    store: Arc<dyn LedgerStore>,
    config: ReconcilerConfig,
    metrics: ReconcileMetrics,
    state: Mutex<ReconcilerState>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler with an empty in-memory ledger. Records are
    /// hydrated from `store` as assets first appear.
    #[must_use]
    pub fn new(
        source: Arc<dyn DefinitionSource>,
        backend: Arc<dyn ExecutionBackend>,
        store: Arc<dyn LedgerStore>,
        config: ReconcilerConfig,
    ) -> Self {
        let backoff = BackoffGate::new(config.backoff);
        Self {
            source,
            backend,
            store,
            config,
            metrics: ReconcileMetrics::new(),
            state: Mutex::new(ReconcilerState {
                graph: None,
                ledger: MaterializationLedger::new(),
                hydrated: HashSet::new(),
                in_flight: HashMap::new(),
                backoff,
                tick_seq: 0,
                last_report: None,
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, ReconcilerState>> {
        self.state.lock().map_err(poison_err)
    }

    /// Runs one reconciliation tick at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let _timer = TimingGuard::new(|duration| self.metrics.observe_tick_duration(duration));

        let tick_seq = match self.lock() {
            Ok(mut state) => {
                state.tick_seq += 1;
                state.tick_seq
            }
            Err(e) => return self.finish(TickReport::aborted(0, now, e.to_string())),
        };

        let report = self
            .run_tick(tick_seq, now)
            .instrument(reconcile_span(tick_seq, now))
            .await;
        self.finish(report)
    }

    async fn run_tick(&self, tick_seq: u64, now: DateTime<Utc>) -> TickReport {
        let graph = match self.source.load().await {
            Ok(graph) => graph,
            Err(e) => {
                tracing::error!(error = %e, integrity = e.is_graph_integrity(), "failed to load asset graph");
                return TickReport::aborted(tick_seq, now, e.to_string());
            }
        };

        if let Err(e) = self.hydrate(&graph).await {
            tracing::error!(error = %e, "failed to hydrate ledger");
            return TickReport::aborted(tick_seq, now, e.to_string());
        }

        let (mut report, request) = match self.plan(&graph, tick_seq, now) {
            Ok(planned) => planned,
            Err(e) => {
                tracing::error!(error = %e, "evaluation failed");
                return TickReport::aborted(tick_seq, now, e.to_string());
            }
        };

        if let Some(request) = request {
            report.outcome = self.submit(request, now).await;
        }
        report
    }

    /// Loads records for assets not seen before. Records already in memory
    /// win over stored ones.
    async fn hydrate(&self, graph: &AssetGraph) -> Result<()> {
        let missing: Vec<AssetKey> = {
            let state = self.lock()?;
            graph
                .topological_keys()
                .iter()
                .filter(|key| !state.hydrated.contains(*key))
                .cloned()
                .collect()
        };
        if missing.is_empty() {
            return Ok(());
        }

        let mut loaded = Vec::with_capacity(missing.len());
        for key in missing {
            let record = self.store.load_record(&key).await?;
            loaded.push((key, record));
        }

        let mut state = self.lock()?;
        let mut restored = 0_usize;
        for (key, record) in loaded {
            if let Some(record) = record {
                state.ledger.insert_if_absent(key.clone(), record);
                restored += 1;
            }
            state.hydrated.insert(key);
        }
        drop(state);
        tracing::debug!(restored, "ledger hydrated");
        Ok(())
    }

    /// Evaluates under the state lock and reserves planned keys.
    fn plan(
        &self,
        graph: &Arc<AssetGraph>,
        tick_seq: u64,
        now: DateTime<Utc>,
    ) -> Result<(TickReport, Option<SubmissionRequest>)> {
        let mut state = self.lock()?;
        state.graph = Some(Arc::clone(graph));
        state.backoff.retain(|key| graph.contains(key));

        let excluded: Vec<(AssetKey, SkipReason)> = state
            .in_flight
            .keys()
            .map(|key| (key.clone(), SkipReason::InFlight))
            .chain(state.backoff.exclusions(now))
            .collect();
        let evaluation = planner::evaluate(graph, &state.ledger, excluded, now)?;
        let plan = evaluation.plan;

        self.metrics.set_stale_assets(evaluation.staleness.stale_count());
        self.metrics.set_late_policies(evaluation.freshness.violations().len());

        let request = if plan.is_empty() {
            None
        } else {
            let submission_id = SubmissionId::generate();
            for entry in &plan.entries {
                state.in_flight.insert(
                    entry.key.clone(),
                    InFlightEntry {
                        submission_id,
                        submitted_at: now,
                        acknowledged: false,
                    },
                );
                self.metrics.record_planned(primary_reason(&entry.reasons));
            }
            Some(SubmissionRequest {
                submission_id,
                keys: plan.keys(),
                plan_fingerprint: plan.fingerprint.clone(),
                submitted_at: now,
            })
        };
        self.metrics.set_in_flight(state.in_flight.len());
        drop(state);

        let report = TickReport {
            tick_seq,
            evaluated_at: now,
            outcome: TickOutcome::Idle,
            stale_assets: evaluation.staleness.stale_count(),
            next_deadline: evaluation.freshness.earliest_deadline(),
            violations: evaluation.freshness.violations().to_vec(),
            plan: Some(plan),
        };
        Ok((report, request))
    }

    async fn submit(&self, request: SubmissionRequest, now: DateTime<Utc>) -> TickOutcome {
        let result = self.backend.submit(&request).await;

        let mut state = match self.lock() {
            Ok(state) => state,
            Err(e) => return TickOutcome::Aborted { reason: e.to_string() },
        };
        let outcome = match result {
            Ok(handle) => {
                for key in &request.keys {
                    if let Some(entry) = state.in_flight.get_mut(key) {
                        if entry.submission_id == request.submission_id {
                            entry.acknowledged = true;
                        }
                    }
                }
                tracing::info!(
                    submission_id = %handle.submission_id,
                    external_ref = handle.external_ref.as_deref().unwrap_or(""),
                    assets = request.keys.len(),
                    backend = self.backend.name(),
                    "plan submitted"
                );
                TickOutcome::Submitted {
                    submission_id: request.submission_id,
                    keys: request.keys,
                }
            }
            Err(e) => {
                for key in &request.keys {
                    let ours = state
                        .in_flight
                        .get(key)
                        .is_some_and(|entry| entry.submission_id == request.submission_id);
                    if ours {
                        state.in_flight.remove(key);
                        state.backoff.record_failure(key, now);
                    }
                }
                self.metrics.record_submission_failure(self.backend.name());
                tracing::warn!(error = %e, assets = request.keys.len(), "plan submission failed");
                TickOutcome::SubmissionFailed {
                    reason: e.to_string(),
                    keys: request.keys,
                }
            }
        };
        self.metrics.set_in_flight(state.in_flight.len());
        outcome
    }

    fn finish(&self, report: TickReport) -> TickReport {
        self.metrics.record_tick(report.outcome.label());
        match &report.outcome {
            TickOutcome::Submitted { keys, .. } => {
                tracing::info!(tick_seq = report.tick_seq, planned = keys.len(), "tick submitted plan");
            }
            TickOutcome::Idle => {
                tracing::debug!(tick_seq = report.tick_seq, "tick idle");
            }
            TickOutcome::SubmissionFailed { reason, .. } | TickOutcome::Aborted { reason } => {
                tracing::warn!(tick_seq = report.tick_seq, outcome = report.outcome.label(), reason = %reason, "tick did not submit");
            }
        }
        if let Ok(mut state) = self.lock() {
            state.last_report = Some(report.clone());
        }
        report
    }

    /// Applies a terminal result for `key` reported by the backend at `now`.
    ///
    /// `submission_id` names the run the result belongs to. When given, it
    /// must match the submission currently in flight for `key`; results of
    /// evicted or superseded runs are ignored. Without it the result applies
    /// to whichever run is in flight.
    ///
    /// Results for keys that are not in flight are ignored. Results for keys
    /// no longer declared are discarded without touching the ledger.
    /// Persisting a new record is best effort: a store failure is logged and
    /// the in-memory ledger stays authoritative.
    ///
    /// # Errors
    ///
    /// Returns an error only if the reconciler state lock is poisoned.
    pub async fn on_complete(
        &self,
        key: &AssetKey,
        submission_id: Option<SubmissionId>,
        outcome: CompletionOutcome,
        now: DateTime<Utc>,
    ) -> Result<CompletionDisposition> {
        let label = if outcome.is_success() { "succeeded" } else { "failed" };
        let span = completion_span(&key.to_string(), label);
        self.apply_completion(key, submission_id, outcome, now)
            .instrument(span)
            .await
    }

    async fn apply_completion(
        &self,
        key: &AssetKey,
        submission_id: Option<SubmissionId>,
        outcome: CompletionOutcome,
        now: DateTime<Utc>,
    ) -> Result<CompletionDisposition> {
        let (disposition, record) = {
            let mut state = self.lock()?;
            let current = state.in_flight.get(key).is_some_and(|entry| {
                submission_id.is_none_or(|id| id == entry.submission_id)
            });
            if !current {
                drop(state);
                tracing::warn!(?submission_id, "completion for a run that is not in flight; ignoring");
                self.metrics.record_completion(CompletionDisposition::Unknown.label());
                return Ok(CompletionDisposition::Unknown);
            }
            state.in_flight.remove(key);
            self.metrics.set_in_flight(state.in_flight.len());

            let graph = state.graph.clone().filter(|graph| graph.contains(key));
            let Some(graph) = graph else {
                drop(state);
                tracing::info!("completion for undeclared asset; discarding");
                self.metrics.record_completion(CompletionDisposition::Orphaned.label());
                return Ok(CompletionDisposition::Orphaned);
            };

            match outcome {
                CompletionOutcome::Succeeded { data_version } => {
                    let record = state.ledger.record_success(&graph, key, data_version, now)?;
                    state.backoff.record_success(key);
                    let disposition = CompletionDisposition::Recorded {
                        materialization_id: record.materialization_id,
                        fingerprint: record.fingerprint.clone(),
                    };
                    (disposition, Some(record))
                }
                CompletionOutcome::Failed { reason } => {
                    state.backoff.record_failure(key, now);
                    let retry_at = state.backoff.blocked_until(key, now);
                    tracing::warn!(reason = %reason, consecutive = state.backoff.consecutive_failures(key), "materialization failed");
                    (CompletionDisposition::Failed { retry_at }, None)
                }
            }
        };

        if let Some(record) = record {
            self.persist(key, &record).await;
            tracing::info!(fingerprint = %record.fingerprint, "materialization recorded");
        }
        self.metrics.record_completion(disposition.label());
        Ok(disposition)
    }

    async fn persist(&self, key: &AssetKey, record: &MaterializationRecord) {
        if let Err(e) = self.store.save_record(key, record).await {
            tracing::error!(asset = %key, error = %e, "failed to persist ledger record");
        }
    }

    /// Records a materialization that happened outside the reconciler (a
    /// manual run, an external pipeline). Downstream assets see the new
    /// fingerprint at the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetNotFound`] if `key` is not declared, or an error
    /// if declarations or stored records cannot be loaded.
    #[tracing::instrument(skip(self, data_version), fields(asset = %key))]
    pub async fn record_external_materialization(
        &self,
        key: &AssetKey,
        data_version: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<MaterializationRecord> {
        let current = self.lock()?.graph.clone();
        let graph = match current {
            Some(graph) => graph,
            None => self.source.load().await?,
        };
        if !graph.contains(key) {
            return Err(Error::AssetNotFound {
                asset: key.to_string(),
            });
        }
        self.hydrate(&graph).await?;

        let record = {
            let mut state = self.lock()?;
            let record = state.ledger.record_success(&graph, key, data_version, now)?;
            state.backoff.record_success(key);
            record
        };
        self.persist(key, &record).await;
        tracing::info!(fingerprint = %record.fingerprint, "external materialization recorded");
        Ok(record)
    }

    /// Returns the execution status of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn status(&self, key: &AssetKey) -> Result<ExecutionStatus> {
        let state = self.lock()?;
        Ok(match state.in_flight.get(key) {
            Some(entry) if entry.acknowledged => ExecutionStatus::InFlight,
            Some(_) => ExecutionStatus::Planned,
            None => ExecutionStatus::Idle,
        })
    }

    /// Returns every asset awaiting a result, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn in_flight(&self) -> Result<Vec<InFlightAsset>> {
        let state = self.lock()?;
        let mut assets: Vec<InFlightAsset> = state
            .in_flight
            .iter()
            .map(|(key, entry)| InFlightAsset {
                key: key.clone(),
                submission_id: entry.submission_id,
                submitted_at: entry.submitted_at,
                status: if entry.acknowledged {
                    ExecutionStatus::InFlight
                } else {
                    ExecutionStatus::Planned
                },
            })
            .collect();
        drop(state);
        assets.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(assets)
    }

    /// Removes `key` from the in-flight set without recording a result, so
    /// the next tick may re-plan it. A late completion carrying the evicted
    /// run's submission id is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn evict_in_flight(&self, key: &AssetKey) -> Result<bool> {
        let mut state = self.lock()?;
        let evicted = state.in_flight.remove(key).is_some();
        self.metrics.set_in_flight(state.in_flight.len());
        drop(state);
        if evicted {
            self.metrics.record_evictions(1);
            tracing::warn!(asset = %key, "evicted in-flight asset");
        }
        Ok(evicted)
    }

    /// Evicts every key submitted at or before `now - ceiling`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn evict_in_flight_older_than(
        &self,
        now: DateTime<Utc>,
        ceiling: chrono::Duration,
    ) -> Result<Vec<AssetKey>> {
        let cutoff = now - ceiling;
        let mut state = self.lock()?;
        let mut evicted: Vec<AssetKey> = state
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.submitted_at <= cutoff)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &evicted {
            state.in_flight.remove(key);
        }
        self.metrics.set_in_flight(state.in_flight.len());
        drop(state);

        evicted.sort();
        if !evicted.is_empty() {
            self.metrics.record_evictions(evicted.len());
            tracing::warn!(count = evicted.len(), %cutoff, "evicted stuck in-flight assets");
        }
        Ok(evicted)
    }

    /// Returns the in-memory ledger record of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn ledger_record(&self, key: &AssetKey) -> Result<Option<MaterializationRecord>> {
        Ok(self.lock()?.ledger.record(key).cloned())
    }

    /// Returns the report of the most recent tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn last_report(&self) -> Result<Option<TickReport>> {
        Ok(self.lock()?.last_report.clone())
    }
}

fn primary_reason(reasons: &[InclusionReason]) -> &'static str {
    if reasons
        .iter()
        .any(|reason| matches!(reason, InclusionReason::Policy { .. }))
    {
        "policy"
    } else {
        "stale"
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::asset::{AssetDefinition, FreshnessPolicy};
    use crate::backend::memory::InMemoryBackend;
    use crate::config::BackoffConfig;
    use crate::source::StaticDefinitionSource;
    use crate::store::memory::InMemoryLedgerStore;

    fn key(name: &str) -> AssetKey {
        AssetKey::new("test", name)
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, minute, 0).unwrap()
    }

    struct Harness {
        source: Arc<StaticDefinitionSource>,
        backend: Arc<InMemoryBackend>,
        store: Arc<InMemoryLedgerStore>,
        reconciler: Reconciler,
    }

    fn harness(definitions: Vec<AssetDefinition>) -> Harness {
        let source = Arc::new(StaticDefinitionSource::new(definitions));
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(InMemoryLedgerStore::new());
        let config = ReconcilerConfig {
            backoff: BackoffConfig::disabled(),
            ..ReconcilerConfig::default()
        };
        let reconciler = Reconciler::new(source.clone(), backend.clone(), store.clone(), config);
        Harness {
            source,
            backend,
            store,
            reconciler,
        }
    }

    fn single() -> Vec<AssetDefinition> {
        vec![AssetDefinition::new(key("a")).with_policy(FreshnessPolicy::from_minutes(10))]
    }

    #[tokio::test]
    async fn tick_submits_and_marks_in_flight() {
        let h = harness(single());
        let report = h.reconciler.tick(at(0)).await;

        assert_eq!(report.tick_seq, 1);
        assert!(matches!(report.outcome, TickOutcome::Submitted { ref keys, .. } if keys == &vec![key("a")]));
        assert_eq!(h.reconciler.status(&key("a")).unwrap(), ExecutionStatus::InFlight);
        assert_eq!(h.backend.submissions().unwrap().len(), 1);
        assert_eq!(h.reconciler.last_report().unwrap(), Some(report));
    }

    #[tokio::test]
    async fn in_flight_assets_are_not_resubmitted() {
        let h = harness(single());
        h.reconciler.tick(at(0)).await;
        let second = h.reconciler.tick(at(1)).await;

        assert_eq!(second.outcome, TickOutcome::Idle);
        let plan = second.plan.unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(h.backend.submissions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn success_writes_through_to_store() {
        let h = harness(single());
        h.reconciler.tick(at(0)).await;

        let disposition = h
            .reconciler
            .on_complete(&key("a"), None, CompletionOutcome::succeeded(), at(1))
            .await
            .unwrap();

        assert!(matches!(disposition, CompletionDisposition::Recorded { .. }));
        assert_eq!(h.reconciler.status(&key("a")).unwrap(), ExecutionStatus::Idle);
        assert_eq!(h.store.record_count().unwrap(), 1);
        assert_eq!(h.reconciler.tick(at(2)).await.outcome, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn failure_returns_asset_to_idle_for_replanning() {
        let h = harness(single());
        h.reconciler.tick(at(0)).await;

        let disposition = h
            .reconciler
            .on_complete(&key("a"), None, CompletionOutcome::failed("boom"), at(1))
            .await
            .unwrap();
        assert_eq!(disposition, CompletionDisposition::Failed { retry_at: None });
        assert!(h.reconciler.ledger_record(&key("a")).unwrap().is_none());

        let report = h.reconciler.tick(at(2)).await;
        assert!(matches!(report.outcome, TickOutcome::Submitted { .. }));
    }

    #[tokio::test]
    async fn duplicate_completion_is_ignored() {
        let h = harness(single());
        h.reconciler.tick(at(0)).await;
        h.reconciler
            .on_complete(&key("a"), None, CompletionOutcome::succeeded(), at(1))
            .await
            .unwrap();

        let again = h
            .reconciler
            .on_complete(&key("a"), None, CompletionOutcome::succeeded(), at(2))
            .await
            .unwrap();
        assert_eq!(again, CompletionDisposition::Unknown);
    }

    #[tokio::test]
    async fn completion_of_superseded_run_is_ignored() {
        let h = harness(single());
        let first = match h.reconciler.tick(at(0)).await.outcome {
            TickOutcome::Submitted { submission_id, .. } => submission_id,
            other => panic!("expected a submission, got {other:?}"),
        };
        assert!(h.reconciler.evict_in_flight(&key("a")).unwrap());
        let second = match h.reconciler.tick(at(1)).await.outcome {
            TickOutcome::Submitted { submission_id, .. } => submission_id,
            other => panic!("expected a submission, got {other:?}"),
        };

        let stale = h
            .reconciler
            .on_complete(&key("a"), Some(first), CompletionOutcome::succeeded(), at(2))
            .await
            .unwrap();
        assert_eq!(stale, CompletionDisposition::Unknown);
        assert!(h.reconciler.ledger_record(&key("a")).unwrap().is_none());
        assert_eq!(h.reconciler.status(&key("a")).unwrap(), ExecutionStatus::InFlight);
        assert_eq!(h.reconciler.tick(at(3)).await.outcome, TickOutcome::Idle);

        let current = h
            .reconciler
            .on_complete(&key("a"), Some(second), CompletionOutcome::succeeded(), at(4))
            .await
            .unwrap();
        assert!(matches!(current, CompletionDisposition::Recorded { .. }));
    }

    #[tokio::test]
    async fn invalid_declarations_abort_without_state_change() {
        let h = harness(single());
        h.source
            .update(|defs| defs.push(AssetDefinition::new(key("b")).with_dep(key("ghost"))))
            .unwrap();

        let report = h.reconciler.tick(at(0)).await;
        assert!(matches!(report.outcome, TickOutcome::Aborted { .. }));
        assert!(report.plan.is_none());
        assert!(h.reconciler.in_flight().unwrap().is_empty());
        assert!(h.backend.submissions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn submission_failure_releases_keys() {
        let h = harness(single());
        h.backend.set_available(false);

        let report = h.reconciler.tick(at(0)).await;
        assert!(matches!(report.outcome, TickOutcome::SubmissionFailed { .. }));
        assert!(h.reconciler.in_flight().unwrap().is_empty());

        h.backend.set_available(true);
        assert!(matches!(h.reconciler.tick(at(1)).await.outcome, TickOutcome::Submitted { .. }));
    }

    #[tokio::test]
    async fn eviction_allows_replanning() {
        let h = harness(single());
        h.reconciler.tick(at(0)).await;

        assert!(h.reconciler.evict_in_flight_older_than(at(5), chrono::Duration::minutes(10)).unwrap().is_empty());
        let evicted = h
            .reconciler
            .evict_in_flight_older_than(at(10), chrono::Duration::minutes(10))
            .unwrap();
        assert_eq!(evicted, vec![key("a")]);
        assert!(!h.reconciler.evict_in_flight(&key("a")).unwrap());
        assert!(matches!(h.reconciler.tick(at(11)).await.outcome, TickOutcome::Submitted { .. }));
    }

    #[tokio::test]
    async fn external_materialization_satisfies_policy() {
        let h = harness(single());
        h.reconciler
            .record_external_materialization(&key("a"), Some("manual".into()), at(0))
            .await
            .unwrap();

        assert_eq!(h.reconciler.tick(at(1)).await.outcome, TickOutcome::Idle);
        assert_eq!(h.store.record_count().unwrap(), 1);

        let err = h
            .reconciler
            .record_external_materialization(&key("zzz"), None, at(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AssetNotFound { .. }));
    }
}
