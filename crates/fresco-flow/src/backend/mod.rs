//! Execution backend abstraction.
//!
//! The reconciler hands each tick's plan to an [`ExecutionBackend`] and
//! learns about results later through
//! [`crate::reconciler::Reconciler::on_complete`]. Submission is fire and
//! forget: the backend only acknowledges receipt.
//!
//! - [`memory::InMemoryBackend`]: records submissions, for tests
//! - [`http::HttpBackend`]: POSTs submissions as JSON to a remote executor

pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fresco_core::SubmissionId;

use crate::asset::AssetKey;
use crate::error::Result;

/// Payload handed to an execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    /// Identifier of this submission.
    pub submission_id: SubmissionId,
    /// Assets to materialize, dependencies first.
    pub keys: Vec<AssetKey>,
    /// Fingerprint of the plan the keys came from.
    pub plan_fingerprint: String,
    /// When the reconciler submitted the plan.
    pub submitted_at: DateTime<Utc>,
}

/// Acknowledgement returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionHandle {
    /// The acknowledged submission.
    pub submission_id: SubmissionId,
    /// Backend-specific reference (run ID, job name), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
}

/// Terminal result of one asset's materialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompletionOutcome {
    /// The asset materialized.
    Succeeded {
        /// Version of the produced data, if the backend can tell. Identical
        /// versions keep downstream assets fresh.
        #[serde(default, rename = "dataVersion")]
        data_version: Option<String>,
    },
    /// The materialization failed.
    Failed {
        /// Failure description.
        #[serde(default)]
        reason: String,
    },
}

impl CompletionOutcome {
    /// A success with no reported data version.
    #[must_use]
    pub const fn succeeded() -> Self {
        Self::Succeeded { data_version: None }
    }

    /// A failure with `reason`.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Returns true for a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// A system that executes asset materializations.
///
/// Implementations must return promptly: the reconciler awaits `submit`
/// once per tick, with the keys already reserved as in flight. Completions
/// should echo the request's `submission_id` so results of superseded runs
/// can be told apart.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Hands `request` to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Submission`] if the backend is
    /// unavailable or rejects the request. The reconciler treats this like
    /// a failure of every submitted key.
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionHandle>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
