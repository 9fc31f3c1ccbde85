//! In-memory execution backend for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{ExecutionBackend, SubmissionHandle, SubmissionRequest};
use crate::error::{Error, Result};

/// Backend that records every submission and never executes anything.
///
/// Completions are delivered by the test driving the reconciler.
/// [`InMemoryBackend::set_available`] simulates an outage.
#[derive(Debug)]
pub struct InMemoryBackend {
    submissions: RwLock<Vec<SubmissionRequest>>,
    available: AtomicBool,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryBackend {
    /// Creates an available backend with no submissions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            submissions: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Makes subsequent submissions succeed (`true`) or fail (`false`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns all submissions received so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn submissions(&self) -> Result<Vec<SubmissionRequest>> {
        let submissions = self.submissions.read().map_err(poison_err)?;
        Ok(submissions.clone())
    }

    /// Removes and returns all submissions received so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn take_submissions(&self) -> Result<Vec<SubmissionRequest>> {
        let mut submissions = self.submissions.write().map_err(poison_err)?;
        Ok(std::mem::take(&mut *submissions))
    }
}

#[async_trait]
impl ExecutionBackend for InMemoryBackend {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionHandle> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::submission("in-memory backend unavailable"));
        }
        self.submissions
            .write()
            .map_err(poison_err)?
            .push(request.clone());
        Ok(SubmissionHandle {
            submission_id: request.submission_id,
            external_ref: None,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use fresco_core::SubmissionId;

    use super::*;
    use crate::asset::AssetKey;

    fn request() -> SubmissionRequest {
        SubmissionRequest {
            submission_id: SubmissionId::generate(),
            keys: vec![AssetKey::new("raw", "events")],
            plan_fingerprint: "sha256:00".into(),
            submitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_submissions() -> Result<()> {
        let backend = InMemoryBackend::new();
        let req = request();
        let handle = backend.submit(&req).await?;

        assert_eq!(handle.submission_id, req.submission_id);
        assert_eq!(backend.take_submissions()?, vec![req]);
        assert!(backend.submissions()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_backend_rejects() -> Result<()> {
        let backend = InMemoryBackend::new();
        backend.set_available(false);
        let err = backend.submit(&request()).await.unwrap_err();
        assert!(matches!(err, Error::Submission { .. }));
        assert!(backend.submissions()?.is_empty());
        Ok(())
    }
}
