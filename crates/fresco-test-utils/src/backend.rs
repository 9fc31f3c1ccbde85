//! Execution backend with scripted behaviour.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use fresco_flow::asset::AssetKey;
use fresco_flow::backend::{ExecutionBackend, SubmissionHandle, SubmissionRequest};
use fresco_flow::error::{Error, Result};

/// What the backend does with the next submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Acknowledge the submission.
    Accept,
    /// Reject the submission with a message.
    Reject(String),
}

/// Backend that follows a queue of [`Script`] steps, accepting once the
/// queue is empty, and records every submission it accepted.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Script>>,
    accepted: Mutex<Vec<SubmissionRequest>>,
    attempts: Mutex<usize>,
}

impl ScriptedBackend {
    /// Creates a backend that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `steps` for upcoming submissions.
    pub fn script(&self, steps: impl IntoIterator<Item = Script>) {
        self.script.lock().unwrap().extend(steps);
    }

    /// Rejects the next `n` submissions.
    pub fn reject_next(&self, n: usize) {
        self.script((0..n).map(|i| Script::Reject(format!("scripted outage #{i}"))));
    }

    /// Returns accepted submissions in order.
    pub fn accepted(&self) -> Vec<SubmissionRequest> {
        self.accepted.lock().unwrap().clone()
    }

    /// Removes and returns the most recent accepted submission.
    pub fn take_last(&self) -> Option<SubmissionRequest> {
        self.accepted.lock().unwrap().pop()
    }

    /// Removes and returns the keys of the most recent accepted submission.
    pub fn take_last_keys(&self) -> Vec<AssetKey> {
        self.take_last().map(|request| request.keys).unwrap_or_default()
    }

    /// Returns the number of submission attempts, accepted or not.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionHandle> {
        *self.attempts.lock().unwrap() += 1;
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Script::Accept);
        match step {
            Script::Accept => {
                self.accepted.lock().unwrap().push(request.clone());
                Ok(SubmissionHandle {
                    submission_id: request.submission_id,
                    external_ref: Some(format!("scripted-{}", request.submission_id)),
                })
            }
            Script::Reject(message) => Err(Error::submission(message)),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
