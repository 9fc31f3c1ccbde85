//! HTTP execution backend.
//!
//! `POST {endpoint}` with a JSON [`SubmissionRequest`]. Conflicts, throttling
//! and server errors are retried a few times with a short exponential
//! backoff; timeouts are not.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ExecutionBackend, SubmissionHandle, SubmissionRequest};
use crate::error::{Error, Result};

const MAX_ATTEMPTS: u32 = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    #[serde(default)]
    external_ref: Option<String>,
}

/// Backend that forwards submissions to a remote executor over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    request_timeout: Duration,
}

impl HttpBackend {
    /// Creates a backend posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the endpoint is not an absolute
    /// http(s) URL or the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let parsed = reqwest::Url::parse(&endpoint)
            .map_err(|e| Error::configuration(format!("invalid backend URL '{endpoint}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::configuration(format!(
                "backend URL must be http or https, got '{endpoint}'"
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    /// Overrides the per-attempt request timeout (10 seconds by default).
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns the endpoint submissions are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 409 || status.as_u16() == 429 || status.is_server_error()
}

fn backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let backoff_ms = 100_u64.saturating_mul(2_u64.saturating_pow(exponent)).min(1_000);
    Duration::from_millis(backoff_ms)
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    #[tracing::instrument(skip_all, fields(submission_id = %request.submission_id, keys = request.keys.len()))]
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionHandle> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let response = self
                .client
                .post(&self.endpoint)
                .json(request)
                .timeout(self.request_timeout)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    // An empty or non-JSON body is still an acknowledgement.
                    let body = resp.text().await.unwrap_or_default();
                    let parsed: SubmitResponse = serde_json::from_str(&body).unwrap_or_default();
                    return Ok(SubmissionHandle {
                        submission_id: request.submission_id,
                        external_ref: parsed.external_ref,
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();

                    if is_retryable(status) && attempt < MAX_ATTEMPTS {
                        tracing::warn!(%status, attempt, "backend submission rejected, retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }

                    return Err(Error::submission(format!(
                        "backend rejected submission (status={status}): {body}"
                    )));
                }
                Err(err) => {
                    if err.is_timeout() {
                        return Err(Error::submission(format!(
                            "backend submission timed out: {err}"
                        )));
                    }

                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }

                    return Err(Error::submission(format!(
                        "backend submission failed: {err}"
                    )));
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            HttpBackend::new("ftp://example.com/submit"),
            Err(Error::Configuration { .. })
        ));
        assert!(matches!(
            HttpBackend::new("not a url"),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn accepts_http_endpoint() {
        let backend = HttpBackend::new("http://127.0.0.1:9000/submit").unwrap();
        assert_eq!(backend.endpoint(), "http://127.0.0.1:9000/submit");
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(reqwest::StatusCode::CONFLICT));
        assert!(is_retryable(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(reqwest::StatusCode::BAD_REQUEST));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff(1), Duration::from_millis(100));
        assert_eq!(backoff(2), Duration::from_millis(200));
        assert_eq!(backoff(10), Duration::from_millis(1_000));
    }
}
