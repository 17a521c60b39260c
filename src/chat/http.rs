use reqwest::StatusCode;
use std::time::Duration;

use crate::{Error, Result};

/// JSON-over-HTTP transport shared by the chat clients.
///
/// Every attempt is bounded by the client timeout. Connection failures,
/// timeouts, HTTP 429 and 5xx answers are retried up to `max_retries` extra
/// times with a linear backoff; any other failure is returned at once.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    provider: &'static str,
    max_retries: u32,
    backoff: Duration,
}

impl HttpTransport {
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

    pub fn new(provider: &'static str, timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            provider,
            max_retries,
            backoff: Self::DEFAULT_BACKOFF,
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut attempt = 0;
        loop {
            match self.send_once(url, headers, body).await {
                Ok(value) => return Ok(value),
                Err(failure) if failure.retryable && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        provider = self.provider,
                        attempt,
                        error = %failure.error,
                        "retrying chat request"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    async fn send_once(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> std::result::Result<serde_json::Value, Failure> {
        let mut request = self.client.post(url);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }

        let response = request.json(body).send().await.map_err(|e| Failure {
            retryable: e.is_timeout() || e.is_connect(),
            error: Error::upstream(self.provider, format!("Request failed: {e}")),
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Failure {
                retryable: is_retryable_status(status),
                error: Error::upstream(self.provider, format!("HTTP {status}: {error_body}")),
            });
        }

        response.json().await.map_err(|e| Failure {
            retryable: false,
            error: Error::upstream(self.provider, format!("Failed to parse response: {e}")),
        })
    }
}

struct Failure {
    retryable: bool,
    error: Error,
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
