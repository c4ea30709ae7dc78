//! Retry and timeout wrapper for calls to external providers.
//!
//! Every embedding and generation call goes through [`call`]. Each attempt
//! runs under `tokio::time::timeout`; transient failures and timeouts are
//! retried with exponential backoff, fatal failures are returned at once.
//!
//! # Retry Strategy
//!
//! - [`ProviderError::Transient`] (network, HTTP 429, HTTP 5xx) → retry
//! - Attempt timed out → retry
//! - [`ProviderError::Fatal`] (other 4xx, malformed response) → fail immediately
//! - Backoff: `backoff × 2^(attempt-1)`, exponent capped at 5
//!
//! # Outcome mapping
//!
//! | Last failure | Error |
//! |--------------|-------|
//! | timeout | [`RagError::UpstreamTimeout`] |
//! | transient | [`RagError::UpstreamUnavailable`] |
//! | fatal (embedding) | [`RagError::RetrievalFailure`] |
//! | fatal (generation) | [`RagError::GenerationFailure`] |

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use tutor_rag_core::error::{ProviderError, RagError};

use crate::config::{EmbeddingConfig, GenerationConfig};

/// Timeout and retry budget for one kind of upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamPolicy {
    /// Limit for a single attempt.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff: Duration,
}

impl UpstreamPolicy {
    pub fn for_embedding(config: &EmbeddingConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    pub fn for_generation(config: &GenerationConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(5))
    }
}

/// Read a provider's JSON response, classifying HTTP failures.
///
/// HTTP 429 and 5xx are transient; other non-success statuses and bodies
/// that are not valid JSON are fatal.
pub(crate) async fn read_json(
    service: &str,
    response: reqwest::Response,
) -> Result<serde_json::Value, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(|e| {
            ProviderError::Fatal(format!("{} returned an invalid response: {}", service, e))
        });
    }

    let body_text = response.text().await.unwrap_or_default();
    let message = format!("{} API error {}: {}", service, status, body_text);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(ProviderError::Transient(message))
    } else {
        Err(ProviderError::Fatal(message))
    }
}

/// Network-level failures (connect, reset, client-side timeout) are transient.
pub(crate) fn send_error(service: &str, err: reqwest::Error) -> ProviderError {
    ProviderError::Transient(format!("{} connection error: {}", service, err))
}

/// Which collaborator is being called; decides how fatal errors surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Embedding,
    Generation,
}

impl Upstream {
    fn fatal(self, message: String) -> RagError {
        match self {
            Upstream::Embedding => RagError::RetrievalFailure(message),
            Upstream::Generation => RagError::GenerationFailure(message),
        }
    }
}

/// Run `attempt` under `policy`.
///
/// `operation` names the call in logs and errors (e.g. `"embed query"`).
pub async fn call<T, F, Fut>(
    operation: &str,
    upstream: Upstream,
    policy: &UpstreamPolicy,
    mut attempt: F,
) -> Result<T, RagError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = policy.max_retries.saturating_add(1);
    let mut timed_out = false;
    let mut last_message = String::new();

    for n in 0..attempts {
        if n > 0 {
            tokio::time::sleep(policy.delay_before(n)).await;
        }

        match tokio::time::timeout(policy.timeout, attempt()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(ProviderError::Fatal(message))) => {
                warn!(operation, error = %message, "upstream call failed");
                return Err(upstream.fatal(format!("{}: {}", operation, message)));
            }
            Ok(Err(ProviderError::Transient(message))) => {
                warn!(operation, attempt = n + 1, attempts, error = %message, "transient upstream error");
                timed_out = false;
                last_message = message;
            }
            Err(_) => {
                warn!(
                    operation,
                    attempt = n + 1,
                    attempts,
                    timeout_ms = policy.timeout.as_millis() as u64,
                    "upstream call timed out"
                );
                timed_out = true;
            }
        }
    }

    if timed_out {
        Err(RagError::UpstreamTimeout {
            operation: operation.to_string(),
            timeout_ms: policy.timeout.as_millis() as u64,
        })
    } else {
        Err(RagError::UpstreamUnavailable {
            operation: operation.to_string(),
            attempts,
            message: last_message,
        })
    }
}
