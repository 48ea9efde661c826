//! Retrying backend: bounded exponential backoff for transient failures.
//!
//! Wraps any backend. Statuses in the transient set (429, 500, 502, 503)
//! are retried with `min(base · 2ⁿ, max)` delays, stretched to the
//! provider's retry-after hint when one is given. Everything else, and the
//! last transient error once attempts run out, propagates unchanged.

use async_trait::async_trait;
use crucible_config::RetryConfig;
use crucible_core::backend::{Backend, BackendRequest, BackendResponse, BackendStream};
use crucible_core::error::BackendError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// A retry-after hint longer than the computed delay wins, even past
    /// `max_delay`.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);
        match retry_after {
            Some(hint) => backoff.max(hint),
            None => backoff,
        }
    }
}

/// A backend that retries transient failures of the wrapped backend.
pub struct RetryingBackend {
    inner: Arc<dyn Backend>,
    policy: RetryPolicy,
}

impl RetryingBackend {
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        Self {
            inner,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(backend = %self.inner.name(), attempts = attempt + 1, "{what} succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt, e.retry_after());
                    warn!(
                        backend = %self.inner.name(),
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient backend error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(backend = %self.inner.name(), error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl Backend for RetryingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        self.run("Completion", || self.inner.complete(request.clone()))
            .await
    }

    /// Only opening the stream is retried; errors after the first event
    /// are forwarded as-is.
    async fn complete_stream(&self, request: BackendRequest) -> Result<BackendStream, BackendError> {
        self.run("Stream open", || self.inner.complete_stream(request.clone()))
            .await
    }
}
