//! External factor provider abstraction.
//!
//! [`FactorSource`] is the raw transport (one request, one answer). The
//! concrete HTTP implementation lives in the `carbon-ledger` app crate;
//! tests plug in in-process fakes.
//!
//! [`ProviderClient`] wraps a source with the policies every billed call
//! must go through:
//!
//! - the [`QuotaTracker`] is charged before **every** network attempt,
//!   retries included; a denied first attempt fails with
//!   [`FetchError::QuotaExceeded`] without touching the network
//! - each attempt is bounded by a timeout
//! - transient failures (network, 5xx, 429, timeout) are retried on the
//!   configured backoff schedule
//! - permanent failures (other 4xx, malformed payloads) are returned at once

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::factor::{EmissionFactor, FactorKey};
use crate::quota::QuotaTracker;

/// A single-shot factor lookup against some upstream.
#[async_trait]
pub trait FactorSource: Send + Sync {
    /// Short name for logs (e.g. `"http"`).
    fn name(&self) -> &str;

    async fn lookup(&self, key: &FactorKey) -> Result<EmissionFactor, FetchError>;
}

/// Retry schedule for transient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff[n - 1]`; the last value repeats.
    pub backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Vec::new(),
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt as usize - 1).min(self.backoff.len() - 1);
        self.backoff[idx]
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: vec![Duration::from_millis(250), Duration::from_millis(1000)],
        }
    }
}

/// Quota-gated, retrying, time-bounded client over a [`FactorSource`].
pub struct ProviderClient {
    source: Arc<dyn FactorSource>,
    quota: Arc<QuotaTracker>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(source: Arc<dyn FactorSource>, quota: Arc<QuotaTracker>) -> Self {
        Self {
            source,
            quota,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    /// Resolve `key` from the upstream source.
    ///
    /// The returned factor always carries `key`, whatever key the source
    /// echoed back.
    pub async fn fetch(&self, key: &FactorKey) -> Result<EmissionFactor, FetchError> {
        let mut last_err: Option<FetchError> = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.delay_before(attempt);
                debug!(key = %key, attempt, delay_ms = delay.as_millis() as u64, "retrying factor lookup");
                tokio::time::sleep(delay).await;
            }

            if !self.quota.try_acquire() {
                // A retry that cannot be paid for reports the failure that caused it.
                return Err(last_err.unwrap_or(FetchError::QuotaExceeded));
            }

            match tokio::time::timeout(self.timeout, self.source.lookup(key)).await {
                Ok(Ok(mut factor)) => {
                    debug!(key = %key, source = self.source.name(), value = %factor.value, "factor resolved");
                    factor.key = key.clone();
                    return Ok(factor);
                }
                Ok(Err(e)) if e.is_transient() => {
                    warn!(key = %key, attempt, error = %e, "transient factor lookup failure");
                    last_err = Some(e);
                }
                Ok(Err(e)) => {
                    warn!(key = %key, error = %e, "factor lookup failed permanently");
                    return Err(e);
                }
                Err(_) => {
                    let ms = self.timeout.as_millis() as u64;
                    warn!(key = %key, attempt, timeout_ms = ms, "factor lookup timed out");
                    last_err = Some(FetchError::Timeout(ms));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| FetchError::Unavailable("no lookup attempted".to_string())))
    }
}
