//! Retry policy shared by registration and sends
//!
//! One value describes how many attempts an operation gets, how long to wait
//! between them and, for registration, which broker endpoint each attempt uses.

use crate::broker::BrokerEndpoint;
use crate::error::ClientResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Reset the failure counter when a broker link comes back after a terminal error
    pub reset_after_error: bool,
    #[serde(skip)]
    candidates: Vec<BrokerEndpoint>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::registration()
    }
}

impl RetryPolicy {
    /// Three attempts, two seconds apart, walking the candidate list
    pub fn registration() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2_000,
            backoff_multiplier: 1.0,
            max_delay_ms: 30_000,
            reset_after_error: true,
            candidates: Vec::new(),
        }
    }

    /// A single attempt, no retry
    pub fn single() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
            backoff_multiplier: 1.0,
            max_delay_ms: 0,
            reset_after_error: true,
            candidates: Vec::new(),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<BrokerEndpoint>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn candidates(&self) -> &[BrokerEndpoint] {
        &self.candidates
    }

    /// Endpoint for the zero-based `attempt`, round-robin over the candidates
    pub fn candidate(&self, attempt: u32) -> Option<&BrokerEndpoint> {
        if self.candidates.is_empty() {
            return None;
        }
        self.candidates.get(attempt as usize % self.candidates.len())
    }

    /// Whether another attempt is allowed after `failures` failed ones
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }

    /// Delay to wait after the `failures`-th failure
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1) as i32;
        let millis = self.delay_ms as f64 * self.backoff_multiplier.max(1.0).powi(exponent);
        let capped = if self.max_delay_ms > 0 {
            millis.min(self.max_delay_ms as f64)
        } else {
            millis
        };
        Duration::from_millis(capped as u64)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts. The closure receives the zero-based attempt index.
pub async fn retry<T, F, Fut>(operation_name: &str, policy: &RetryPolicy, mut operation: F) -> ClientResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let mut failures = 0;
    loop {
        match operation(failures).await {
            Ok(value) => {
                if failures > 0 {
                    debug!(operation = operation_name, failures, "operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && policy.allows_retry(failures + 1) => {
                failures += 1;
                let delay = policy.delay_for(failures);
                warn!(
                    operation = operation_name,
                    failures,
                    error = %e,
                    next_delay_ms = delay.as_millis() as u64,
                    "retryable failure, trying again"
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
