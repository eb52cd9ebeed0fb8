/*!
 * Bounded retries and the shared external call budget.
 *
 * Every call to the translation provider or the target repository goes
 * through `RetryPolicy::run`, which first waits on the `CallBudget` and then
 * retries transport failures with exponential backoff.
 */

use governor::{Quota, RateLimiter};
use log::warn;
use rand::Rng;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::PipelineConfig;
use crate::errors::ProviderError;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Rate limit shared by all workers; waits instead of failing when exhausted
#[derive(Clone, Default)]
pub struct CallBudget {
    limiter: Option<Arc<DirectRateLimiter>>,
}

impl std::fmt::Debug for CallBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallBudget")
            .field("limited", &self.limiter.is_some())
            .finish()
    }
}

impl CallBudget {
    /// Budget of `requests_per_minute`, unlimited when `None` or zero
    pub fn per_minute(requests_per_minute: Option<u32>) -> Self {
        let limiter = requests_per_minute
            .and_then(NonZeroU32::new)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_minute(rate))));
        Self { limiter }
    }

    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// Wait until one more call fits in the budget
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

/// Bounded exponential backoff for retryable provider errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retry_count: u32,
    /// Delay before the first retry, doubled on each further retry
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn new(retry_count: u32, backoff_base_ms: u64) -> Self {
        Self {
            retry_count,
            backoff_base_ms,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.retry_count, config.retry_backoff_ms)
    }

    /// Delay before retry number `attempt` (1-based), with up to 10% jitter
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(base + jitter_ms(base / 10))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the retries are used up
    pub async fn run<T, F, Fut>(
        &self,
        budget: &CallBudget,
        operation: &str,
        mut call: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;

        loop {
            budget.acquire().await;

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry_count => {
                    attempt += 1;
                    warn!(
                        "{} failed: {} - retry {}/{}",
                        operation, e, attempt, self.retry_count
                    );
                    tokio::time::sleep(self.backoff_for(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn jitter_ms(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::rng().random_range(0..=max)
}
