use crate::client::Client;
use crate::error::Result;
use crate::transaction::{Transaction, TransactionOptions};
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration for retrying transactions that failed on a conflict.
///
/// Defines how many times to re-run the unit of work and how long to wait
/// between attempts. The default multiplier of 1.0 gives a fixed delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt (None = unlimited)
    pub max_retries: Option<u32>,

    /// Delay before the first retry in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum delay in milliseconds
    pub max_backoff_ms: u64,

    /// Multiplier applied to the delay after each retry
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Retry up to `max_retries` times with a fixed delay
    pub fn new(max_retries: Option<u32>, delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            max_retries,
            initial_backoff_ms: ms,
            max_backoff_ms: ms,
            backoff_multiplier: 1.0,
        }
    }

    /// Returns a policy with no retries.
    pub fn no_retry() -> Self {
        Self::new(Some(0), Duration::ZERO)
    }

    /// Retry until the transaction goes through
    pub fn unlimited(delay: Duration) -> Self {
        Self::new(None, delay)
    }

    /// Grow the delay geometrically, capped at `max`
    pub fn with_backoff(mut self, max: Duration, multiplier: f64) -> Self {
        self.max_backoff_ms = max.as_millis() as u64;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Whether another retry is allowed after `retries` retries
    pub fn allows(&self, retries: u32) -> bool {
        self.max_retries.map_or(true, |max| retries < max)
    }

    /// Calculates the delay before retry number `attempt` (0-indexed).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
            .min(self.max_backoff_ms as f64) as u64;
        Duration::from_millis(backoff_ms)
    }
}

impl Default for RetryPolicy {
    /// Conflicts surface immediately unless retries are asked for.
    fn default() -> Self {
        Self::no_retry()
    }
}

impl Client {
    /// Run `work` inside a transaction and commit it.
    ///
    /// On a conflict the whole unit of work runs again in a new transaction
    /// linked to the failed one, as long as `policy` allows. `work` must be
    /// safe to re-run from scratch. Any other error rolls the open
    /// transaction back (best effort) and is returned as is.
    pub async fn transaction<T, F>(
        &self,
        options: TransactionOptions,
        policy: &RetryPolicy,
        mut work: F,
    ) -> Result<T>
    where
        F: FnMut(&mut Transaction) -> BoxFuture<'_, Result<T>>,
    {
        let mut previous = options.previous.clone();
        let mut retries = 0u32;

        loop {
            let attempt = TransactionOptions {
                read_only: options.read_only,
                previous: previous.take(),
            };
            let mut tx = self.begin_transaction(attempt).await?;

            let outcome = match work(&mut tx).await {
                Ok(value) => tx.commit().await.map(|()| value),
                Err(e) => Err(e),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            tx.release_locks();
            if tx.needs_rollback() {
                if let Err(rollback_err) = self.rollback(tx.id()).await {
                    warn!(transaction = %tx.id(), error = %rollback_err, "best-effort rollback failed");
                }
            }

            if !err.is_retryable() || !policy.allows(retries) {
                return Err(err);
            }

            let delay = policy.backoff_duration(retries);
            retries += 1;
            previous = err.transaction_id().map(str::to_string);
            info!(
                transaction = %tx.id(),
                retry = retries,
                "retrying transaction after conflict"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
