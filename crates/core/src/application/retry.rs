// Retry logic for failed dispatches
use crate::application::worker::config::BackoffConfig;
use crate::domain::Job;
use crate::port::TimeProvider;
use std::sync::Arc;
use tracing::{debug, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the job back to `pending`; `retry_at` is `None` when it may be claimed right away
    Retry { retry_at: Option<i64> },
    /// Attempts exhausted, job fails permanently
    Fail,
}

/// Retry policy
///
/// Decides the outcome of a failed attempt from:
/// - The attempts already recorded on the job (before this one)
/// - The job's `max_attempts`
/// - An optional exponential backoff
pub struct RetryPolicy {
    time_provider: Arc<dyn TimeProvider>,
    backoff: Option<BackoffConfig>,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `time_provider` - Time provider for computing `retry_at`
    /// * `backoff` - `None` for immediate eligibility
    pub fn new(time_provider: Arc<dyn TimeProvider>, backoff: Option<BackoffConfig>) -> Self {
        Self {
            time_provider,
            backoff,
        }
    }

    /// Decide what happens to `job` after the attempt that just failed
    ///
    /// `job.attempts` is the count before the failed attempt is recorded, so
    /// the job fails once `attempts + 1 >= max_attempts`.
    ///
    /// # Example
    /// ```text
    /// match policy.decide(&job) {
    ///     RetryDecision::Retry { retry_at } => store.mark_retry(&job.id, msg, retry_at).await?,
    ///     RetryDecision::Fail => store.mark_failed(&job.id, msg).await?,
    /// }
    /// ```
    pub fn decide(&self, job: &Job) -> RetryDecision {
        let attempt = job.attempts + 1;
        if attempt >= job.max_attempts {
            warn!(
                job_id = %job.id,
                attempt = attempt,
                max_attempts = job.max_attempts,
                "Max attempts reached"
            );
            return RetryDecision::Fail;
        }

        let retry_at = self.backoff.map(|backoff| {
            let delay_ms = Self::delay_ms(&backoff, job);
            debug!(job_id = %job.id, attempt = attempt, delay_ms = delay_ms, "Backing off retry");
            self.time_provider.now_millis() + delay_ms
        });

        RetryDecision::Retry { retry_at }
    }

    /// Exponential backoff with deterministic ±10% jitter
    ///
    /// `delay = base_delay * (factor ^ attempts)`, jitter seeded by the job id
    /// so concurrent retries spread out, capped at `max_delay_ms`.
    pub fn delay_ms(backoff: &BackoffConfig, job: &Job) -> i64 {
        let raw = backoff.base_delay_ms as f64 * backoff.factor.powi(job.attempts);

        let jitter_seed = job.id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0); // 0.9 to 1.1

        let delay = (raw * jitter_factor).min(backoff.max_delay_ms as f64);
        delay as i64
    }
}
