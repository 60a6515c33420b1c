// Worker configuration

use super::constants::*;
use crate::error::{AppError, Result};
use std::time::Duration;

/// Opt-in exponential backoff for retried jobs
///
/// `delay = base_delay_ms * factor ^ attempts`, jittered ±10% and capped at
/// `max_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub base_delay_ms: i64,
    pub factor: f64,
    pub max_delay_ms: i64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            factor: DEFAULT_RETRY_BACKOFF_FACTOR,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

/// Job worker options
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Maximum simultaneous dispatches
    pub concurrent: usize,
    /// Default `max_attempts` for jobs that omit their own
    pub max_retries: i32,
    /// Delay between poll cycles
    pub poll_interval: Duration,
    /// `None` keeps retried jobs immediately claimable
    pub backoff: Option<BackoffConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrent: DEFAULT_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: None,
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrent(mut self, concurrent: usize) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrent == 0 {
            return Err(AppError::Config("concurrent must be at least 1".to_string()));
        }
        if self.concurrent > u32::MAX as usize {
            return Err(AppError::Config(format!(
                "concurrent {} exceeds {}",
                self.concurrent,
                u32::MAX
            )));
        }
        if self.max_retries < 1 {
            return Err(AppError::Config("max_retries must be at least 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(AppError::Config("poll_interval must be non-zero".to_string()));
        }
        if let Some(backoff) = &self.backoff {
            if backoff.base_delay_ms < 0 || backoff.max_delay_ms < backoff.base_delay_ms {
                return Err(AppError::Config(format!(
                    "invalid backoff delays: base {}ms, max {}ms",
                    backoff.base_delay_ms, backoff.max_delay_ms
                )));
            }
            if backoff.factor.is_nan() || backoff.factor < 1.0 {
                return Err(AppError::Config(format!(
                    "backoff factor must be >= 1.0, got {}",
                    backoff.factor
                )));
            }
        }
        Ok(())
    }
}
