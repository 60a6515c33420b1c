// Worker constants (no magic values)
use std::time::Duration;

/// Default number of simultaneous dispatches
pub const DEFAULT_CONCURRENT: usize = 1;

/// Default attempt ceiling for jobs that omit their own `max_attempts`
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Default delay between poll cycles (250ms)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Sleep duration after a failed poll cycle before the next one (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default retry backoff base delay (1000ms = 1s), only used when backoff is enabled
pub const DEFAULT_RETRY_BASE_DELAY_MS: i64 = 1000;

/// Default exponential backoff factor
pub const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 2.0;

/// Upper bound for a single backoff delay (5 minutes)
pub const DEFAULT_RETRY_MAX_DELAY_MS: i64 = 5 * 60 * 1000;

/// Recovery window for orphaned `running` jobs
///
/// One process owns the store, so anything `running` at startup is orphaned.
pub const DEFAULT_RECOVERY_WINDOW_MS: i64 = 0;

/// A job `running` longer than this is reported by the health inspector (10 minutes)
pub const DEFAULT_LONG_RUNNING_THRESHOLD_MS: i64 = 10 * 60 * 1000;

/// Maximum length of a job type identifier
pub const MAX_JOB_TYPE_LEN: usize = 128;

/// Maximum nesting depth accepted in a job payload
pub const MAX_PAYLOAD_DEPTH: usize = 32;
