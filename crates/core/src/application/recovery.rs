// Crash recovery logic
use crate::application::worker::constants::DEFAULT_RECOVERY_WINDOW_MS;
use crate::port::{JobStore, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

/// Crash recovery service
///
/// On startup, requeues jobs a previous process left `running`. Handlers run
/// in-process, so a job still marked `running` has no owner anymore.
pub struct RecoveryService {
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    recovery_window_ms: i64,
}

impl RecoveryService {
    /// Create a new recovery service
    ///
    /// # Arguments
    /// * `store` - Job store
    /// * `time_provider` - Time provider
    /// * `recovery_window_ms` - Only jobs started longer ago than this are touched
    ///   (default: everything started before now)
    ///
    /// # Example
    /// ```ignore
    /// let recovery = RecoveryService::new(store, time_provider, None);
    /// recovery.recover_orphaned_jobs().await?;
    /// ```
    pub fn new(
        store: Arc<dyn JobStore>,
        time_provider: Arc<dyn TimeProvider>,
        recovery_window_ms: Option<i64>,
    ) -> Self {
        Self {
            store,
            time_provider,
            recovery_window_ms: recovery_window_ms.unwrap_or(DEFAULT_RECOVERY_WINDOW_MS),
        }
    }

    /// Requeue orphaned `running` jobs; attempts are left untouched
    ///
    /// Must run before the worker starts, otherwise live dispatches would be
    /// requeued too.
    ///
    /// # Returns
    /// Number of jobs recovered
    pub async fn recover_orphaned_jobs(&self) -> crate::error::Result<u64> {
        let cutoff = self.time_provider.now_millis() - self.recovery_window_ms;

        info!(
            cutoff_time = %cutoff,
            recovery_window_ms = %self.recovery_window_ms,
            "Starting orphaned job recovery"
        );

        let recovered = self.store.requeue_running(cutoff).await?;
        if recovered > 0 {
            warn!(recovered_count = recovered, "Requeued jobs orphaned by a previous run");
        }

        info!(recovered_count = %recovered, "Orphaned job recovery complete");
        Ok(recovered)
    }
}
