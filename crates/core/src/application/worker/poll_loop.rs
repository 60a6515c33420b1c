// Poll Loop - claims ready jobs into free concurrency slots

use super::constants::ERROR_RECOVERY_SLEEP_DURATION;
use super::dispatcher::Dispatcher;
use super::limiter::ConcurrencyLimiter;
use super::registry::HandlerRegistry;
use super::shutdown::ShutdownToken;
use crate::error::Result;
use crate::port::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info};

#[derive(Clone)]
pub(crate) struct PollLoop {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) limiter: Arc<ConcurrencyLimiter>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) poll_interval: Duration,
}

impl PollLoop {
    /// Run poll cycles until `shutdown` fires
    pub(crate) async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            concurrent = self.limiter.capacity(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Poll loop started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = shutdown.wait() => break,
            }
            if shutdown.is_shutdown() {
                break;
            }

            if let Err(e) = self.poll_once().await {
                error!(error = %e, "Poll cycle failed");
                tokio::select! {
                    _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                    _ = shutdown.wait() => break,
                }
            }
        }

        info!("Poll loop stopped");
    }

    /// One poll cycle; returns the number of jobs dispatched
    ///
    /// Slots are reserved before claiming so a claimed job always has one.
    /// Slots left over when the store returns fewer jobs are released on drop.
    pub(crate) async fn poll_once(&self) -> Result<usize> {
        let free = self.limiter.free_slots();
        if free == 0 {
            return Ok(0);
        }

        let eligible_types = self.registry.types();
        if eligible_types.is_empty() {
            return Ok(0);
        }

        let slots = self.limiter.try_acquire_up_to(free);
        if slots.is_empty() {
            return Ok(0);
        }

        let jobs = self.store.claim_next(&eligible_types, slots.len()).await?;
        let claimed = jobs.len();
        if claimed > 0 {
            debug!(claimed = claimed, free_slots = slots.len(), "Claimed jobs");
        }

        for (job, slot) in jobs.into_iter().zip(slots) {
            self.dispatcher.spawn(job, slot);
        }
        Ok(claimed)
    }
}
