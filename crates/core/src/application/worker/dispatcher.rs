// Dispatcher - runs one claimed job and records its outcome

use super::callback::{completion_channel, HandlerError, HandlerOutcome};
use super::limiter::SlotPermit;
use super::panic_guard::execute_guarded;
use super::registry::HandlerRegistry;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::Job;
use crate::port::JobStore;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    retry_policy: Arc<RetryPolicy>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        retry_policy: Arc<RetryPolicy>,
    ) -> Self {
        Self {
            store,
            registry,
            retry_policy,
        }
    }

    /// Dispatch `job` on its own task; `slot` is released once the outcome is persisted
    ///
    /// The task is detached. The limiter tracks it through `slot`.
    pub fn spawn(self: &Arc<Self>, job: Job, slot: SlotPermit) {
        let dispatcher = Arc::clone(self);
        let span = info_span!("dispatch", job_id = %job.id, job_type = %job.job_type);
        tokio::spawn(
            async move {
                dispatcher.dispatch(job).await;
                drop(slot);
            }
            .instrument(span),
        );
    }

    /// Invoke the handler for `job`, wait for its callback and persist the result
    pub async fn dispatch(&self, job: Job) {
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts + 1,
            max_attempts = job.max_attempts,
            "Dispatching job"
        );
        let outcome = self.run_handler(job.clone()).await;
        self.record_outcome(&job, outcome).await;
    }

    async fn run_handler(&self, job: Job) -> HandlerOutcome {
        let handler = match self.registry.get(&job.job_type) {
            Some(h) => h,
            // Only registered types are claimed and handlers are never removed
            None => {
                return Err(HandlerError::new(format!(
                    "no handler registered for job type '{}'",
                    job.job_type
                )))
            }
        };

        let (callback, completion) = completion_channel(job.id.clone());
        let guard = callback.clone();

        // Handlers may block, so they run on the blocking pool and only hold
        // their own slot. A panic counts as a failed attempt unless the handler
        // already reported before panicking.
        tokio::task::spawn_blocking(move || {
            if let Err(panic_msg) = execute_guarded(move || handler.handle(job, callback)) {
                guard.fail(HandlerError::panicked(&panic_msg));
            }
        });

        match completion.await {
            Ok(outcome) => outcome,
            Err(_) => Err(HandlerError::new(
                "handler dropped its callback without reporting an outcome",
            )),
        }
    }

    async fn record_outcome(&self, job: &Job, outcome: HandlerOutcome) {
        let written = match outcome {
            Ok(result) => {
                info!(job_id = %job.id, "Job completed");
                self.store.mark_completed(&job.id, result).await
            }
            Err(err) => match self.retry_policy.decide(job) {
                RetryDecision::Retry { retry_at } => {
                    warn!(
                        job_id = %job.id,
                        attempt = job.attempts + 1,
                        max_attempts = job.max_attempts,
                        retry_at = ?retry_at,
                        error = %err,
                        "Job attempt failed, retrying"
                    );
                    self.store.mark_retry(&job.id, err.message(), retry_at).await
                }
                RetryDecision::Fail => {
                    error!(
                        job_id = %job.id,
                        attempts = job.attempts + 1,
                        error = %err,
                        "Job failed permanently"
                    );
                    self.store.mark_failed(&job.id, err.message()).await
                }
            },
        };

        if let Err(e) = written {
            // Nothing else can own this job, so it stays `running` until recovery
            error!(job_id = %job.id, error = %e, "Failed to persist job outcome");
        }
    }
}
