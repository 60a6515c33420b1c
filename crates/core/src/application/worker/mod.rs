// Job Worker - handler registry, concurrency limiter, poll loop and dispatcher

pub mod callback;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod limiter;
mod panic_guard;
mod poll_loop;
pub mod registry;
mod shutdown;

pub use callback::{HandlerError, HandlerOutcome, JobCallback};
pub use config::{BackoffConfig, WorkerConfig};
pub use dispatcher::Dispatcher;
pub use limiter::{ConcurrencyLimiter, SlotPermit};
pub use panic_guard::{execute_guarded, execute_guarded_async};
pub use registry::{AsyncHandler, HandlerRegistry, JobHandler};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::health::{HealthInspector, QueueHealth};
use crate::application::job_service::JobService;
use crate::application::retry::RetryPolicy;
use crate::domain::{Job, JobFilter, JobId, NewJob};
use crate::error::{AppError, Result};
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{JobStore, TimeProvider};
use poll_loop::PollLoop;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct RunningPoller {
    shutdown: ShutdownSender,
    handle: JoinHandle<()>,
}

/// Job worker: one explicit instance per pool, no process-wide state
///
/// ```text
/// let worker = JobWorker::new(store, WorkerConfig::default().with_concurrent(4))?;
/// worker.register_async_handler("email", |job| async move { send(job).await })?;
/// worker.start().await?;
/// ...
/// worker.stop().await?;
/// ```
pub struct JobWorker {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    limiter: Arc<ConcurrencyLimiter>,
    dispatcher: Arc<Dispatcher>,
    jobs: JobService,
    health: HealthInspector,
    poller: Mutex<Option<RunningPoller>>,
}

impl JobWorker {
    /// Create a worker backed by the system clock
    pub fn new(store: Arc<dyn JobStore>, config: WorkerConfig) -> Result<Self> {
        Self::with_time_provider(store, config, Arc::new(SystemTimeProvider))
    }

    /// Create a worker with an injected clock (used for retry backoff and health)
    pub fn with_time_provider(
        store: Arc<dyn JobStore>,
        config: WorkerConfig,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(HandlerRegistry::new());
        let limiter = Arc::new(ConcurrencyLimiter::new(config.concurrent));
        let retry_policy = Arc::new(RetryPolicy::new(Arc::clone(&time_provider), config.backoff));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            retry_policy,
        ));

        Ok(Self {
            jobs: JobService::new(Arc::clone(&store), config.max_retries),
            health: HealthInspector::new(Arc::clone(&store), time_provider),
            config,
            store,
            registry,
            limiter,
            dispatcher,
            poller: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Register a callback-style handler for `job_type`
    ///
    /// May be called before or after `start()`; takes effect on the next poll cycle.
    pub fn register_handler<H>(&self, job_type: impl Into<String>, handler: H) -> Result<()>
    where
        H: JobHandler + 'static,
    {
        let job_type = job_type.into();
        self.registry.register(job_type.clone(), Arc::new(handler))?;
        info!(job_type = %job_type, "Handler registered");
        Ok(())
    }

    /// Register an `async fn(Job) -> HandlerOutcome` handler for `job_type`
    pub fn register_async_handler<F, Fut>(&self, job_type: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome> + Send + 'static,
    {
        self.register_handler(job_type, AsyncHandler::new(f))
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.registry.types()
    }

    /// Start the poll loop on the current tokio runtime
    pub async fn start(&self) -> Result<()> {
        let mut poller = self.poller.lock().await;
        if poller.is_some() {
            return Err(AppError::InvalidState("worker already started".to_string()));
        }

        let (shutdown, token) = shutdown_channel();
        let poll_loop = PollLoop {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            limiter: Arc::clone(&self.limiter),
            dispatcher: Arc::clone(&self.dispatcher),
            poll_interval: self.config.poll_interval,
        };
        let handle = tokio::spawn(poll_loop.run(token));

        *poller = Some(RunningPoller { shutdown, handle });
        info!(
            concurrent = self.config.concurrent,
            handlers = self.registry.types().len(),
            "Job worker started"
        );
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.poller.lock().await.is_some()
    }

    /// Stop claiming, then wait for every in-flight dispatch to finish
    ///
    /// A handler that never reports keeps this waiting; use `stop_timeout`
    /// for a bounded shutdown.
    pub async fn stop(&self) -> Result<()> {
        self.stop_polling().await?;
        self.limiter.drain().await;
        info!("Job worker stopped");
        Ok(())
    }

    /// Best-effort stop: returns `Ok(false)` if dispatches were still running after `timeout`
    ///
    /// No further claims happen either way; unfinished dispatches keep running
    /// in the background and still persist their outcome.
    pub async fn stop_timeout(&self, timeout: Duration) -> Result<bool> {
        self.stop_polling().await?;
        match tokio::time::timeout(timeout, self.limiter.drain()).await {
            Ok(()) => {
                info!("Job worker stopped");
                Ok(true)
            }
            Err(_) => {
                warn!(
                    in_flight = self.limiter.in_flight(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Job worker stopped with dispatches still in flight"
                );
                Ok(false)
            }
        }
    }

    async fn stop_polling(&self) -> Result<()> {
        let running = self.poller.lock().await.take();
        if let Some(RunningPoller { shutdown, handle }) = running {
            shutdown.shutdown();
            // Joining guarantees a cycle in progress has handed its claims to dispatch
            handle
                .await
                .map_err(|e| AppError::Internal(format!("poll loop task failed: {}", e)))?;
        }
        Ok(())
    }

    /// Run a single poll cycle now; returns the number of jobs dispatched
    pub async fn poll_once(&self) -> Result<usize> {
        PollLoop {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            limiter: Arc::clone(&self.limiter),
            dispatcher: Arc::clone(&self.dispatcher),
            poll_interval: self.config.poll_interval,
        }
        .poll_once()
        .await
    }

    /// Number of dispatches currently holding a concurrency slot
    pub fn in_flight(&self) -> usize {
        self.limiter.in_flight()
    }

    /// Validate and insert a job, defaulting `max_attempts` to `max_retries`
    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job> {
        self.jobs.enqueue(new_job).await
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        self.store.get_job(id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.store.list_jobs(filter).await
    }

    /// Queue health relative to this worker's registered handlers
    pub async fn health(&self) -> Result<QueueHealth> {
        self.health.inspect(&self.registry.types()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobStatus;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn worker(concurrent: usize) -> JobWorker {
        let config = WorkerConfig::default()
            .with_concurrent(concurrent)
            .with_poll_interval(Duration::from_millis(10));
        JobWorker::new(Arc::new(InMemoryJobStore::default()), config).unwrap()
    }

    async fn wait_for_status(worker: &JobWorker, id: &JobId, status: JobStatus) -> Job {
        for _ in 0..200 {
            let job = worker.get_job(id).await.unwrap().unwrap();
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", id, status);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = JobWorker::new(
            Arc::new(InMemoryJobStore::default()),
            WorkerConfig::default().with_concurrent(0),
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_runs_registered_job_to_completion() {
        let worker = worker(1);
        worker
            .register_async_handler("double", |job: Job| async move {
                let n: i64 = job.parse_data()?;
                Ok::<_, HandlerError>(json!(n * 2))
            })
            .unwrap();
        let job = worker.enqueue(NewJob::new("double", json!(4))).await.unwrap();

        worker.start().await.unwrap();
        let done = wait_for_status(&worker, &job.id, JobStatus::Completed).await;
        worker.stop().await.unwrap();

        assert_eq!(done.result, Some(json!(8)));
        assert_eq!(done.attempts, 1);
    }

    #[tokio::test]
    async fn test_single_slot_runs_in_priority_order() {
        let worker = worker(1);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = seen.clone();
        worker
            .register_handler("rank", move |job: Job, done: JobCallback| {
                log.lock().unwrap().push(job.priority);
                done.complete(json!(null));
            })
            .unwrap();
        for priority in [1, 10, 5] {
            worker
                .enqueue(NewJob::new("rank", json!({})).with_priority(priority))
                .await
                .unwrap();
        }

        while worker.poll_once().await.unwrap() > 0 || worker.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(*seen.lock().unwrap(), vec![10, 5, 1]);
    }

    #[tokio::test]
    async fn test_handler_registered_after_start_applies() {
        let worker = worker(1);
        let job = worker.enqueue(NewJob::new("late", json!({}))).await.unwrap();
        worker.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let still = worker.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(still.status, JobStatus::Pending);

        worker
            .register_handler("late", |_job: Job, done: JobCallback| {
                done.complete(json!("ok"));
            })
            .unwrap();
        wait_for_status(&worker, &job.id, JobStatus::Completed).await;
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_rejected_and_restart_allowed() {
        let worker = worker(1);
        worker.start().await.unwrap();
        assert!(matches!(worker.start().await, Err(AppError::InvalidState(_))));

        worker.stop().await.unwrap();
        assert!(!worker.is_running().await);
        worker.start().await.unwrap();
        assert!(worker.is_running().await);
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_dispatch() {
        let worker = worker(1);
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        worker
            .register_async_handler("slow", move |_job: Job| {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, HandlerError>(json!(null))
                }
            })
            .unwrap();
        let job = worker.enqueue(NewJob::new("slow", json!({}))).await.unwrap();

        worker.start().await.unwrap();
        wait_for_status(&worker, &job.id, JobStatus::Running).await;
        worker.stop().await.unwrap();

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        let job = worker.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(worker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_stop_timeout_with_stuck_handler() {
        let worker = worker(2);
        worker
            .register_handler("stuck", |_job: Job, done: JobCallback| {
                // Keep the callback alive forever without invoking it
                std::mem::forget(done);
            })
            .unwrap();
        worker
            .register_handler("quick", |_job: Job, done: JobCallback| {
                done.complete(json!(1));
            })
            .unwrap();
        let stuck = worker.enqueue(NewJob::new("stuck", json!({})).with_priority(10)).await.unwrap();
        let quick = worker.enqueue(NewJob::new("quick", json!({}))).await.unwrap();

        worker.start().await.unwrap();
        // The stuck handler only pins one slot; other work keeps flowing
        wait_for_status(&worker, &quick.id, JobStatus::Completed).await;

        let drained = worker.stop_timeout(Duration::from_millis(50)).await.unwrap();
        assert!(!drained);
        let stuck = worker.get_job(&stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, JobStatus::Running);

        let health = worker.health().await.unwrap();
        assert_eq!(health.count(JobStatus::Running), 1);
    }

    #[tokio::test]
    async fn test_restart_after_timed_out_stop() {
        let worker = worker(2);
        worker
            .register_handler("stuck", |_job: Job, done: JobCallback| {
                std::mem::forget(done);
            })
            .unwrap();
        worker
            .register_handler("quick", |_job: Job, done: JobCallback| {
                done.complete(json!(1));
            })
            .unwrap();
        let stuck = worker.enqueue(NewJob::new("stuck", json!({}))).await.unwrap();

        worker.start().await.unwrap();
        wait_for_status(&worker, &stuck.id, JobStatus::Running).await;
        assert!(!worker.stop_timeout(Duration::from_millis(20)).await.unwrap());
        assert!(!worker.is_running().await);
        assert_eq!(worker.in_flight(), 1);

        // The stuck dispatch keeps its slot; the restarted loop uses the other one
        worker.start().await.unwrap();
        assert!(worker.is_running().await);
        let quick = worker.enqueue(NewJob::new("quick", json!({}))).await.unwrap();
        let done = wait_for_status(&worker, &quick.id, JobStatus::Completed).await;
        assert_eq!(done.attempts, 1);

        assert!(!worker.stop_timeout(Duration::from_millis(20)).await.unwrap());
        let stuck = worker.get_job(&stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_poll_once_without_handlers_claims_nothing() {
        let worker = worker(3);
        worker.enqueue(NewJob::new("orphan", json!({}))).await.unwrap();

        assert_eq!(worker.poll_once().await.unwrap(), 0);
        let health = worker.health().await.unwrap();
        assert_eq!(health.unhandled.len(), 1);
        assert_eq!(health.unhandled[0].job_type, "orphan");
    }
}
