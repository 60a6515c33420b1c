// Job Store Port (Interface)

use crate::domain::{Job, JobFilter, JobId, JobStatus, NewJob};
use crate::error::Result;
use async_trait::async_trait;

/// Durable job record consumed by the worker
///
/// The only operation that must be atomic across concurrent callers is
/// `claim_next`: two pollers must never both receive the same job.
/// Every outcome write is conditional on the job still being `running`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `pending` job with `attempts = 0` and return the persisted record.
    /// `max_attempts` falls back to the domain default when the request omits it;
    /// a value below 1 is a `Validation` error.
    async fn create_job(&self, new_job: NewJob) -> Result<Job>;

    /// Atomically claim up to `limit` pending jobs whose type is in `eligible_types`
    ///
    /// Ordered by `priority` DESC, then `created_at` ASC. Each returned job is
    /// already `running` with `started_at` set. Jobs deferred by a retry
    /// backoff (`scheduled_at` in the future) are skipped.
    async fn claim_next(&self, eligible_types: &[String], limit: usize) -> Result<Vec<Job>>;

    /// `running -> completed`, persisting `result`
    async fn mark_completed(&self, id: &JobId, result: serde_json::Value) -> Result<()>;

    /// `running -> failed`, persisting `error`
    async fn mark_failed(&self, id: &JobId, error: &str) -> Result<()>;

    /// `running -> pending`, persisting `error`
    ///
    /// `retry_at` (epoch ms) defers eligibility; `None` makes the job claimable
    /// on the next poll cycle.
    async fn mark_retry(&self, id: &JobId, error: &str, retry_at: Option<i64>) -> Result<()>;

    /// Find job by ID
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>>;

    /// List jobs matching `filter`, oldest first
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Count jobs by status
    async fn count_by_status(&self, status: JobStatus) -> Result<i64>;

    /// Requeue `running` jobs started before `started_before` (crash recovery)
    async fn requeue_running(&self, started_before: i64) -> Result<u64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::job::DEFAULT_MAX_ATTEMPTS;
    use crate::error::AppError;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::time_provider::SystemTimeProvider;
    use crate::port::{IdProvider, TimeProvider};
    use std::sync::{Arc, Mutex};

    /// In-memory job store
    ///
    /// A single mutex guards the whole table, which makes every operation
    /// (including multi-row claims) atomic. Insertion order breaks ties
    /// between jobs created in the same millisecond.
    pub struct InMemoryJobStore {
        jobs: Mutex<Vec<Job>>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    }

    impl Default for InMemoryJobStore {
        fn default() -> Self {
            Self::new(
                Arc::new(SequentialIdProvider::default()),
                Arc::new(SystemTimeProvider),
            )
        }
    }

    impl InMemoryJobStore {
        pub fn new(id_provider: Arc<dyn IdProvider>, time_provider: Arc<dyn TimeProvider>) -> Self {
            Self {
                jobs: Mutex::new(Vec::new()),
                id_provider,
                time_provider,
            }
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Job>>> {
            self.jobs
                .lock()
                .map_err(|_| AppError::Internal("job store mutex poisoned".to_string()))
        }

        fn transition<F>(&self, id: &JobId, apply: F) -> Result<()>
        where
            F: FnOnce(&mut Job, i64) -> crate::domain::error::Result<()>,
        {
            let now = self.time_provider.now_millis();
            let mut jobs = self.lock()?;
            let job = jobs
                .iter_mut()
                .find(|j| &j.id == id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
            apply(job, now).map_err(|e| AppError::InvalidState(e.to_string()))
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn create_job(&self, mut new_job: NewJob) -> Result<Job> {
            let max_attempts = new_job.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
            if max_attempts < 1 {
                return Err(AppError::Validation(format!(
                    "max_attempts must be at least 1, got {}",
                    max_attempts
                )));
            }
            new_job.max_attempts = Some(max_attempts);
            let job = Job::new(
                self.id_provider.generate_id(),
                self.time_provider.now_millis(),
                new_job,
            );
            self.lock()?.push(job.clone());
            Ok(job)
        }

        async fn claim_next(&self, eligible_types: &[String], limit: usize) -> Result<Vec<Job>> {
            if limit == 0 || eligible_types.is_empty() {
                return Ok(Vec::new());
            }
            let now = self.time_provider.now_millis();
            let mut jobs = self.lock()?;

            let mut candidates: Vec<usize> = jobs
                .iter()
                .enumerate()
                .filter(|(_, j)| j.is_claimable(now) && eligible_types.contains(&j.job_type))
                .map(|(idx, _)| idx)
                .collect();
            candidates.sort_by(|&a, &b| {
                jobs[b]
                    .priority
                    .cmp(&jobs[a].priority)
                    .then(jobs[a].created_at.cmp(&jobs[b].created_at))
                    .then(a.cmp(&b))
            });

            let mut claimed = Vec::with_capacity(limit.min(candidates.len()));
            for idx in candidates.into_iter().take(limit) {
                jobs[idx]
                    .claim(now)
                    .map_err(|e| AppError::InvalidState(e.to_string()))?;
                claimed.push(jobs[idx].clone());
            }
            Ok(claimed)
        }

        async fn mark_completed(&self, id: &JobId, result: serde_json::Value) -> Result<()> {
            self.transition(id, |job, now| job.complete(result, now))
        }

        async fn mark_failed(&self, id: &JobId, error: &str) -> Result<()> {
            self.transition(id, |job, now| job.fail(error, now))
        }

        async fn mark_retry(&self, id: &JobId, error: &str, retry_at: Option<i64>) -> Result<()> {
            self.transition(id, |job, now| job.retry(error, retry_at, now))
        }

        async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self.lock()?.iter().find(|j| &j.id == id).cloned())
        }

        async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
            let jobs = self.lock()?;
            let mut matched: Vec<Job> = jobs.iter().filter(|j| filter.matches(j)).cloned().collect();
            // Vec order is insertion order, so a stable sort keeps FIFO ties
            matched.sort_by_key(|j| j.created_at);
            if let Some(limit) = filter.limit {
                matched.truncate(limit);
            }
            Ok(matched)
        }

        async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
            Ok(self.lock()?.iter().filter(|j| j.status == status).count() as i64)
        }

        async fn requeue_running(&self, started_before: i64) -> Result<u64> {
            let now = self.time_provider.now_millis();
            let mut jobs = self.lock()?;
            let mut count = 0;
            for job in jobs.iter_mut() {
                let orphaned = job.status == JobStatus::Running
                    && job.started_at.map_or(true, |s| s < started_before);
                if orphaned {
                    job.requeue(now)
                        .map_err(|e| AppError::InvalidState(e.to_string()))?;
                    count += 1;
                }
            }
            Ok(count)
        }
    }
}
