// Queue health inspection for operational tooling

use crate::application::worker::constants::DEFAULT_LONG_RUNNING_THRESHOLD_MS;
use crate::domain::{JobFilter, JobId, JobStatus};
use crate::error::Result;
use crate::port::{JobStore, TimeProvider};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: JobStatus,
    pub count: i64,
}

/// Pending jobs of a type no handler is registered for; they will never be claimed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnhandledType {
    pub job_type: String,
    pub pending: usize,
}

/// A job `running` for longer than the inspector's threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LongRunningJob {
    pub id: JobId,
    pub job_type: String,
    pub running_for_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub counts: Vec<StatusCount>,
    pub unhandled: Vec<UnhandledType>,
    pub long_running: Vec<LongRunningJob>,
}

impl QueueHealth {
    pub fn count(&self, status: JobStatus) -> i64 {
        self.counts
            .iter()
            .find(|c| c.status == status)
            .map_or(0, |c| c.count)
    }

    pub fn is_healthy(&self) -> bool {
        self.unhandled.is_empty() && self.long_running.is_empty()
    }
}

pub struct HealthInspector {
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    long_running_threshold_ms: i64,
}

impl HealthInspector {
    pub fn new(store: Arc<dyn JobStore>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            store,
            time_provider,
            long_running_threshold_ms: DEFAULT_LONG_RUNNING_THRESHOLD_MS,
        }
    }

    pub fn with_long_running_threshold(mut self, threshold_ms: i64) -> Self {
        self.long_running_threshold_ms = threshold_ms;
        self
    }

    /// Snapshot the queue against the set of job types that have handlers
    pub async fn inspect(&self, registered_types: &[String]) -> Result<QueueHealth> {
        let mut counts = Vec::with_capacity(JobStatus::ALL.len());
        for status in JobStatus::ALL {
            counts.push(StatusCount {
                status,
                count: self.store.count_by_status(status).await?,
            });
        }

        let pending = self
            .store
            .list_jobs(&JobFilter::all().with_status(JobStatus::Pending))
            .await?;
        let mut unhandled_by_type: BTreeMap<String, usize> = BTreeMap::new();
        for job in pending
            .into_iter()
            .filter(|j| !registered_types.contains(&j.job_type))
        {
            *unhandled_by_type.entry(job.job_type).or_default() += 1;
        }
        let unhandled = unhandled_by_type
            .into_iter()
            .map(|(job_type, pending)| UnhandledType { job_type, pending })
            .collect();

        let now = self.time_provider.now_millis();
        let long_running = self
            .store
            .list_jobs(&JobFilter::all().with_status(JobStatus::Running))
            .await?
            .into_iter()
            .filter_map(|job| {
                let running_for_ms = now - job.started_at?;
                (running_for_ms > self.long_running_threshold_ms).then(|| LongRunningJob {
                    id: job.id,
                    job_type: job.job_type,
                    running_for_ms,
                })
            })
            .collect();

        Ok(QueueHealth {
            counts,
            unhandled,
            long_running,
        })
    }
}
