// Job Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job ID (UUID v4)
pub type JobId = String;

/// Priority (higher number = claimed first)
pub type Priority = i32;

/// Attempt ceiling used when neither the job nor the worker config sets one
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Job status
///
/// `Pending -> Running -> {Completed | Failed}`, with `Running -> Pending`
/// as the retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// No further automatic transition happens from a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Job Payload (opaque JSON document handed verbatim to the handler)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// Job Entity
///
/// All timestamps are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub data: JobPayload,
    pub status: JobStatus,
    pub priority: Priority,

    pub attempts: i32,
    pub max_attempts: i32,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,

    pub scheduled_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    /// Build a freshly created `pending` job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `now_millis` - Creation timestamp (injected, not system time)
    /// * `new_job` - Creation request; `max_attempts` must already be resolved
    pub fn new(id: impl Into<String>, now_millis: i64, new_job: NewJob) -> Self {
        Self {
            id: id.into(),
            job_type: new_job.job_type,
            data: JobPayload::new(new_job.data),
            status: JobStatus::Pending,
            priority: new_job.priority,
            attempts: 0,
            max_attempts: new_job.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            error: None,
            result: None,
            scheduled_at: now_millis,
            started_at: None,
            completed_at: None,
            created_at: now_millis,
            updated_at: now_millis,
        }
    }

    /// Deserialize the payload into a handler-specific shape
    pub fn parse_data<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.data.as_value().clone())
    }

    /// Whether the store may hand this job to a poller at `now_millis`
    pub fn is_claimable(&self, now_millis: i64) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at <= now_millis
    }

    /// Transition `pending -> running`
    pub fn claim(&mut self, now_millis: i64) -> Result<()> {
        self.expect_status(JobStatus::Pending, JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    /// Transition `running -> completed`
    pub fn complete(&mut self, result: serde_json::Value, now_millis: i64) -> Result<()> {
        self.expect_status(JobStatus::Running, JobStatus::Completed)?;
        self.attempts += 1;
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    /// Transition `running -> failed` (terminal)
    pub fn fail(&mut self, error: impl Into<String>, now_millis: i64) -> Result<()> {
        self.expect_status(JobStatus::Running, JobStatus::Failed)?;
        self.attempts += 1;
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    /// Transition `running -> pending` for another attempt
    ///
    /// `retry_at` defers eligibility; `None` makes the job claimable at once.
    pub fn retry(
        &mut self,
        error: impl Into<String>,
        retry_at: Option<i64>,
        now_millis: i64,
    ) -> Result<()> {
        self.expect_status(JobStatus::Running, JobStatus::Pending)?;
        self.attempts += 1;
        self.status = JobStatus::Pending;
        self.error = Some(error.into());
        self.started_at = None;
        self.completed_at = None;
        self.scheduled_at = retry_at.unwrap_or(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    /// Put an orphaned `running` job back in line without consuming an attempt
    pub fn requeue(&mut self, now_millis: i64) -> Result<()> {
        self.expect_status(JobStatus::Running, JobStatus::Pending)?;
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.scheduled_at = now_millis;
        self.updated_at = now_millis;
        Ok(())
    }

    fn expect_status(&self, expected: JobStatus, to: JobStatus) -> Result<()> {
        if self.status != expected {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}

/// Job creation request (consumed from upstream producers)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub job_type: String,
    pub data: serde_json::Value,

    #[serde(default)]
    pub priority: Priority,

    /// Falls back to the worker's `max_retries` when omitted
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            data,
            priority: 0,
            max_attempts: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Filter for status inspection queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.job_type.as_deref().map_or(true, |t| job.job_type == t)
    }
}
