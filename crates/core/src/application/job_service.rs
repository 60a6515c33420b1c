// Job Service - validated job creation

use crate::application::worker::constants::{MAX_JOB_TYPE_LEN, MAX_PAYLOAD_DEPTH};
use crate::domain::{Job, NewJob};
use crate::error::{AppError, Result};
use crate::port::JobStore;
use std::sync::Arc;
use tracing::info;

/// Creates jobs on behalf of upstream producers
pub struct JobService {
    store: Arc<dyn JobStore>,
    default_max_attempts: i32,
}

impl JobService {
    /// # Arguments
    ///
    /// * `store` - Job store
    /// * `default_max_attempts` - Used when a request omits `max_attempts`
    pub fn new(store: Arc<dyn JobStore>, default_max_attempts: i32) -> Self {
        Self {
            store,
            default_max_attempts,
        }
    }

    /// Validate and insert a new `pending` job
    pub async fn enqueue(&self, mut new_job: NewJob) -> Result<Job> {
        validate_new_job(&new_job)?;
        new_job.max_attempts = Some(new_job.max_attempts.unwrap_or(self.default_max_attempts));

        let job = self.store.create_job(new_job).await?;
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            max_attempts = job.max_attempts,
            "Job enqueued"
        );
        Ok(job)
    }
}

/// Reject creation requests the store should never see
pub fn validate_new_job(new_job: &NewJob) -> Result<()> {
    let job_type = &new_job.job_type;
    if job_type.is_empty() {
        return Err(AppError::Validation("job type cannot be empty".to_string()));
    }
    if job_type.len() > MAX_JOB_TYPE_LEN {
        return Err(AppError::Validation(format!(
            "job type too long: {} > {} bytes",
            job_type.len(),
            MAX_JOB_TYPE_LEN
        )));
    }
    if !job_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
    {
        return Err(AppError::Validation(format!(
            "job type '{}' must be alphanumeric (plus _ - . :)",
            job_type
        )));
    }

    if let Some(max_attempts) = new_job.max_attempts {
        if max_attempts < 1 {
            return Err(AppError::Validation(format!(
                "max_attempts must be at least 1, got {}",
                max_attempts
            )));
        }
    }

    if json_depth(&new_job.data) > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "payload too deeply nested (max depth {})",
            MAX_PAYLOAD_DEPTH
        )));
    }
    Ok(())
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}
