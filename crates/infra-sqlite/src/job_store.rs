// SQLite JobStore Implementation

use async_trait::async_trait;
use jobpool_core::domain::job::DEFAULT_MAX_ATTEMPTS;
use jobpool_core::domain::{Job, JobFilter, JobId, JobPayload, JobStatus, NewJob};
use jobpool_core::error::{AppError, Result};
use jobpool_core::port::{IdProvider, JobStore, TimeProvider};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;
use tracing::debug;

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::Conflict(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "275" => AppError::Validation(format!(
                        "Check constraint violation: {}",
                        db_err.message()
                    )),
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteJobStore {
    pool: SqlitePool,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobStore {
    pub fn new(
        pool: SqlitePool,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            pool,
            id_provider,
            time_provider,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Turn a zero-row conditional update into NotFound or InvalidState
    async fn explain_missed_transition(&self, id: &JobId, to: JobStatus) -> AppError {
        let current: std::result::Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;

        match current {
            Ok(None) => AppError::NotFound(format!("Job {} not found", id)),
            Ok(Some(status)) => AppError::InvalidState(format!(
                "Cannot move job {} from {} to {}",
                id, status, to
            )),
            Err(e) => map_sqlx_error(e),
        }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
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

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, data, status, priority,
                attempts, max_attempts, scheduled_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.job_type)
        .bind(job.data.as_value().to_string())
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.scheduled_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(job)
    }

    async fn claim_next(&self, eligible_types: &[String], limit: usize) -> Result<Vec<Job>> {
        if limit == 0 || eligible_types.is_empty() {
            return Ok(Vec::new());
        }
        let now = self.time_provider.now_millis();
        let types_json = serde_json::to_string(eligible_types)?;

        // Single statement: selection and transition happen under one write lock,
        // so concurrent pollers (even in other processes) never share a row.
        let mut rows = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'running', started_at = ?, updated_at = ?
            WHERE seq IN (
                SELECT seq FROM jobs
                WHERE status = 'pending'
                  AND scheduled_at <= ?
                  AND job_type IN (SELECT value FROM json_each(?))
                ORDER BY priority DESC, created_at ASC, seq ASC
                LIMIT ?
            )
              AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(&types_json)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        // RETURNING order is unspecified
        rows.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.seq.cmp(&b.seq))
        });

        if !rows.is_empty() {
            debug!(claimed = rows.len(), limit, "Claimed pending jobs");
        }
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn mark_completed(&self, id: &JobId, result: serde_json::Value) -> Result<()> {
        let now = self.time_provider.now_millis();
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', attempts = attempts + 1, result = ?,
                completed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(result.to_string())
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if updated.rows_affected() == 0 {
            return Err(self.explain_missed_transition(id, JobStatus::Completed).await);
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &JobId, error: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', attempts = attempts + 1, error = ?,
                completed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if updated.rows_affected() == 0 {
            return Err(self.explain_missed_transition(id, JobStatus::Failed).await);
        }
        Ok(())
    }

    async fn mark_retry(&self, id: &JobId, error: &str, retry_at: Option<i64>) -> Result<()> {
        let now = self.time_provider.now_millis();
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', attempts = attempts + 1, error = ?,
                started_at = NULL, completed_at = NULL,
                scheduled_at = ?, updated_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(error)
        .bind(retry_at.unwrap_or(now))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if updated.rows_affected() == 0 {
            return Err(self.explain_missed_transition(id, JobStatus::Pending).await);
        }
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM jobs WHERE 1 = 1");
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(job_type) = &filter.job_type {
            query.push(" AND job_type = ").push_bind(job_type.clone());
        }
        query.push(" ORDER BY created_at ASC, seq ASC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = query
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn requeue_running(&self, started_before: i64) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', started_at = NULL, scheduled_at = ?, updated_at = ?
            WHERE status = 'running'
              AND (started_at IS NULL OR started_at < ?)
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(started_before)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    seq: i64,
    id: String,
    job_type: String,
    data: String,
    status: String,
    priority: i32,
    attempts: i32,
    max_attempts: i32,
    error: Option<String>,
    result: Option<String>,
    scheduled_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let status: JobStatus = self.status.parse()?;
        let data: serde_json::Value = serde_json::from_str(&self.data)?;
        let result: Option<serde_json::Value> = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Job {
            id: self.id,
            job_type: self.job_type,
            data: JobPayload::new(data),
            status,
            priority: self.priority,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            error: self.error,
            result,
            scheduled_at: self.scheduled_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
