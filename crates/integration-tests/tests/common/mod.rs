//! Shared fixtures: throwaway SQLite files in the temp dir
#![allow(dead_code)]

use jobpool_core::application::worker::{JobWorker, WorkerConfig};
use jobpool_core::domain::{Job, JobId, JobStatus};
use jobpool_core::port::id_provider::UuidProvider;
use jobpool_core::port::time_provider::SystemTimeProvider;
use jobpool_core::port::JobStore;
use jobpool_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// A database file removed (with its WAL files) when dropped
pub struct TestDb {
    pub path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("jobpool-test-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }

    pub fn url(&self) -> String {
        self.path.display().to_string()
    }

    /// Open a fresh pool on this file; each call behaves like another process
    pub async fn open_store(&self) -> Arc<SqliteJobStore> {
        let pool = create_pool(&self.url()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        Arc::new(SqliteJobStore::new(
            pool,
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
        ))
    }

    pub async fn worker(&self, concurrent: usize) -> JobWorker {
        let config = WorkerConfig::default()
            .with_concurrent(concurrent)
            .with_poll_interval(Duration::from_millis(10));
        JobWorker::new(self.open_store().await, config).unwrap()
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

/// Poll the store until the job reaches a terminal status
pub async fn wait_terminal(store: &dyn JobStore, id: &JobId) -> Job {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            let job = store.get_job(id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {} never reached a terminal status", id))
}

/// Poll the store until nothing is pending or running
pub async fn wait_drained(store: &dyn JobStore) {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            let pending = store.count_by_status(JobStatus::Pending).await.unwrap();
            let running = store.count_by_status(JobStatus::Running).await.unwrap();
            if pending == 0 && running == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue never drained");
}
