// Application Layer - Use Cases and Worker Pool

pub mod health;
pub mod job_service;
pub mod recovery;
pub mod retry;
pub mod worker;

// Re-exports
pub use health::{HealthInspector, QueueHealth};
pub use job_service::JobService;
pub use recovery::RecoveryService;
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{
    HandlerError, HandlerOutcome, JobCallback, JobHandler, JobWorker, WorkerConfig,
};
