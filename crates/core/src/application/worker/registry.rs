// Handler Registry - job type -> handler dispatch table

use super::callback::{HandlerError, HandlerOutcome, JobCallback};
use super::panic_guard::execute_guarded_async;
use crate::domain::Job;
use crate::error::{AppError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

/// Business logic for one job type
///
/// `handle` must eventually invoke `done` exactly once. It may return before
/// that happens (e.g. after handing `done` to a spawned task).
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: Job, done: JobCallback);
}

impl<F> JobHandler for F
where
    F: Fn(Job, JobCallback) + Send + Sync,
{
    fn handle(&self, job: Job, done: JobCallback) {
        self(job, done)
    }
}

/// Adapts an `async fn(Job) -> HandlerOutcome` to the callback contract
///
/// The future runs on its own task; a panic inside it is reported as a
/// handler failure.
pub struct AsyncHandler<F> {
    f: F,
}

impl<F> AsyncHandler<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync,
        Fut: Future<Output = HandlerOutcome> + Send + 'static,
    {
        Self { f }
    }
}

impl<F, Fut> JobHandler for AsyncHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    fn handle(&self, job: Job, done: JobCallback) {
        let future = (self.f)(job);
        tokio::spawn(async move {
            let outcome = execute_guarded_async(future)
                .await
                .unwrap_or_else(|panic_msg| Err(HandlerError::panicked(&panic_msg)));
            done.done(outcome);
        });
    }
}

/// Maps job types to handlers
///
/// Owned by one worker; the poll loop reads the registered types on every
/// cycle, so registrations made after `start()` apply from the next cycle.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `job_type`; a type can only be registered once
    pub fn register(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> Result<()> {
        let job_type = job_type.into();
        if job_type.trim().is_empty() {
            return Err(AppError::Validation("job type cannot be empty".to_string()));
        }

        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(&job_type) {
            return Err(AppError::Conflict(format!(
                "handler already registered for job type '{}'",
                job_type
            )));
        }
        handlers.insert(job_type, handler);
        Ok(())
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_type)
            .cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_type)
    }

    /// Registered job types, sorted
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
