// Built-in handlers shipped with the daemon

use jobpool_core::application::worker::{HandlerError, JobCallback, JobWorker};
use jobpool_core::domain::Job;
use jobpool_core::error::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Upper bound for `sleep` jobs so a typo can't pin a slot for days
const MAX_SLEEP_MS: u64 = 10 * 60 * 1000;

#[derive(Debug, Deserialize)]
struct SleepArgs {
    ms: u64,
}

#[derive(Debug, Default, Deserialize)]
struct FailArgs {
    #[serde(default)]
    message: Option<String>,
}

pub fn register_builtin_handlers(worker: &JobWorker) -> Result<()> {
    worker.register_handler("noop", |_job: Job, done: JobCallback| {
        done.complete(Value::Null);
    })?;

    worker.register_handler("echo", |job: Job, done: JobCallback| {
        done.complete(job.data.into_value());
    })?;

    worker.register_async_handler("sleep", |job: Job| async move {
        let args: SleepArgs = job.parse_data()?;
        let ms = args.ms.min(MAX_SLEEP_MS);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, HandlerError>(json!({ "slept_ms": ms }))
    })?;

    worker.register_handler("fail", |job: Job, done: JobCallback| {
        let args: FailArgs = job.parse_data().unwrap_or_default();
        done.fail(
            args.message
                .unwrap_or_else(|| "requested failure".to_string()),
        );
    })?;

    Ok(())
}
