// Single-shot completion signal handed to job handlers

use crate::domain::JobId;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::warn;

/// Failure reported by a handler (or synthesized for a panic)
///
/// Only the message is persisted, as the job's `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub(crate) fn panicked(panic_msg: &str) -> Self {
        Self::new(format!("handler panicked: {}", panic_msg))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Payload shape mismatches surface as validation failures of the attempt
impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid job data: {}", err))
    }
}

impl From<AppError> for HandlerError {
    fn from(err: AppError) -> Self {
        Self::new(err.to_string())
    }
}

/// What a handler reports for one attempt
pub type HandlerOutcome = std::result::Result<serde_json::Value, HandlerError>;

/// Completion callback for one dispatch
///
/// Cloneable so a handler can move it into whatever task finishes the work.
/// Only the first invocation counts; later ones are logged and ignored.
/// If every clone is dropped without an invocation, the dispatcher records
/// the attempt as failed.
#[derive(Clone)]
pub struct JobCallback {
    job_id: JobId,
    slot: Arc<Mutex<Option<oneshot::Sender<HandlerOutcome>>>>,
}

impl JobCallback {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Report the outcome of the attempt; returns `false` if it was already reported
    pub fn done(&self, outcome: HandlerOutcome) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(tx) => {
                // Receiver gone means the dispatch task itself was torn down
                let _ = tx.send(outcome);
                true
            }
            None => {
                warn!(
                    job_id = %self.job_id,
                    "Job callback invoked more than once; ignoring"
                );
                false
            }
        }
    }

    pub fn complete(&self, result: serde_json::Value) -> bool {
        self.done(Ok(result))
    }

    pub fn fail(&self, error: impl Into<HandlerError>) -> bool {
        self.done(Err(error.into()))
    }

    pub fn is_done(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Create the callback for a dispatch together with the receiving end
pub(crate) fn completion_channel(
    job_id: JobId,
) -> (JobCallback, oneshot::Receiver<HandlerOutcome>) {
    let (tx, rx) = oneshot::channel();
    let callback = JobCallback {
        job_id,
        slot: Arc::new(Mutex::new(Some(tx))),
    };
    (callback, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_first_invocation_wins() {
        let (callback, rx) = completion_channel("job-1".to_string());
        let other = callback.clone();

        assert!(callback.complete(json!({"ok": true})));
        assert!(!other.fail("too late"));
        assert!(other.is_done());

        assert_eq!(rx.await.unwrap(), Ok(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_dropping_every_clone_closes_channel() {
        let (callback, rx) = completion_channel("job-2".to_string());
        let clone = callback.clone();
        drop(callback);
        drop(clone);
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_serde_error_becomes_validation_message() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let handler_err = HandlerError::from(err);
        assert!(handler_err.message().starts_with("invalid job data:"));
    }
}
