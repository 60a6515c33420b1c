// Panic isolation for handler invocations
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Turn a panic payload into a readable message
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Execute a closure with panic isolation
///
/// A panic is caught and returned as `Err(message)`, so a misbehaving
/// handler cannot take down the poll loop or other dispatches.
///
/// # Example
/// ```text
/// let result = execute_guarded(|| panic!("test panic"));
/// assert_eq!(result.unwrap_err(), "test panic");
/// ```
pub fn execute_guarded<F, T>(f: F) -> Result<T, String>
where
    F: FnOnce() -> T,
{
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let msg = panic_message(payload.as_ref());
        error!(panic_msg = %msg, "Handler panicked");
        msg
    })
}

/// Await a future with panic isolation
///
/// Panics raised while polling are caught the same way as `execute_guarded`.
pub async fn execute_guarded_async<F, T>(future: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(future).catch_unwind().await.map_err(|payload| {
        let msg = panic_message(payload.as_ref());
        error!(panic_msg = %msg, "Async handler panicked");
        msg
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_passes_value_through() {
        assert_eq!(execute_guarded(|| 42), Ok(42));
    }

    #[test]
    fn test_guard_catches_str_and_string_panics() {
        let result: Result<(), String> = execute_guarded(|| panic!("static message"));
        assert_eq!(result.unwrap_err(), "static message");

        let code = 7;
        let result: Result<(), String> = execute_guarded(|| panic!("code {}", code));
        assert_eq!(result.unwrap_err(), "code 7");
    }

    #[tokio::test]
    async fn test_async_guard_catches_panic_after_await() {
        let result: Result<(), String> = execute_guarded_async(async {
            tokio::task::yield_now().await;
            panic!("late failure");
        })
        .await;
        assert_eq!(result.unwrap_err(), "late failure");
    }
}
