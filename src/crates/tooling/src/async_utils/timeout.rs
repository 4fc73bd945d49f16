//! Deadline helpers for async operations

use std::future::Future;
use std::time::Duration;

/// Error returned by [`with_timeout`]
#[derive(Debug)]
pub enum TimeoutError<E> {
    /// The operation completed but returned an error
    Failed(E),
    /// The deadline elapsed before the operation completed
    Elapsed(Duration),
}

impl<E: std::fmt::Display> std::fmt::Display for TimeoutError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutError::Failed(e) => write!(f, "operation failed: {}", e),
            TimeoutError::Elapsed(d) => write!(f, "operation timed out after {:?}", d),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for TimeoutError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TimeoutError::Failed(e) => Some(e),
            TimeoutError::Elapsed(_) => None,
        }
    }
}

impl<E> TimeoutError<E> {
    /// Whether this error is the deadline elapsing (as opposed to the
    /// operation itself failing)
    pub fn is_elapsed(&self) -> bool {
        matches!(self, TimeoutError::Elapsed(_))
    }
}

/// Run an async operation under a deadline
///
/// Returns the operation's output, [`TimeoutError::Failed`] when it errors, or
/// [`TimeoutError::Elapsed`] when the deadline is hit first. The operation's
/// future is dropped on timeout, which cancels any in-flight work.
pub async fn with_timeout<F, T, E>(
    deadline: Duration,
    operation: F,
) -> std::result::Result<T, TimeoutError<E>>
where
    F: Future<Output = std::result::Result<T, E>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(TimeoutError::Failed(error)),
        Err(_) => Err(TimeoutError::Elapsed(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, String>(7) }).await;
        assert!(matches!(result, Ok(7)));
    }

    #[tokio::test]
    async fn test_deadline_elapses() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>(())
        })
        .await;

        match result {
            Err(e) => assert!(e.is_elapsed()),
            Ok(_) => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn test_operation_error_passes_through() {
        let result =
            with_timeout(Duration::from_secs(1), async { Err::<(), _>("boom".to_string()) }).await;

        match result {
            Err(TimeoutError::Failed(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
