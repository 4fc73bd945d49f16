//! Backoff policies for retrying failed async operations
//!
//! A [`Backoff`] describes how many attempts an operation gets and how long to
//! wait between them. The delay grows exponentially and is capped, with
//! optional jitter to avoid thundering herds.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff schedule for retried operations
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each retry
    pub multiplier: f64,

    /// Upper bound on the delay between retries
    pub max_delay: Duration,

    /// Randomize each delay by a factor in [0.5, 1.5]
    pub jitter: bool,
}

impl Backoff {
    /// Create a backoff schedule with the given number of attempts
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }

    /// Set the delay before the first retry
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the multiplier applied after each retry
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the upper bound on the delay between retries
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait before the given attempt (1-indexed; attempt 1 is the
    /// first retry)
    ///
    /// Computed as `initial_delay * multiplier^(attempt - 1)`, capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let base = self.initial_delay.as_secs_f64() * exp;
        let capped = base.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            capped * factor
        } else {
            capped
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Run an async operation, retrying on failure according to the backoff
///
/// The operation must be safe to re-run (idempotent or otherwise tolerant of
/// repeated execution). Returns the first success, or the last error once the
/// schedule is exhausted.
pub async fn run_with_retry<F, Fut, T, E>(backoff: &Backoff, operation: F) -> std::result::Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 1..=backoff.max_attempts.max(1) {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                tracing::debug!(attempt, %error, "attempt failed");
                last_error = Some(error);

                if !backoff.allows_retry(attempt) {
                    break;
                }

                tokio::time::sleep(backoff.delay_for(attempt)).await;
            }
        }
    }

    Err(last_error.expect("retry loop ran at least one attempt"))
}

/// Heuristic check for transient failures worth retrying
///
/// Recognizes the usual suspects: timeouts, connection failures, rate limits,
/// and 5xx status codes embedded in the message.
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();

    lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("unavailable")
        || lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_grows_exponentially() {
        let backoff = Backoff::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = Backoff::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(4))
            .with_jitter(false);

        assert_eq!(backoff.delay_for(8), Duration::from_secs(4));
    }

    #[test]
    fn test_allows_retry() {
        let backoff = Backoff::new(3);
        assert!(backoff.allows_retry(1));
        assert!(backoff.allows_retry(2));
        assert!(!backoff.allows_retry(3));
    }

    #[tokio::test]
    async fn test_run_with_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let backoff = Backoff::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false);

        let result = run_with_retry(&backoff, || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_with_retry_exhausts() {
        let backoff = Backoff::new(2)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false);

        let result: Result<(), String> =
            run_with_retry(&backoff, || async { Err("always".to_string()) }).await;

        assert_eq!(result, Err("always".to_string()));
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient("connection refused"));
        assert!(is_transient("request timed out"));
        assert!(is_transient("HTTP 503 Service Unavailable"));
        assert!(!is_transient("404 not found"));
        assert!(!is_transient("invalid input"));
    }
}
