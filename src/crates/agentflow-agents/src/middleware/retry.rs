//! Retry middleware for transient planner failures

use crate::error::AgentError;
use crate::middleware::{AgentMiddleware, PlanContext};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tooling::async_utils::retry::{is_transient, Backoff};

/// Retries failed model calls with exponential backoff
///
/// Attempts are counted per step index, so a retry budget refreshes on every
/// new step. Only transient-looking failures are retried unless
/// `retry_all_errors` is set.
pub struct RetryMiddleware {
    backoff: Backoff,
    retry_all_errors: bool,
    attempts: Mutex<HashMap<usize, u32>>,
}

impl RetryMiddleware {
    pub fn new(max_retries: u32) -> Self {
        Self {
            backoff: Backoff::new(max_retries + 1)
                .with_initial_delay(Duration::from_millis(200))
                .with_jitter(false),
            retry_all_errors: false,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Retry every planner failure, not just transient ones
    pub fn retry_all_errors(mut self) -> Self {
        self.retry_all_errors = true;
        self
    }

    fn is_retryable(&self, error: &AgentError) -> bool {
        if self.retry_all_errors {
            return true;
        }
        matches!(error, AgentError::Model(_)) && is_transient(&error.to_string())
    }
}

#[async_trait]
impl AgentMiddleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    async fn on_error(&self, ctx: &PlanContext, error: &AgentError) -> (bool, Option<AgentError>) {
        if !self.is_retryable(error) {
            return (false, None);
        }

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(ctx.step).or_insert(0);
            *entry += 1;
            *entry
        };

        if !self.backoff.allows_retry(attempt) {
            tracing::debug!(step = ctx.step, attempt, "retry budget exhausted");
            return (false, None);
        }

        let delay = self.backoff.delay_for(attempt);
        tracing::debug!(step = ctx.step, attempt, ?delay, "retrying after failure");
        tokio::time::sleep(delay).await;
        (true, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> AgentError {
        AgentError::Model("connection reset by peer".into())
    }

    #[tokio::test]
    async fn test_retries_transient_model_errors_up_to_budget() {
        let middleware = RetryMiddleware::new(2).with_backoff(
            Backoff::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );
        let ctx = PlanContext::new(0, "q", 0);

        let (retry, _) = middleware.on_error(&ctx, &transient()).await;
        assert!(retry);
        let (retry, _) = middleware.on_error(&ctx, &transient()).await;
        assert!(retry);
        // Budget spent.
        let (retry, _) = middleware.on_error(&ctx, &transient()).await;
        assert!(!retry);
    }

    #[tokio::test]
    async fn test_budget_is_per_step() {
        let middleware = RetryMiddleware::new(1).with_backoff(
            Backoff::new(2)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );

        let (retry, _) = middleware
            .on_error(&PlanContext::new(0, "q", 0), &transient())
            .await;
        assert!(retry);
        let (retry, _) = middleware
            .on_error(&PlanContext::new(0, "q", 0), &transient())
            .await;
        assert!(!retry);

        // A new step gets a fresh budget.
        let (retry, _) = middleware
            .on_error(&PlanContext::new(1, "q", 1), &transient())
            .await;
        assert!(retry);
    }

    #[tokio::test]
    async fn test_non_transient_errors_not_retried() {
        let middleware = RetryMiddleware::new(3);
        let ctx = PlanContext::new(0, "q", 0);

        let (retry, _) = middleware
            .on_error(&ctx, &AgentError::Parse("bad format".into()))
            .await;
        assert!(!retry);
    }

    #[tokio::test]
    async fn test_retry_all_errors_flag() {
        let middleware = RetryMiddleware::new(1)
            .with_backoff(
                Backoff::new(2)
                    .with_initial_delay(Duration::from_millis(1))
                    .with_jitter(false),
            )
            .retry_all_errors();
        let ctx = PlanContext::new(0, "q", 0);

        let (retry, _) = middleware
            .on_error(&ctx, &AgentError::Planner("odd".into()))
            .await;
        assert!(retry);
    }
}
