//! Rate-limit middleware over model calls

use crate::error::Result;
use crate::middleware::{AgentMiddleware, PlanContext};
use async_trait::async_trait;
use std::time::Duration;
use tooling::rate_limit::SlidingWindowLimiter;

/// Blocks model calls that would exceed a sliding-window rate
///
/// `before_model` waits until the window has room; the wait ends when older
/// calls age out.
pub struct RateLimitMiddleware {
    limiter: SlidingWindowLimiter,
}

impl RateLimitMiddleware {
    /// Allow `max_calls` model invocations per `window`
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            limiter: SlidingWindowLimiter::new(max_calls, window),
        }
    }

    /// Calls recorded in the current window
    pub async fn current_load(&self) -> usize {
        self.limiter.in_flight().await
    }
}

#[async_trait]
impl AgentMiddleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn before_model(&self, ctx: &mut PlanContext) -> Result<()> {
        // Cached actions skip the model call and do not consume the window.
        if ctx.cached_action.is_some() {
            return Ok(());
        }

        self.limiter.acquire().await;
        Ok(())
    }
}
