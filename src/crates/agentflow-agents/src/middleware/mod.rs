//! Middleware around model and tool calls
//!
//! Middleware composes in declared order as an onion: `before_*` hooks run
//! first-to-last, `after_*` hooks run last-to-first. For a chain
//! `[M1, M2, M3]` around a handler `H` the order is
//! `M1.before, M2.before, M3.before, H, M3.after, M2.after, M1.after`.
//!
//! Built-ins: [`RetryMiddleware`](retry::RetryMiddleware),
//! [`RateLimitMiddleware`](rate_limit::RateLimitMiddleware),
//! [`ModerationMiddleware`](moderation::ModerationMiddleware),
//! [`CacheMiddleware`](cache::CacheMiddleware),
//! [`LoggingMiddleware`](logging::LoggingMiddleware).

pub mod cache;
pub mod logging;
pub mod moderation;
pub mod rate_limit;
pub mod retry;

use crate::error::{AgentError, Result};
use crate::step::{AgentAction, AgentResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Context handed to model-side hooks
#[derive(Debug, Clone)]
pub struct PlanContext {
    /// Zero-based step index within the run
    pub step: usize,

    /// The run's input
    pub input: String,

    /// History length at the time of the call
    pub history_len: usize,

    /// Set by a `before_model` hook to skip the planner call entirely
    /// (e.g. a cache hit)
    pub cached_action: Option<AgentAction>,
}

impl PlanContext {
    pub fn new(step: usize, input: impl Into<String>, history_len: usize) -> Self {
        Self {
            step,
            input: input.into(),
            history_len,
            cached_action: None,
        }
    }
}

/// Hooks around the agent's model and tool calls
///
/// All hooks are optional; defaults are pass-through.
#[async_trait]
pub trait AgentMiddleware: Send + Sync {
    fn name(&self) -> &str;

    /// Before the planner runs; may mutate the context or abort
    async fn before_model(&self, _ctx: &mut PlanContext) -> Result<()> {
        Ok(())
    }

    /// After the planner produced an action; may rewrite it or abort
    async fn after_model(&self, _ctx: &PlanContext, _action: &mut AgentAction) -> Result<()> {
        Ok(())
    }

    /// Before a tool call; may rewrite the input or abort
    async fn before_tool_call(&self, _tool: &str, _input: &mut Value) -> Result<()> {
        Ok(())
    }

    /// After a tool call; sees the outcome and may replace it
    async fn after_tool_call(
        &self,
        _tool: &str,
        _input: &Value,
        output: Result<Value>,
    ) -> Result<Value> {
        output
    }

    /// Consulted when the planner fails: `(should_retry, transformed_error)`
    async fn on_error(
        &self,
        _ctx: &PlanContext,
        _error: &AgentError,
    ) -> (bool, Option<AgentError>) {
        (false, None)
    }

    /// After the run reached its final result
    async fn on_complete(&self, _result: &AgentResult) -> Result<()> {
        Ok(())
    }
}

/// Ordered middleware composition
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn AgentMiddleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, middleware: Arc<dyn AgentMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn push(&mut self, middleware: Arc<dyn AgentMiddleware>) {
        self.middlewares.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub async fn before_model(&self, ctx: &mut PlanContext) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.before_model(ctx).await?;
        }
        Ok(())
    }

    pub async fn after_model(&self, ctx: &PlanContext, action: &mut AgentAction) -> Result<()> {
        for middleware in self.middlewares.iter().rev() {
            middleware.after_model(ctx, action).await?;
        }
        Ok(())
    }

    pub async fn before_tool_call(&self, tool: &str, input: &mut Value) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.before_tool_call(tool, input).await?;
        }
        Ok(())
    }

    pub async fn after_tool_call(
        &self,
        tool: &str,
        input: &Value,
        mut output: Result<Value>,
    ) -> Result<Value> {
        for middleware in self.middlewares.iter().rev() {
            output = middleware.after_tool_call(tool, input, output).await;
        }
        output
    }

    /// Collapse the chain's verdicts: retry if anyone wants a retry, the
    /// last transform wins
    pub async fn on_error(
        &self,
        ctx: &PlanContext,
        error: &AgentError,
    ) -> (bool, Option<AgentError>) {
        let mut should_retry = false;
        let mut transformed = None;

        for middleware in &self.middlewares {
            let (retry, replacement) = middleware.on_error(ctx, error).await;
            should_retry |= retry;
            if replacement.is_some() {
                transformed = replacement;
            }
        }

        (should_retry, transformed)
    }

    pub async fn on_complete(&self, result: &AgentResult) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.on_complete(result).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AgentMiddleware for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        async fn before_model(&self, _ctx: &mut PlanContext) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}.before", self.label));
            Ok(())
        }

        async fn after_model(&self, _ctx: &PlanContext, _action: &mut AgentAction) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}.after", self.label));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_onion_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new()
            .with(Arc::new(Recorder { label: "M1", log: log.clone() }))
            .with(Arc::new(Recorder { label: "M2", log: log.clone() }))
            .with(Arc::new(Recorder { label: "M3", log: log.clone() }));

        let mut ctx = PlanContext::new(0, "input", 0);
        chain.before_model(&mut ctx).await.unwrap();
        log.lock().unwrap().push("H".to_string());
        let mut action = AgentAction::finish("done");
        chain.after_model(&ctx, &mut action).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["M1.before", "M2.before", "M3.before", "H", "M3.after", "M2.after", "M1.after"]
        );
    }

    struct RetryVoter(bool);

    #[async_trait]
    impl AgentMiddleware for RetryVoter {
        fn name(&self) -> &str {
            "voter"
        }

        async fn on_error(
            &self,
            _ctx: &PlanContext,
            _error: &AgentError,
        ) -> (bool, Option<AgentError>) {
            (self.0, None)
        }
    }

    struct Transformer(&'static str);

    #[async_trait]
    impl AgentMiddleware for Transformer {
        fn name(&self) -> &str {
            "transformer"
        }

        async fn on_error(
            &self,
            _ctx: &PlanContext,
            _error: &AgentError,
        ) -> (bool, Option<AgentError>) {
            (false, Some(AgentError::Planner(self.0.to_string())))
        }
    }

    #[tokio::test]
    async fn test_on_error_any_retry_wins_last_transform_wins() {
        let chain = MiddlewareChain::new()
            .with(Arc::new(Transformer("first")))
            .with(Arc::new(RetryVoter(true)))
            .with(Arc::new(Transformer("last")));

        let ctx = PlanContext::new(0, "i", 0);
        let (retry, transformed) = chain
            .on_error(&ctx, &AgentError::Model("boom".into()))
            .await;

        assert!(retry);
        assert_eq!(
            transformed.unwrap().to_string(),
            AgentError::Planner("last".into()).to_string()
        );
    }
}
