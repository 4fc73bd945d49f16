//! Parallel tool execution
//!
//! Fans a batch of tool-call actions out across bounded workers, each under
//! its own deadline. Results come back indexed by the original position, so
//! `results[i]` always answers `actions[i]`. Individual failures are recorded
//! per slot; only a batch where everything failed is an error.

use crate::error::{AgentError, Result};
use crate::step::AgentAction;
use crate::tool::ToolRegistry;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tooling::async_utils::timeout::{with_timeout, TimeoutError};
use tooling::logging::format_duration;

/// Outcome of one action in a batch
#[derive(Debug)]
pub struct ToolRunResult {
    /// The action exactly as submitted
    pub action: AgentAction,

    /// Tool output on success
    pub output: Option<Value>,

    /// Failure description (tool error, timeout, unknown tool)
    pub error: Option<String>,

    pub duration: Duration,
}

impl ToolRunResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Bounded concurrent executor for tool-call batches
pub struct ParallelToolExecutor {
    registry: Arc<ToolRegistry>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    cancellation: CancellationToken,
}

impl ParallelToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, max_concurrency: usize, timeout: Duration) -> Self {
        Self {
            registry,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            timeout,
            cancellation: CancellationToken::new(),
        }
    }

    /// Use an externally controlled cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Execute every action concurrently, preserving order
    ///
    /// An empty batch is an empty result. When every action fails, the whole
    /// batch fails with [`AgentError::AllToolsFailed`].
    #[tracing::instrument(skip(self, actions), fields(batch = actions.len()))]
    pub async fn execute_batch(&self, actions: Vec<AgentAction>) -> Result<Vec<ToolRunResult>> {
        if actions.is_empty() {
            return Ok(Vec::new());
        }

        let total = actions.len();
        let results =
            futures::future::join_all(actions.into_iter().map(|action| self.run_one(action)))
                .await;

        let failed = results.iter().filter(|r| !r.succeeded()).count();
        tracing::debug!(total, failed, "tool batch finished");

        if failed == total {
            return Err(AgentError::AllToolsFailed(total));
        }
        Ok(results)
    }

    async fn run_one(&self, action: AgentAction) -> ToolRunResult {
        let timer = std::time::Instant::now();

        let (tool, input) = match &action {
            AgentAction::ToolCall { tool, input, .. } => (tool.clone(), input.clone()),
            other => {
                return ToolRunResult {
                    action: other.clone(),
                    output: None,
                    error: Some("not a tool call".to_string()),
                    duration: timer.elapsed(),
                }
            }
        };

        let outcome = self.invoke(&tool, input).await;
        let duration = timer.elapsed();
        tracing::trace!(
            tool = %tool,
            elapsed = %format_duration(duration),
            ok = outcome.is_ok(),
            "tool call finished"
        );

        match outcome {
            Ok(value) => ToolRunResult {
                action,
                output: Some(value),
                error: None,
                duration,
            },
            Err(message) => ToolRunResult {
                action,
                output: None,
                error: Some(message),
                duration,
            },
        }
    }

    async fn invoke(&self, tool: &str, input: Value) -> std::result::Result<Value, String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| "executor shut down".to_string())?;

        if self.cancellation.is_cancelled() {
            return Err(AgentError::Cancelled.to_string());
        }

        let call = self.registry.execute(tool, input);
        let guarded = async {
            tokio::select! {
                result = with_timeout(self.timeout, call) => result,
                _ = self.cancellation.cancelled() => Err(TimeoutError::Failed(AgentError::Cancelled)),
            }
        };

        match guarded.await {
            Ok(value) => Ok(value),
            Err(TimeoutError::Failed(error)) => Err(error.to_string()),
            Err(TimeoutError::Elapsed(deadline)) => {
                Err(format!("timed out after {:?}", deadline))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Instant;

    struct SleepyTool {
        name: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "sleeps then echoes"
        }
        async fn execute(&self, input: Value) -> Result<Value> {
            tokio::time::sleep(self.delay).await;
            Ok(json!({ "echo": input, "tool": self.name }))
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _input: Value) -> Result<Value> {
            Err(AgentError::tool("broken", "no backend"))
        }
    }

    fn sleepy_registry() -> Arc<ToolRegistry> {
        Arc::new(
            ToolRegistry::from_tools([
                Arc::new(SleepyTool { name: "t0", delay: Duration::from_millis(100) })
                    as Arc<dyn Tool>,
                Arc::new(SleepyTool { name: "t1", delay: Duration::from_millis(100) }),
                Arc::new(SleepyTool { name: "t2", delay: Duration::from_millis(100) }),
            ])
            .unwrap(),
        )
    }

    // Scenario: three 100ms tools at concurrency 3 run in parallel and the
    // result order matches the submission order.
    #[tokio::test]
    async fn test_fan_out_is_concurrent_and_order_preserving() {
        let executor =
            ParallelToolExecutor::new(sleepy_registry(), 3, Duration::from_secs(5));

        let actions = vec![
            AgentAction::tool_call("t0", json!({"i": 0})),
            AgentAction::tool_call("t1", json!({"i": 1})),
            AgentAction::tool_call("t2", json!({"i": 2})),
        ];
        let submitted = actions.clone();

        let start = Instant::now();
        let results = executor.execute_batch(actions).await.unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_millis(200), "took {:?}", elapsed);
        assert_eq!(results.len(), 3);
        for (index, result) in results.iter().enumerate() {
            assert_eq!(result.action, submitted[index]);
            let output = result.output.as_ref().unwrap();
            assert_eq!(output["tool"], format!("t{}", index));
        }
    }

    #[tokio::test]
    async fn test_concurrency_bound_serializes_excess() {
        let executor =
            ParallelToolExecutor::new(sleepy_registry(), 1, Duration::from_secs(5));

        let actions = vec![
            AgentAction::tool_call("t0", json!({})),
            AgentAction::tool_call("t1", json!({})),
        ];

        let start = Instant::now();
        executor.execute_batch(actions).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(190));
    }

    #[tokio::test]
    async fn test_per_action_timeout() {
        let registry = Arc::new(
            ToolRegistry::from_tools([
                Arc::new(SleepyTool { name: "slow", delay: Duration::from_secs(10) })
                    as Arc<dyn Tool>,
                Arc::new(SleepyTool { name: "fast", delay: Duration::from_millis(5) }),
            ])
            .unwrap(),
        );
        let executor = ParallelToolExecutor::new(registry, 2, Duration::from_millis(50));

        let results = executor
            .execute_batch(vec![
                AgentAction::tool_call("slow", json!({})),
                AgentAction::tool_call("fast", json!({})),
            ])
            .await
            .unwrap();

        assert!(results[0].error.as_ref().unwrap().contains("timed out"));
        assert!(results[1].succeeded());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let executor =
            ParallelToolExecutor::new(sleepy_registry(), 2, Duration::from_secs(1));
        let results = executor.execute_batch(Vec::new()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_is_not_fatal() {
        let registry = Arc::new(
            ToolRegistry::from_tools([
                Arc::new(BrokenTool) as Arc<dyn Tool>,
                Arc::new(SleepyTool { name: "ok", delay: Duration::from_millis(1) }),
            ])
            .unwrap(),
        );
        let executor = ParallelToolExecutor::new(registry, 2, Duration::from_secs(1));

        let results = executor
            .execute_batch(vec![
                AgentAction::tool_call("broken", json!({})),
                AgentAction::tool_call("ok", json!({})),
            ])
            .await
            .unwrap();

        assert!(!results[0].succeeded());
        assert!(results[1].succeeded());
    }

    #[tokio::test]
    async fn test_all_failed_is_aggregate_error() {
        let registry =
            Arc::new(ToolRegistry::from_tools([Arc::new(BrokenTool) as Arc<dyn Tool>]).unwrap());
        let executor = ParallelToolExecutor::new(registry, 2, Duration::from_secs(1));

        let err = executor
            .execute_batch(vec![
                AgentAction::tool_call("broken", json!({})),
                AgentAction::tool_call("missing", json!({})),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::AllToolsFailed(2)));
    }

    #[tokio::test]
    async fn test_cancellation_stops_pending_work() {
        let token = CancellationToken::new();
        token.cancel();

        let executor = ParallelToolExecutor::new(sleepy_registry(), 2, Duration::from_secs(5))
            .with_cancellation(token);

        let err = executor
            .execute_batch(vec![
                AgentAction::tool_call("t0", json!({})),
                AgentAction::tool_call("t1", json!({})),
            ])
            .await
            .unwrap_err();

        // Everything cancelled -> everything failed -> aggregate error.
        assert!(matches!(err, AgentError::AllToolsFailed(2)));
    }
}
