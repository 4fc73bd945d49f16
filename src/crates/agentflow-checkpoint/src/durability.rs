//! Durable task execution
//!
//! Wraps a unit of work with a retry policy and a durability mode:
//!
//! - [`DurabilityMode::AtMostOnce`] - run once, no retry, no checkpoint.
//! - [`DurabilityMode::AtLeastOnce`] - checkpoint before the task, retry on
//!   failure; a crash between checkpoint and completion re-runs the task.
//! - [`DurabilityMode::ExactlyOnce`] - at-least-once plus a task-level ledger:
//!   a task whose [`TaskExecution`] is already `Completed` is skipped, and
//!   completion itself is checkpointed so the dedup survives restarts.
//!
//! The ledger travels inside checkpoint metadata under the `"tasks"` key, so
//! any [`CheckpointSaver`] backend carries it for free.

use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSource};
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointSaver;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tooling::async_utils::retry::Backoff;

/// Metadata key carrying the serialized task ledger
pub const TASK_LEDGER_KEY: &str = "tasks";

/// Re-execution guarantee applied to durable tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurabilityMode {
    /// No retry, no dedup, no checkpoint required
    AtMostOnce,
    /// Retry on failure; checkpoint before each task
    AtLeastOnce,
    /// At-least-once plus task-level dedup via the ledger
    ExactlyOnce,
}

/// Lifecycle of one durable task
///
/// Advances monotonically except for the `Retrying -> Running` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
}

/// Ledger entry for one task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskExecution {
    pub task_id: String,
    pub status: TaskStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TaskExecution {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            attempts: 0,
            started_at: None,
            ended_at: None,
            last_error: None,
        }
    }
}

/// A durable unit of work: state in, new state out
pub type TaskFn =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, anyhow::Result<serde_json::Value>> + Send + Sync>;

/// Wrap an async closure as a [`TaskFn`]
pub fn task_fn<F, Fut>(f: F) -> TaskFn
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    Arc::new(move |state| Box::pin(f(state)))
}

/// Retry schedule plus a retryability predicate
///
/// `max_retries` counts additional attempts beyond the first; zero means a
/// single attempt. Delays follow `initial_delay * multiplier^(attempt-1)`,
/// capped at `max_delay`.
#[derive(Clone)]
pub struct RetryPolicy {
    backoff: Backoff,
    should_retry: Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>,
}

impl RetryPolicy {
    /// Create a policy allowing `max_retries` retries
    ///
    /// A negative budget is rejected as a configuration error.
    pub fn new(max_retries: i32) -> Result<Self> {
        if max_retries < 0 {
            return Err(CheckpointError::InvalidPolicy(format!(
                "max_retries must be non-negative, got {}",
                max_retries
            )));
        }

        Ok(Self {
            backoff: Backoff::new(max_retries as u32 + 1)
                .with_initial_delay(Duration::from_millis(200))
                .with_multiplier(2.0)
                .with_max_delay(Duration::from_secs(30))
                .with_jitter(false),
            should_retry: Arc::new(|_| true),
        })
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(0).expect("zero retries is always valid")
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.backoff.initial_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.backoff.max_delay = delay;
        self
    }

    /// Install a predicate deciding whether an error is worth retrying
    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Total attempts this policy allows (retries + 1)
    pub fn max_attempts(&self) -> u32 {
        self.backoff.max_attempts
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay_for(attempt)
    }

    fn retryable(&self, error: &anyhow::Error) -> bool {
        (self.should_retry)(error)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.backoff.max_attempts)
            .field("initial_delay", &self.backoff.initial_delay)
            .field("multiplier", &self.backoff.multiplier)
            .field("max_delay", &self.backoff.max_delay)
            .finish()
    }
}

/// Per-run bookkeeping for durable execution
///
/// Owns the task ledger for its thread; disposed once the run reaches a final
/// outcome. The ledger round-trips through checkpoint metadata.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub thread_id: String,
    pub namespace: String,
    pub task_executions: HashMap<String, TaskExecution>,
    pub last_checkpoint_id: Option<String>,
    next_version: u64,
}

impl ExecutionContext {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            namespace: String::new(),
            task_executions: HashMap::new(),
            last_checkpoint_id: None,
            next_version: 1,
        }
    }

    /// Rebuild a context from a recovered checkpoint
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let task_executions = checkpoint
            .metadata
            .extra
            .get(TASK_LEDGER_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        Self {
            thread_id: checkpoint.thread_id.clone(),
            namespace: checkpoint.namespace.clone(),
            task_executions,
            last_checkpoint_id: Some(checkpoint.id.clone()),
            next_version: checkpoint.version + 1,
        }
    }

    /// Ledger entry for a task, creating a pending one if absent
    pub fn execution_mut(&mut self, task_id: &str) -> &mut TaskExecution {
        self.task_executions
            .entry(task_id.to_string())
            .or_insert_with(|| TaskExecution::new(task_id))
    }

    fn next_checkpoint(&mut self, state: serde_json::Value) -> Result<Checkpoint> {
        let ledger = serde_json::to_value(&self.task_executions)?;
        let mut checkpoint = Checkpoint::new(self.thread_id.clone(), state)
            .with_namespace(self.namespace.clone())
            .with_version(self.next_version)
            .with_metadata(
                CheckpointMetadata::new()
                    .with_source(CheckpointSource::Loop)
                    .with_extra(TASK_LEDGER_KEY, ledger),
            );

        if let Some(parent) = &self.last_checkpoint_id {
            checkpoint = checkpoint.with_parent(parent.clone());
        }

        self.last_checkpoint_id = Some(checkpoint.id.clone());
        self.next_version += 1;
        Ok(checkpoint)
    }
}

/// Runs tasks under a durability mode and retry policy
pub struct DurableRunner {
    saver: Arc<dyn CheckpointSaver>,
    mode: DurabilityMode,
    policy: RetryPolicy,
    task_timeout: Option<Duration>,
    cancellation: CancellationToken,
}

impl DurableRunner {
    pub fn new(saver: Arc<dyn CheckpointSaver>, mode: DurabilityMode, policy: RetryPolicy) -> Self {
        Self {
            saver,
            mode,
            policy,
            task_timeout: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Bound each task attempt by a deadline
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Use an externally controlled cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn mode(&self) -> DurabilityMode {
        self.mode
    }

    /// Execute one task under the configured guarantees
    ///
    /// Returns the task's output state, or the input state unchanged when
    /// ExactlyOnce dedup skips an already-completed task.
    #[tracing::instrument(skip(self, ctx, task, state), fields(task_id, mode = ?self.mode))]
    pub async fn run_task(
        &self,
        ctx: &mut ExecutionContext,
        task_id: &str,
        task: &TaskFn,
        state: serde_json::Value,
    ) -> Result<serde_json::Value> {
        if self.mode == DurabilityMode::ExactlyOnce
            && ctx
                .task_executions
                .get(task_id)
                .map(|e| e.status == TaskStatus::Completed)
                .unwrap_or(false)
        {
            tracing::debug!(task_id, "task already completed, skipping");
            return Ok(state);
        }

        {
            let entry = ctx.execution_mut(task_id);
            entry.status = TaskStatus::Running;
            entry.started_at = Some(Utc::now());
        }

        if self.mode != DurabilityMode::AtMostOnce {
            let checkpoint = ctx.next_checkpoint(state.clone())?;
            self.saver.save(checkpoint).await?;
        }

        let max_attempts = match self.mode {
            DurabilityMode::AtMostOnce => 1,
            _ => self.policy.max_attempts(),
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 1..=max_attempts {
            if self.cancellation.is_cancelled() {
                return Err(CheckpointError::Cancelled);
            }

            ctx.execution_mut(task_id).attempts = attempt;

            match self.attempt(task, state.clone()).await {
                Ok(output) => {
                    let entry = ctx.execution_mut(task_id);
                    entry.status = TaskStatus::Completed;
                    entry.ended_at = Some(Utc::now());
                    entry.last_error = None;

                    if self.mode == DurabilityMode::ExactlyOnce {
                        // Persist completion so dedup survives a restart.
                        let checkpoint = ctx.next_checkpoint(output.clone())?;
                        self.saver.save(checkpoint).await?;
                    }

                    return Ok(output);
                }
                Err(error) => {
                    tracing::warn!(task_id, attempt, %error, "task attempt failed");
                    let retryable =
                        attempt < max_attempts && self.policy.retryable(&error);

                    let entry = ctx.execution_mut(task_id);
                    entry.last_error = Some(error.to_string());
                    last_error = Some(error);

                    if !retryable {
                        break;
                    }

                    entry.status = TaskStatus::Retrying;
                    let delay = self.policy.delay_for(attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancellation.cancelled() => return Err(CheckpointError::Cancelled),
                    }
                    ctx.execution_mut(task_id).status = TaskStatus::Running;
                }
            }
        }

        let entry = ctx.execution_mut(task_id);
        entry.status = TaskStatus::Failed;
        entry.ended_at = Some(Utc::now());

        Err(CheckpointError::TaskFailed {
            task: task_id.to_string(),
            attempts: entry.attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown failure".to_string()),
        })
    }

    async fn attempt(
        &self,
        task: &TaskFn,
        state: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        match self.task_timeout {
            Some(deadline) => match tooling::with_timeout(deadline, task(state)).await {
                Ok(output) => Ok(output),
                Err(tooling::TimeoutError::Failed(inner)) => Err(inner),
                Err(tooling::TimeoutError::Elapsed(d)) => {
                    Err(anyhow::anyhow!("task timed out after {:?}", d))
                }
            },
            None => task(state).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySaver;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_task(calls: Arc<AtomicU32>, fail_first: u32) -> TaskFn {
        task_fn(move |state| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < fail_first {
                    anyhow::bail!("transient failure {}", n);
                }
                let counter = state["counter"].as_i64().unwrap_or(0);
                Ok(json!({"counter": counter + 10}))
            }
        })
    }

    #[tokio::test]
    async fn test_at_most_once_does_not_retry_or_checkpoint() {
        let saver = Arc::new(InMemorySaver::new());
        let calls = Arc::new(AtomicU32::new(0));
        let runner = DurableRunner::new(
            saver.clone(),
            DurabilityMode::AtMostOnce,
            RetryPolicy::new(3).unwrap(),
        );

        let mut ctx = ExecutionContext::new("t1");
        let task = counting_task(calls.clone(), 1);
        let result = runner.run_task(&mut ctx, "only", &task, json!({"counter": 0})).await;

        assert!(matches!(result, Err(CheckpointError::TaskFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(saver.checkpoint_count().await, 0);
    }

    #[tokio::test]
    async fn test_at_least_once_retries_and_checkpoints_first() {
        let saver = Arc::new(InMemorySaver::new());
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3)
            .unwrap()
            .with_initial_delay(Duration::from_millis(1));
        let runner = DurableRunner::new(saver.clone(), DurabilityMode::AtLeastOnce, policy);

        let mut ctx = ExecutionContext::new("t1");
        let task = counting_task(calls.clone(), 2);
        let output = runner
            .run_task(&mut ctx, "add", &task, json!({"counter": 5}))
            .await
            .unwrap();

        assert_eq!(output, json!({"counter": 15}));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(saver.checkpoint_count().await >= 1);
        assert_eq!(
            ctx.task_executions["add"].status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_exactly_once_skips_completed_task() {
        let saver = Arc::new(InMemorySaver::new());
        let calls = Arc::new(AtomicU32::new(0));
        let runner = DurableRunner::new(
            saver,
            DurabilityMode::ExactlyOnce,
            RetryPolicy::new(2).unwrap().with_initial_delay(Duration::from_millis(1)),
        );

        let mut ctx = ExecutionContext::new("t1");
        let task = counting_task(calls.clone(), 0);

        let first = runner
            .run_task(&mut ctx, "add", &task, json!({"counter": 0}))
            .await
            .unwrap();
        assert_eq!(first, json!({"counter": 10}));

        // Second run with the same ledger is a no-op.
        let second = runner.run_task(&mut ctx, "add", &task, first.clone()).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_should_retry_predicate_stops_retries() {
        let saver = Arc::new(InMemorySaver::new());
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5)
            .unwrap()
            .with_initial_delay(Duration::from_millis(1))
            .with_should_retry(|e| !e.to_string().contains("fatal"));
        let runner = DurableRunner::new(saver, DurabilityMode::AtLeastOnce, policy);

        let calls_clone = calls.clone();
        let task = task_fn(move |_state| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("fatal: bad input")
            }
        });

        let mut ctx = ExecutionContext::new("t1");
        let result = runner.run_task(&mut ctx, "parse", &task, json!({})).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.task_executions["parse"].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_negative_retry_budget_is_rejected() {
        assert!(matches!(
            RetryPolicy::new(-1),
            Err(CheckpointError::InvalidPolicy(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let saver = Arc::new(InMemorySaver::new());
        let calls = Arc::new(AtomicU32::new(0));
        let runner = DurableRunner::new(saver, DurabilityMode::AtLeastOnce, RetryPolicy::none());

        let mut ctx = ExecutionContext::new("t1");
        let task = counting_task(calls.clone(), 5);
        let result = runner.run_task(&mut ctx, "once", &task, json!({})).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ledger_round_trips_through_checkpoint() {
        let saver = Arc::new(InMemorySaver::new());
        let runner = DurableRunner::new(
            saver.clone(),
            DurabilityMode::ExactlyOnce,
            RetryPolicy::none(),
        );

        let mut ctx = ExecutionContext::new("t1");
        let task = counting_task(Arc::new(AtomicU32::new(0)), 0);
        runner
            .run_task(&mut ctx, "add", &task, json!({"counter": 1}))
            .await
            .unwrap();

        let latest = saver
            .load(&crate::checkpoint::CheckpointConfig::for_thread("t1"))
            .await
            .unwrap()
            .unwrap();
        let restored = ExecutionContext::from_checkpoint(&latest);

        assert_eq!(restored.task_executions["add"].status, TaskStatus::Completed);
        assert_eq!(restored.last_checkpoint_id.as_deref(), Some(latest.id.as_str()));
    }

    #[tokio::test]
    async fn test_task_timeout() {
        let saver = Arc::new(InMemorySaver::new());
        let runner = DurableRunner::new(saver, DurabilityMode::AtLeastOnce, RetryPolicy::none())
            .with_task_timeout(Duration::from_millis(20));

        let task = task_fn(|state| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(state)
        });

        let mut ctx = ExecutionContext::new("t1");
        let result = runner.run_task(&mut ctx, "slow", &task, json!({})).await;

        match result {
            Err(CheckpointError::TaskFailed { message, .. }) => {
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
