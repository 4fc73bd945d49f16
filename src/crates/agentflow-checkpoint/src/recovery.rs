//! Crash recovery from persisted checkpoints
//!
//! [`RecoveryManager`] restores a thread after a restart: it loads the latest
//! checkpoint, rebuilds the task ledger, and re-drives registered tasks
//! according to the durability mode. Task errors during replay are collected,
//! not fatal; the caller gets the final state together with everything that
//! went wrong.

use crate::checkpoint::CheckpointConfig;
use crate::durability::{
    DurabilityMode, DurableRunner, ExecutionContext, RetryPolicy, TaskFn, TaskStatus,
};
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointSaver;
use std::sync::Arc;

/// Outcome of a recovery pass
#[derive(Debug)]
pub struct RecoveryReport {
    /// Final state after replaying outstanding tasks
    pub state: serde_json::Value,

    /// Tasks that were re-executed, in order
    pub replayed: Vec<String>,

    /// Tasks skipped because the ledger marked them completed
    pub skipped: Vec<String>,

    /// Errors collected during replay (task id, message)
    pub errors: Vec<(String, String)>,
}

/// Restores thread state and resumes outstanding work
pub struct RecoveryManager {
    saver: Arc<dyn CheckpointSaver>,
    mode: DurabilityMode,
    policy: RetryPolicy,
    tasks: Vec<(String, TaskFn)>,
}

impl RecoveryManager {
    pub fn new(saver: Arc<dyn CheckpointSaver>, mode: DurabilityMode, policy: RetryPolicy) -> Self {
        Self {
            saver,
            mode,
            policy,
            tasks: Vec::new(),
        }
    }

    /// Register a task to be replayed during recovery
    ///
    /// Tasks replay in registration order.
    pub fn register_task(&mut self, task_id: impl Into<String>, task: TaskFn) -> &mut Self {
        self.tasks.push((task_id.into(), task));
        self
    }

    /// Recover the given thread from its latest checkpoint
    #[tracing::instrument(skip(self), fields(mode = ?self.mode))]
    pub async fn recover(&self, thread_id: &str) -> Result<RecoveryReport> {
        let history = self.saver.list(thread_id).await?;
        if history.is_empty() {
            return Err(CheckpointError::NotFound(format!(
                "no checkpoints for thread '{}'",
                thread_id
            )));
        }

        let latest = history.last().expect("non-empty history").clone();
        tracing::info!(
            thread_id,
            checkpoint_id = %latest.id,
            version = latest.version,
            "recovering from checkpoint"
        );

        let mut ctx = ExecutionContext::from_checkpoint(&latest);
        let mut state = latest.state;
        let mut report = RecoveryReport {
            state: serde_json::Value::Null,
            replayed: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
        };

        if self.mode == DurabilityMode::AtMostOnce {
            report.state = state;
            return Ok(report);
        }

        let runner = DurableRunner::new(self.saver.clone(), self.mode, self.policy.clone());

        for (task_id, task) in &self.tasks {
            let completed = ctx
                .task_executions
                .get(task_id)
                .map(|e| e.status == TaskStatus::Completed)
                .unwrap_or(false);

            if completed {
                report.skipped.push(task_id.clone());
                continue;
            }

            match runner.run_task(&mut ctx, task_id, task, state.clone()).await {
                Ok(output) => {
                    state = output;
                    report.replayed.push(task_id.clone());
                }
                Err(error) => {
                    tracing::warn!(task_id, %error, "task replay failed");
                    report.errors.push((task_id.clone(), error.to_string()));
                }
            }
        }

        report.state = state;
        Ok(report)
    }

    /// Convenience check: does the thread have anything to recover from?
    pub async fn has_checkpoints(&self, thread_id: &str) -> Result<bool> {
        Ok(self
            .saver
            .load(&CheckpointConfig::for_thread(thread_id))
            .await?
            .is_some())
    }
}
