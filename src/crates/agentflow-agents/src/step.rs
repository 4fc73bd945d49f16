//! Step records and agent run state
//!
//! The step record is the abstraction the agent and graph cores share: one
//! round of an agent is an [`AgentAction`] (what the planner decided), an
//! observation (what happened), and an optional error. Steps are appended to
//! history and never mutated afterwards; the history handed to each plan call
//! reflects every prior step exactly.

use crate::error::{AgentError, Result};
use agentflow_checkpoint::CheckpointSaver;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A planner's decision for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentAction {
    /// Invoke a tool with the given input
    ToolCall {
        tool: String,
        input: Value,
        /// Raw model output the action was parsed from
        #[serde(default)]
        log: String,
    },
    /// The run is complete
    Finish {
        output: String,
        #[serde(default)]
        log: String,
    },
    /// The planner gave up; terminal for the run
    Error { message: String },
}

impl AgentAction {
    pub fn tool_call(tool: impl Into<String>, input: Value) -> Self {
        Self::ToolCall {
            tool: tool.into(),
            input,
            log: String::new(),
        }
    }

    pub fn finish(output: impl Into<String>) -> Self {
        Self::Finish {
            output: output.into(),
            log: String::new(),
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }

    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::ToolCall { tool, .. } => Some(tool),
            _ => None,
        }
    }
}

/// One completed loop iteration
///
/// `observation` describes the outcome the planner will see next round - a
/// tool's output, or a description of its failure when `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub action: AgentAction,
    pub observation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentStep {
    pub fn success(action: AgentAction, observation: impl Into<String>) -> Self {
        Self {
            action,
            observation: observation.into(),
            error: None,
        }
    }

    pub fn failure(action: AgentAction, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            action,
            observation: format!("error: {}", error),
            error: Some(error),
        }
    }
}

/// Lifecycle of an agent run; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl AgentStatus {
    /// Whether moving to `next` is a legal forward transition
    pub fn can_transition(self, next: AgentStatus) -> bool {
        match self {
            AgentStatus::Running => next != AgentStatus::Running,
            AgentStatus::Paused => matches!(next, AgentStatus::Completed | AgentStatus::Failed),
            AgentStatus::Completed | AgentStatus::Failed => false,
        }
    }
}

/// Mutable state of one agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub input: String,
    pub steps: Vec<AgentStep>,
    pub extras: HashMap<String, Value>,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentState {
    pub fn new(input: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            input: input.into(),
            steps: Vec::new(),
            extras: HashMap::new(),
            status: AgentStatus::Running,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a step and refresh the update timestamp
    pub fn push_step(&mut self, step: AgentStep) {
        self.steps.push(step);
        self.updated_at = Utc::now();
    }

    /// Advance the status; illegal transitions are rejected
    pub fn transition(&mut self, next: AgentStatus) -> Result<()> {
        if !self.status.can_transition(next) {
            return Err(AgentError::State(format!(
                "illegal status transition {:?} -> {:?}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Final outcome of an agent run
///
/// Always carries the partial step log, whatever the outcome, so callers can
/// inspect progress.
#[derive(Debug)]
pub struct AgentResult {
    pub output: String,
    pub success: bool,
    pub steps: Vec<AgentStep>,
    /// Planner iterations executed (a `Finish` iteration appends no step)
    pub total_steps: usize,
    pub error: Option<AgentError>,
}

impl AgentResult {
    pub fn completed(output: impl Into<String>, steps: Vec<AgentStep>, total_steps: usize) -> Self {
        Self {
            output: output.into(),
            success: true,
            steps,
            total_steps,
            error: None,
        }
    }

    pub fn failed(error: AgentError, steps: Vec<AgentStep>, total_steps: usize) -> Self {
        Self {
            output: String::new(),
            success: false,
            steps,
            total_steps,
            error: Some(error),
        }
    }
}

/// Persistence for agent run state
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_state(&self, run_id: &str, state: &AgentState) -> Result<()>;
    async fn load_state(&self, run_id: &str) -> Result<Option<AgentState>>;
    async fn delete_state(&self, run_id: &str) -> Result<()>;
}

/// Simple in-memory state store
#[derive(Default)]
pub struct InMemoryStateStore {
    states: tokio::sync::RwLock<HashMap<String, AgentState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every stored run
    pub async fn known_ids(&self) -> Vec<String> {
        self.states.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save_state(&self, run_id: &str, state: &AgentState) -> Result<()> {
        self.states
            .write()
            .await
            .insert(run_id.to_string(), state.clone());
        Ok(())
    }

    async fn load_state(&self, run_id: &str) -> Result<Option<AgentState>> {
        Ok(self.states.read().await.get(run_id).cloned())
    }

    async fn delete_state(&self, run_id: &str) -> Result<()> {
        self.states.write().await.remove(run_id);
        Ok(())
    }
}

/// State store backed by a checkpoint saver
///
/// Each save writes the serialized [`AgentState`] as a checkpoint on the
/// run's thread, so agent runs share persistence infrastructure with graph
/// runs.
pub struct CheckpointStateStore {
    saver: Arc<dyn agentflow_checkpoint::CheckpointSaver>,
}

impl CheckpointStateStore {
    pub fn new(saver: Arc<dyn agentflow_checkpoint::CheckpointSaver>) -> Self {
        Self { saver }
    }
}

#[async_trait]
impl StateStore for CheckpointStateStore {
    async fn save_state(&self, run_id: &str, state: &AgentState) -> Result<()> {
        let payload = serde_json::to_value(state)?;
        let previous = self
            .saver
            .load(&agentflow_checkpoint::CheckpointConfig::for_thread(run_id))
            .await
            .map_err(|e| AgentError::State(e.to_string()))?;

        let checkpoint = match previous {
            Some(prev) => prev.child(payload),
            None => agentflow_checkpoint::Checkpoint::new(run_id, payload),
        };

        self.saver
            .save(checkpoint)
            .await
            .map(|_| ())
            .map_err(|e| AgentError::State(e.to_string()))
    }

    async fn load_state(&self, run_id: &str) -> Result<Option<AgentState>> {
        let checkpoint = self
            .saver
            .load(&agentflow_checkpoint::CheckpointConfig::for_thread(run_id))
            .await
            .map_err(|e| AgentError::State(e.to_string()))?;

        checkpoint
            .map(|cp| serde_json::from_value(cp.state).map_err(AgentError::from))
            .transpose()
    }

    async fn delete_state(&self, run_id: &str) -> Result<()> {
        // Retention of old checkpoints is the saver's concern; dropping the
        // run only needs the latest gone from lookup, so delete the whole
        // thread history.
        let checkpoints = self
            .saver
            .list(run_id)
            .await
            .map_err(|e| AgentError::State(e.to_string()))?;

        for checkpoint in checkpoints {
            let config = agentflow_checkpoint::CheckpointConfig::for_thread(run_id)
                .with_namespace(checkpoint.namespace.clone())
                .with_checkpoint_id(checkpoint.id.clone());
            self.saver
                .delete(&config)
                .await
                .map_err(|e| AgentError::State(e.to_string()))?;
        }
        Ok(())
    }
}
