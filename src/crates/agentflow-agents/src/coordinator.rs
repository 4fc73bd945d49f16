//! Coordinator agent: decompose, dispatch, aggregate
//!
//! On a `Task` message the coordinator asks its [`CoordinationStrategy`] to
//! decompose the work, picks a specialist for each sub-task by capability
//! score, and dispatches sub-messages whose `parent_id` is the original task
//! id. Completion is tracked explicitly: a sub-task is done exactly when a
//! `Result` arrives whose `parent_id` equals that sub-task's dispatched
//! message id, counted against a per-root outstanding counter - never
//! inferred from arrival counts. When the counter reaches zero the partial
//! results are merged (aggregated by sub-task, in dispatch order) and one
//! final `Result` goes back to the original sender.

use crate::bus::{AgentMessage, BusAgent, BusSender, MessageKind};
use crate::error::{AgentError, Result};
use crate::specialists::Specialist;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use uuid::Uuid;

/// One unit of decomposed work
#[derive(Debug, Clone, PartialEq)]
pub struct SubTask {
    pub id: String,
    pub description: String,
}

impl SubTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
        }
    }
}

/// How a coordinator splits, assigns, and merges work
#[async_trait]
pub trait CoordinationStrategy: Send + Sync {
    /// Split a task into ordered sub-tasks (never empty)
    async fn decompose_task(&self, content: &str) -> Result<Vec<SubTask>>;

    /// Pick the specialist for a sub-task; returns the agent id
    async fn select_agent(
        &self,
        sub_task: &SubTask,
        specialists: &[Arc<dyn Specialist>],
    ) -> Result<String>;

    /// Merge per-sub-task results (dispatch order) into the final answer
    async fn merge_results(&self, results: &[(String, Value)]) -> Result<Value>;
}

/// Default strategy: sentence-level decomposition, capability-score
/// selection, concatenating merge
#[derive(Debug, Default)]
pub struct KeywordStrategy;

#[async_trait]
impl CoordinationStrategy for KeywordStrategy {
    async fn decompose_task(&self, content: &str) -> Result<Vec<SubTask>> {
        let mut sub_tasks: Vec<SubTask> = content
            .split(|c| matches!(c, '.' | ';' | '\n'))
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(SubTask::new)
            .collect();

        if sub_tasks.is_empty() {
            sub_tasks.push(SubTask::new(content.trim()));
        }
        Ok(sub_tasks)
    }

    async fn select_agent(
        &self,
        sub_task: &SubTask,
        specialists: &[Arc<dyn Specialist>],
    ) -> Result<String> {
        let best = specialists
            .iter()
            .map(|agent| {
                let (_, score) = agent.can_handle(&sub_task.description);
                (agent, score)
            })
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((agent, _)) => Ok(agent.id().to_string()),
            None => Err(AgentError::Bus("no specialists available".into())),
        }
    }

    async fn merge_results(&self, results: &[(String, Value)]) -> Result<Value> {
        let sections: Vec<String> = results
            .iter()
            .map(|(description, value)| {
                let answer = value
                    .get("answer")
                    .and_then(|a| a.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());
                format!("{}: {}", description, answer)
            })
            .collect();

        Ok(json!({ "summary": sections.join("\n") }))
    }
}

/// Aggregation slot for one dispatched sub-task
struct SubTaskSlot {
    sub_message_id: String,
    description: String,
    result: Option<Value>,
}

/// Aggregation state for one root task
struct RootTask {
    origin: String,
    root_id: String,
    slots: Vec<SubTaskSlot>,
    outstanding: usize,
}

#[derive(Default)]
struct PendingState {
    roots: HashMap<String, RootTask>,
    /// sub-message id -> root id
    sub_to_root: HashMap<String, String>,
}

/// Agent that coordinates specialists over the bus
pub struct Coordinator {
    id: String,
    strategy: Arc<dyn CoordinationStrategy>,
    specialists: Vec<Arc<dyn Specialist>>,
    sender: BusSender,
    pending: Mutex<PendingState>,
}

impl Coordinator {
    pub fn new(
        id: impl Into<String>,
        strategy: Arc<dyn CoordinationStrategy>,
        specialists: Vec<Arc<dyn Specialist>>,
        sender: BusSender,
    ) -> Self {
        Self {
            id: id.into(),
            strategy,
            specialists,
            sender,
            pending: Mutex::new(PendingState::default()),
        }
    }

    /// Root tasks still waiting on sub-task results
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().roots.len()
    }

    async fn handle_task(&self, message: AgentMessage) -> Result<Option<AgentMessage>> {
        let content = message
            .content
            .get("task")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| match &message.content {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            });

        let sub_tasks = self.strategy.decompose_task(&content).await?;
        tracing::info!(
            coordinator = %self.id,
            root = %message.id,
            sub_tasks = sub_tasks.len(),
            "task decomposed"
        );

        // Build and record every sub-message before sending any, so a fast
        // reply can never race an incomplete ledger.
        let mut dispatches = Vec::with_capacity(sub_tasks.len());
        for sub_task in &sub_tasks {
            let agent_id = self
                .strategy
                .select_agent(sub_task, &self.specialists)
                .await?;
            let sub_message = AgentMessage::task(
                self.id.clone(),
                agent_id,
                json!({ "task": sub_task.description }),
            )
            .with_parent(message.id.clone());
            dispatches.push((sub_task.description.clone(), sub_message));
        }

        {
            let mut pending = self.pending.lock().unwrap();
            let root = RootTask {
                origin: message.from.clone(),
                root_id: message.id.clone(),
                outstanding: dispatches.len(),
                slots: dispatches
                    .iter()
                    .map(|(description, sub_message)| SubTaskSlot {
                        sub_message_id: sub_message.id.clone(),
                        description: description.clone(),
                        result: None,
                    })
                    .collect(),
            };
            for (_, sub_message) in &dispatches {
                pending
                    .sub_to_root
                    .insert(sub_message.id.clone(), message.id.clone());
            }
            pending.roots.insert(message.id.clone(), root);
        }

        for (_, sub_message) in dispatches {
            self.sender.send(sub_message).await?;
        }
        Ok(None)
    }

    fn handle_result(&self, message: &AgentMessage) -> Option<ReadyRoot> {
        let parent_id = message.parent_id.as_ref()?;
        let mut pending = self.pending.lock().unwrap();

        let root_id = pending.sub_to_root.remove(parent_id)?;
        let root = pending.roots.get_mut(&root_id)?;

        let slot = root
            .slots
            .iter_mut()
            .find(|slot| &slot.sub_message_id == parent_id)?;

        // Aggregated by sub-task id, whatever the arrival order.
        if slot.result.is_none() {
            slot.result = Some(message.content.clone());
            root.outstanding -= 1;
        }

        if root.outstanding > 0 {
            return None;
        }

        let root = pending.roots.remove(&root_id).expect("root exists");
        Some(ReadyRoot {
            origin: root.origin,
            root_id: root.root_id,
            results: root
                .slots
                .into_iter()
                .map(|slot| (slot.description, slot.result.unwrap_or(Value::Null)))
                .collect(),
        })
    }

    fn handle_error(&self, message: &AgentMessage) -> Option<AgentMessage> {
        let parent_id = message.parent_id.as_ref()?;
        let mut pending = self.pending.lock().unwrap();

        let root_id = pending.sub_to_root.remove(parent_id)?;
        let root = pending.roots.remove(&root_id)?;

        // Forget the other sub-tasks of this root; their late results will
        // simply find no ledger entry.
        pending.sub_to_root.retain(|_, mapped| mapped != &root_id);

        Some(
            AgentMessage::error(self.id.clone(), root.origin, message.content.clone())
                .with_parent(root.root_id),
        )
    }
}

struct ReadyRoot {
    origin: String,
    root_id: String,
    results: Vec<(String, Value)>,
}

#[async_trait]
impl BusAgent for Coordinator {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "decomposes tasks, dispatches them to specialists, aggregates results"
    }

    async fn receive_message(&self, message: AgentMessage) -> Result<Option<AgentMessage>> {
        match message.kind {
            MessageKind::Task => self.handle_task(message).await,
            MessageKind::Result => match self.handle_result(&message) {
                Some(ready) => {
                    let merged = self.strategy.merge_results(&ready.results).await?;
                    tracing::info!(
                        coordinator = %self.id,
                        root = %ready.root_id,
                        "all sub-tasks complete"
                    );
                    Ok(Some(
                        AgentMessage::result(self.id.clone(), ready.origin, merged)
                            .with_parent(ready.root_id),
                    ))
                }
                None => Ok(None),
            },
            MessageKind::Error => Ok(self.handle_error(&message)),
            _ => Ok(None),
        }
    }
}
