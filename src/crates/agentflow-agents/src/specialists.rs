//! Specialist agents
//!
//! A specialist is a bus agent that self-declares a capability score over a
//! task via [`Specialist::can_handle`]. Five stock roles are provided
//! (researcher, writer, reviewer, analyst, planner); each scores tasks by
//! keyword affinity and executes with a role prompt against a [`ChatModel`].

use crate::bus::{AgentMessage, BusAgent, MessageKind};
use crate::error::Result;
use crate::model::{ChatModel, InvokeOptions, Message};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Capability self-assessment over tasks
pub trait Specialist: BusAgent {
    /// Whether this agent can take the task, and how well (score in `[0, 1]`)
    fn can_handle(&self, task: &str) -> (bool, f64);
}

/// Role definition: keywords for scoring, prompt for execution
#[derive(Debug, Clone, Copy)]
pub struct SpecialistProfile {
    pub role: &'static str,
    pub keywords: &'static [&'static str],
    pub prompt: &'static str,
}

impl SpecialistProfile {
    pub fn researcher() -> Self {
        Self {
            role: "researcher",
            keywords: &["research", "find", "search", "investigate", "source", "look up"],
            prompt: "You are a research specialist. Gather the relevant facts for the task and report them with sources where possible.",
        }
    }

    pub fn writer() -> Self {
        Self {
            role: "writer",
            keywords: &["write", "draft", "compose", "summarize", "document", "article"],
            prompt: "You are a writing specialist. Produce clear, well-structured prose for the task.",
        }
    }

    pub fn reviewer() -> Self {
        Self {
            role: "reviewer",
            keywords: &["review", "check", "verify", "critique", "proofread", "audit"],
            prompt: "You are a review specialist. Examine the material critically and report concrete issues and improvements.",
        }
    }

    pub fn analyst() -> Self {
        Self {
            role: "analyst",
            keywords: &["analyze", "analyse", "compare", "measure", "data", "trend", "evaluate"],
            prompt: "You are an analysis specialist. Work through the data methodically and state your conclusions with reasoning.",
        }
    }

    pub fn planner() -> Self {
        Self {
            role: "planner",
            keywords: &["plan", "schedule", "organize", "roadmap", "strategy", "milestones"],
            prompt: "You are a planning specialist. Break the task into concrete ordered steps with clear outcomes.",
        }
    }

    /// Keyword-affinity score: fraction of role keywords present in the task
    pub fn score(&self, task: &str) -> f64 {
        let lower = task.to_lowercase();
        let matched = self
            .keywords
            .iter()
            .filter(|keyword| lower.contains(*keyword))
            .count();

        (matched as f64 / self.keywords.len() as f64).min(1.0)
    }
}

/// A role-prompted agent executing tasks through a chat model
pub struct SpecialistAgent {
    id: String,
    profile: SpecialistProfile,
    model: Arc<dyn ChatModel>,
}

impl SpecialistAgent {
    pub fn new(id: impl Into<String>, profile: SpecialistProfile, model: Arc<dyn ChatModel>) -> Self {
        Self {
            id: id.into(),
            profile,
            model,
        }
    }

    pub fn researcher(id: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        Self::new(id, SpecialistProfile::researcher(), model)
    }

    pub fn writer(id: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        Self::new(id, SpecialistProfile::writer(), model)
    }

    pub fn reviewer(id: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        Self::new(id, SpecialistProfile::reviewer(), model)
    }

    pub fn analyst(id: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        Self::new(id, SpecialistProfile::analyst(), model)
    }

    pub fn planner(id: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        Self::new(id, SpecialistProfile::planner(), model)
    }

    pub fn role(&self) -> &'static str {
        self.profile.role
    }

    fn task_text(content: &Value) -> String {
        content
            .get("task")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| match content {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
    }
}

#[async_trait]
impl BusAgent for SpecialistAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        self.profile.prompt
    }

    async fn receive_message(&self, message: AgentMessage) -> Result<Option<AgentMessage>> {
        match message.kind {
            MessageKind::Task => {
                let task = Self::task_text(&message.content);
                tracing::debug!(agent = %self.id, role = self.profile.role, "executing task");

                let response = self
                    .model
                    .invoke(
                        &[
                            Message::system(self.profile.prompt),
                            Message::user(task),
                        ],
                        &InvokeOptions::default(),
                    )
                    .await;

                let reply = match response {
                    Ok(answer) => AgentMessage::result(
                        self.id.clone(),
                        message.from.clone(),
                        json!({ "answer": answer.content, "role": self.profile.role }),
                    )
                    .with_parent(message.id),
                    Err(error) => AgentMessage::error(
                        self.id.clone(),
                        message.from.clone(),
                        json!({ "error": error.to_string() }),
                    )
                    .with_parent(message.id),
                };
                Ok(Some(reply))
            }
            _ if message.requires_ack => Ok(Some(
                AgentMessage::new(
                    MessageKind::Ack,
                    self.id.clone(),
                    message.from.clone(),
                    Value::Null,
                )
                .with_parent(message.id),
            )),
            _ => Ok(None),
        }
    }
}

impl Specialist for SpecialistAgent {
    fn can_handle(&self, task: &str) -> (bool, f64) {
        let score = self.profile.score(task);
        (score > 0.0, score)
    }
}
