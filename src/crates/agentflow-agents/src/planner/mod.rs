//! Agent planners
//!
//! A planner decides the next [`AgentAction`] from the run input and the step
//! history. Every variant implements the same [`Planner`] contract and is
//! interchangeable from the executor's point of view:
//!
//! - [`ReActPlanner`](react::ReActPlanner) - text-format reasoning with a
//!   regex-parsed `Action:` / `Final Answer:` protocol
//! - [`ToolCallingPlanner`](tool_calling::ToolCallingPlanner) - native model
//!   tool binding, reads structured tool calls off the response
//! - [`SelfAskPlanner`](self_ask::SelfAskPlanner) - follow-up-question
//!   decomposition routed to a search tool
//! - [`StructuredChatPlanner`](structured_chat::StructuredChatPlanner) -
//!   conversational planner with turn memory and output formats
//! - [`PlanAndExecute`](plan_execute::PlanAndExecute) - upfront sub-task
//!   planning driven through a step executor (a two-level driver over the
//!   reactive planners rather than a per-step `Planner` itself)

pub mod plan_execute;
pub mod react;
pub mod self_ask;
pub mod structured_chat;
pub mod tool_calling;

use crate::error::Result;
use crate::step::{AgentAction, AgentStep};
use async_trait::async_trait;

/// Decides the next action for an agent run
///
/// A planner returning `Ok(AgentAction::Error { .. })` ends the run; a
/// returned `Err` is handed to middleware for retry/transform, except
/// [`AgentError::Parse`](crate::error::AgentError::Parse), which the executor
/// recovers by feeding the message back as an observation.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, input: &str, history: &[AgentStep]) -> Result<AgentAction>;

    fn name(&self) -> &str;
}

/// Render history as a ReAct-style scratchpad
///
/// Failed steps surface their error text as the observation so the model can
/// react to it.
pub(crate) fn render_scratchpad(history: &[AgentStep]) -> String {
    let mut lines = String::new();

    for step in history {
        match &step.action {
            AgentAction::ToolCall { tool, input, log } => {
                if !log.is_empty() {
                    lines.push_str(log.trim_end());
                    lines.push('\n');
                } else {
                    lines.push_str(&format!("Action: {}\nAction Input: {}\n", tool, input));
                }
            }
            AgentAction::Error { message } => {
                lines.push_str(&format!("Thought: {}\n", message));
            }
            AgentAction::Finish { .. } => {}
        }
        lines.push_str(&format!("Observation: {}\n", step.observation));
    }

    lines
}
