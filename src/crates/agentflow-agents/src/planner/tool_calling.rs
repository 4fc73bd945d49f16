//! Tool-calling planner: native structured tool calls
//!
//! Binds the registry's tool schemas to the model and reads the structured
//! `tool_calls` field off the response; a response without tool calls is the
//! final answer. Supports forcing a specific tool by name.

use crate::error::{AgentError, Result};
use crate::model::{ChatModel, InvokeOptions, Message, ToolCall};
use crate::planner::Planner;
use crate::step::{AgentAction, AgentStep};
use crate::tool::{ToolRegistry, ToolSpec};
use async_trait::async_trait;
use std::sync::Arc;

/// Planner using the model's own tool-calling capability
pub struct ToolCallingPlanner {
    model: Arc<dyn ChatModel>,
    specs: Vec<ToolSpec>,
    forced_tool: Option<String>,
    system_prompt: Option<String>,
    options: InvokeOptions,
}

impl ToolCallingPlanner {
    pub fn new(model: Arc<dyn ChatModel>, registry: &ToolRegistry) -> Self {
        Self {
            model,
            specs: registry.specs(),
            forced_tool: None,
            system_prompt: None,
            options: InvokeOptions::default(),
        }
    }

    /// Restrict the model to one specific tool
    pub fn force_tool(mut self, name: impl Into<String>) -> Self {
        self.forced_tool = Some(name.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Rebuild the conversation from the step history
    fn build_messages(&self, input: &str, history: &[AgentStep]) -> Vec<Message> {
        let mut messages = Vec::new();

        if let Some(prompt) = &self.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        messages.push(Message::user(input));

        for (index, step) in history.iter().enumerate() {
            if let AgentAction::ToolCall { tool, input, log } = &step.action {
                let call_id = format!("call_{}", index);
                let call = ToolCall::from_value(&call_id, tool, input);
                messages.push(Message::assistant(log.clone()).with_tool_calls(vec![call]));
                messages.push(Message::tool(step.observation.clone(), call_id));
            }
        }

        messages
    }
}

#[async_trait]
impl Planner for ToolCallingPlanner {
    async fn plan(&self, input: &str, history: &[AgentStep]) -> Result<AgentAction> {
        let specs = match &self.forced_tool {
            Some(name) => {
                let spec = self
                    .specs
                    .iter()
                    .find(|s| &s.name == name)
                    .cloned()
                    .ok_or_else(|| AgentError::ToolNotFound(name.clone()))?;
                vec![spec]
            }
            None => self.specs.clone(),
        };

        let bound = self.model.bind_tools(specs);
        let messages = self.build_messages(input, history);
        let response = bound.invoke(&messages, &self.options).await?;

        if let Some(calls) = &response.tool_calls {
            if let Some(call) = calls.first() {
                return Ok(AgentAction::ToolCall {
                    tool: call.name.clone(),
                    input: call.parsed_arguments(),
                    log: response.content.clone(),
                });
            }
        }

        Ok(AgentAction::Finish {
            output: response.content.clone(),
            log: response.content,
        })
    }

    fn name(&self) -> &str {
        "tool_calling"
    }
}
