//! Structured-chat planner: conversational turns with output formats
//!
//! Threads a bounded memory of prior turns through each call, supports plain,
//! JSON, and markdown output shapes, and decides to call a tool either from
//! the model's native tool calls or by a keyword heuristic over the response
//! text.

use crate::error::Result;
use crate::model::{ChatModel, InvokeOptions, Message};
use crate::planner::Planner;
use crate::step::{AgentAction, AgentStep};
use crate::tool::{ToolRegistry, ToolSpec};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Shape of the final answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
    Markdown,
}

/// Conversational planner with turn memory
pub struct StructuredChatPlanner {
    model: Arc<dyn ChatModel>,
    specs: Vec<ToolSpec>,
    format: OutputFormat,
    memory: Mutex<VecDeque<(String, String)>>,
    memory_limit: usize,
    options: InvokeOptions,
}

impl StructuredChatPlanner {
    pub fn new(model: Arc<dyn ChatModel>, registry: &ToolRegistry) -> Self {
        Self {
            model,
            specs: registry.specs(),
            format: OutputFormat::default(),
            memory: Mutex::new(VecDeque::new()),
            memory_limit: 10,
            options: InvokeOptions::default(),
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Bound how many prior turns are replayed (default 10)
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Remembered turns, oldest first
    pub fn remembered_turns(&self) -> Vec<(String, String)> {
        self.memory.lock().unwrap().iter().cloned().collect()
    }

    fn system_prompt(&self) -> String {
        let tool_lines = self
            .specs
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect::<Vec<_>>()
            .join("\n");

        let format_note = match self.format {
            OutputFormat::Plain => "Answer in plain text.",
            OutputFormat::Json => "Answer with a single JSON object.",
            OutputFormat::Markdown => "Answer in markdown.",
        };

        format!(
            "You are a helpful assistant. Available tools:\n{}\n\nTo use a tool, say: use <tool> with <input>. {}",
            tool_lines, format_note
        )
    }

    /// Keyword heuristic: "use <tool> with <input>" or "use <tool>: <input>"
    fn detect_tool_request(&self, content: &str) -> Option<(String, String)> {
        let lower = content.to_lowercase();

        for spec in &self.specs {
            let marker = format!("use {}", spec.name.to_lowercase());
            if let Some(pos) = lower.find(&marker) {
                let rest = content[pos + marker.len()..].trim();
                let input = rest
                    .strip_prefix("with ")
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest)
                    .trim();
                return Some((spec.name.clone(), input.to_string()));
            }
        }
        None
    }

    fn format_output(&self, content: &str) -> String {
        match self.format {
            OutputFormat::Plain | OutputFormat::Markdown => content.to_string(),
            OutputFormat::Json => {
                if serde_json::from_str::<serde_json::Value>(content).is_ok() {
                    content.to_string()
                } else {
                    json!({ "answer": content }).to_string()
                }
            }
        }
    }

    fn remember(&self, input: &str, output: &str) {
        let mut memory = self.memory.lock().unwrap();
        memory.push_back((input.to_string(), output.to_string()));
        while memory.len() > self.memory_limit {
            memory.pop_front();
        }
    }
}

#[async_trait]
impl Planner for StructuredChatPlanner {
    async fn plan(&self, input: &str, history: &[AgentStep]) -> Result<AgentAction> {
        let mut messages = vec![Message::system(self.system_prompt())];

        for (user, assistant) in self.remembered_turns() {
            messages.push(Message::user(user));
            messages.push(Message::assistant(assistant));
        }

        // Current question plus any tool outcomes already observed this run.
        let mut turn = input.to_string();
        for step in history {
            if let AgentAction::ToolCall { tool, .. } = &step.action {
                turn.push_str(&format!("\n[{} returned: {}]", tool, step.observation));
            }
        }
        messages.push(Message::user(turn));

        let bound = self.model.bind_tools(self.specs.clone());
        let response = bound.invoke(&messages, &self.options).await?;

        // Native tool calls first, keyword heuristic second.
        if let Some(calls) = &response.tool_calls {
            if let Some(call) = calls.first() {
                return Ok(AgentAction::ToolCall {
                    tool: call.name.clone(),
                    input: call.parsed_arguments(),
                    log: response.content.clone(),
                });
            }
        }

        if let Some((tool, raw_input)) = self.detect_tool_request(&response.content) {
            let input_value = serde_json::from_str(&raw_input)
                .unwrap_or_else(|_| json!({ "input": raw_input }));
            return Ok(AgentAction::ToolCall {
                tool,
                input: input_value,
                log: response.content.clone(),
            });
        }

        let output = self.format_output(&response.content);
        self.remember(input, &output);

        Ok(AgentAction::Finish {
            output,
            log: response.content,
        })
    }

    fn name(&self) -> &str {
        "structured_chat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ScriptedModel, ToolCall};
    use crate::tool::tests::Calculator;

    fn registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Calculator)).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_keyword_heuristic_detects_tool() {
        let model = ScriptedModel::new([Message::assistant(
            r#"I should use calculator with {"a": 2, "b": 2, "op": "add"}"#,
        )]);
        let planner = StructuredChatPlanner::new(Arc::new(model), &registry());

        let action = planner.plan("2+2?", &[]).await.unwrap();
        match action {
            AgentAction::ToolCall { tool, input, .. } => {
                assert_eq!(tool, "calculator");
                assert_eq!(input["op"], "add");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_native_tool_calls_take_precedence() {
        let response = Message::assistant("use calculator with nothing").with_tool_calls(vec![
            ToolCall::new("c1", "calculator", r#"{"a": 1, "b": 2, "op": "add"}"#),
        ]);
        let model = ScriptedModel::new([response]);
        let planner = StructuredChatPlanner::new(Arc::new(model), &registry());

        let action = planner.plan("q", &[]).await.unwrap();
        match action {
            AgentAction::ToolCall { input, .. } => assert_eq!(input["a"], 1),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_json_format_wraps_plain_answers() {
        let model = ScriptedModel::new([Message::assistant("forty-two")]);
        let planner = StructuredChatPlanner::new(Arc::new(model), &registry())
            .with_format(OutputFormat::Json);

        let action = planner.plan("q", &[]).await.unwrap();
        match action {
            AgentAction::Finish { output, .. } => {
                let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
                assert_eq!(parsed["answer"], "forty-two");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_memory_threads_prior_turns() {
        let model = ScriptedModel::new([
            Message::assistant("first answer"),
            Message::assistant("second answer"),
        ]);
        let planner = StructuredChatPlanner::new(Arc::new(model.clone()), &registry());

        planner.plan("first question", &[]).await.unwrap();
        planner.plan("second question", &[]).await.unwrap();

        assert_eq!(planner.remembered_turns().len(), 2);

        // Second call replayed the first turn.
        let second_call = &model.recorded_calls()[1];
        assert!(second_call.iter().any(|m| m.content == "first question"));
        assert!(second_call.iter().any(|m| m.content == "first answer"));
    }

    #[tokio::test]
    async fn test_memory_limit_evicts_oldest() {
        let model = ScriptedModel::always("answer");
        let planner = StructuredChatPlanner::new(Arc::new(model), &registry())
            .with_memory_limit(2);

        for question in ["q1", "q2", "q3"] {
            planner.plan(question, &[]).await.unwrap();
        }

        let turns = planner.remembered_turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].0, "q2");
    }

    #[tokio::test]
    async fn test_tool_observations_fed_into_turn() {
        let model = ScriptedModel::new([Message::assistant("it is 4")]);
        let planner = StructuredChatPlanner::new(Arc::new(model.clone()), &registry());

        let history = vec![AgentStep::success(
            AgentAction::tool_call("calculator", json!({"a": 2, "b": 2, "op": "add"})),
            "4",
        )];
        planner.plan("2+2?", &history).await.unwrap();

        let sent = &model.recorded_calls()[0];
        let turn = &sent.last().unwrap().content;
        assert!(turn.contains("calculator returned: 4"));
    }
}
