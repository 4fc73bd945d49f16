//! ReAct planner: interleaved reasoning and acting
//!
//! Prompts the model into the `Thought / Action / Action Input / Observation`
//! protocol and parses each response into either a tool call or a final
//! answer. Output that matches neither form is a parse error, which the
//! executor treats as recoverable.

use crate::error::{AgentError, Result};
use crate::model::{ChatModel, InvokeOptions, Message};
use crate::planner::{render_scratchpad, Planner};
use crate::step::{AgentAction, AgentStep};
use crate::tool::ToolRegistry;
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;

const PROMPT_TEMPLATE: &str = "Answer the following question as well as you can. You have access to these tools:

{tools}

Use exactly this format:

Question: the input question
Thought: reason about what to do next
Action: the tool to use, one of [{tool_names}]
Action Input: the input to the tool
Observation: the tool's result
... (Thought/Action/Action Input/Observation may repeat)
Thought: I now know the final answer
Final Answer: the answer to the original question

Begin!

Question: {input}
{scratchpad}";

/// Planner speaking the ReAct text protocol
pub struct ReActPlanner {
    model: Arc<dyn ChatModel>,
    tool_lines: String,
    tool_names: String,
    options: InvokeOptions,
}

impl ReActPlanner {
    pub fn new(model: Arc<dyn ChatModel>, registry: &ToolRegistry) -> Self {
        let specs = registry.specs();
        let tool_lines = specs
            .iter()
            .map(|s| format!("{}: {}", s.name, s.description))
            .collect::<Vec<_>>()
            .join("\n");
        let tool_names = specs
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            model,
            tool_lines,
            tool_names,
            options: InvokeOptions {
                stop: vec!["\nObservation:".to_string()],
                ..Default::default()
            },
        }
    }

    pub fn with_options(mut self, options: InvokeOptions) -> Self {
        self.options = options;
        self
    }

    fn render_prompt(&self, input: &str, history: &[AgentStep]) -> String {
        PROMPT_TEMPLATE
            .replace("{tools}", &self.tool_lines)
            .replace("{tool_names}", &self.tool_names)
            .replace("{input}", input)
            .replace("{scratchpad}", &render_scratchpad(history))
    }
}

/// Parse one model response into an action
///
/// `Final Answer:` wins when both forms are present (the model "finishing"
/// after a last action is the common failure shape).
pub fn parse_react_output(text: &str) -> Result<AgentAction> {
    let final_re = Regex::new(r"(?s)Final\s+Answer\s*:\s*(.*)").expect("static regex");
    if let Some(caps) = final_re.captures(text) {
        return Ok(AgentAction::Finish {
            output: caps[1].trim().to_string(),
            log: text.to_string(),
        });
    }

    let action_re = Regex::new(r"(?m)^\s*Action\s*:\s*(.+?)\s*$").expect("static regex");
    let input_re = Regex::new(r"(?s)Action\s+Input\s*:\s*(.*)").expect("static regex");

    if let Some(action_caps) = action_re.captures(text) {
        let tool = action_caps[1].trim().to_string();
        let raw_input = input_re
            .captures(text)
            .map(|caps| caps[1].trim().to_string())
            .unwrap_or_default();

        // JSON input when the model produced it, otherwise wrap the text.
        let input = serde_json::from_str(&raw_input)
            .unwrap_or_else(|_| json!({ "input": raw_input }));

        return Ok(AgentAction::ToolCall {
            tool,
            input,
            log: text.to_string(),
        });
    }

    if text.trim().is_empty() {
        return Err(AgentError::Parse("model returned empty output".into()));
    }

    Err(AgentError::Parse(format!(
        "output matched neither 'Action:' nor 'Final Answer:': {}",
        text.trim()
    )))
}

#[async_trait]
impl Planner for ReActPlanner {
    async fn plan(&self, input: &str, history: &[AgentStep]) -> Result<AgentAction> {
        let prompt = self.render_prompt(input, history);
        let response = self
            .model
            .invoke(&[Message::user(prompt)], &self.options)
            .await?;

        parse_react_output(&response.content)
    }

    fn name(&self) -> &str {
        "react"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    #[test]
    fn test_parse_final_answer() {
        let action = parse_react_output("Thought: done\nFinal Answer: 42").unwrap();
        match action {
            AgentAction::Finish { output, .. } => assert_eq!(output, "42"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_tool_call_with_json_input() {
        let text = "Thought: multiply\nAction: calculator\nAction Input: {\"a\": 6, \"b\": 7}";
        let action = parse_react_output(text).unwrap();
        match action {
            AgentAction::ToolCall { tool, input, .. } => {
                assert_eq!(tool, "calculator");
                assert_eq!(input, json!({"a": 6, "b": 7}));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_tool_call_with_text_input() {
        let text = "Action: search\nAction Input: rust borrow checker";
        let action = parse_react_output(text).unwrap();
        match action {
            AgentAction::ToolCall { tool, input, .. } => {
                assert_eq!(tool, "search");
                assert_eq!(input, json!({"input": "rust borrow checker"}));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_final_answer_wins_over_action() {
        let text = "Action: calc\nAction Input: 1\nFinal Answer: it is 1";
        assert!(parse_react_output(text).unwrap().is_finish());
    }

    #[test]
    fn test_unparseable_output_is_parse_error() {
        let err = parse_react_output("I am not following the format").unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));

        let err = parse_react_output("   ").unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
    }

    #[tokio::test]
    async fn test_plan_builds_prompt_with_tools_and_scratchpad() {
        use crate::tool::tests::Calculator;

        let registry = ToolRegistry::new();
        registry.register(Arc::new(Calculator)).unwrap();

        let model = ScriptedModel::new([Message::assistant("Final Answer: done")]);
        let planner = ReActPlanner::new(Arc::new(model.clone()), &registry);

        let history = vec![AgentStep::success(
            AgentAction::tool_call("calculator", json!({"a": 1, "b": 2, "op": "add"})),
            "3",
        )];
        let action = planner.plan("what is 1+2?", &history).await.unwrap();
        assert!(action.is_finish());

        let prompt = &model.recorded_calls()[0][0].content;
        assert!(prompt.contains("calculator:"));
        assert!(prompt.contains("what is 1+2?"));
        assert!(prompt.contains("Observation: 3"));
    }
}
