//! Self-Ask planner: decomposition into follow-up questions
//!
//! The model either poses a follow-up question (routed to the configured
//! search tool) or declares the final answer. A cap on follow-ups forces a
//! final answer so a chatty model cannot loop forever.

use crate::error::{AgentError, Result};
use crate::model::{ChatModel, InvokeOptions, Message};
use crate::planner::{render_scratchpad, Planner};
use crate::step::{AgentAction, AgentStep};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

const PROMPT_TEMPLATE: &str = "You answer questions by breaking them into follow-up questions.
When you need more information, respond with exactly one line:
Follow up: <the follow-up question>
When you can answer the original question, respond with exactly one line:
So the final answer is: <answer>

Question: {input}
{scratchpad}";

const FORCE_FINAL_NOTE: &str =
    "\nYou have no follow-up questions left. Respond with 'So the final answer is:'.";

const FOLLOW_UP_MARKER: &str = "Follow up:";
const FINAL_ANSWER_MARKER: &str = "So the final answer is:";

/// Planner for the self-ask-with-search pattern
pub struct SelfAskPlanner {
    model: Arc<dyn ChatModel>,
    search_tool: String,
    max_questions: usize,
    options: InvokeOptions,
}

impl SelfAskPlanner {
    pub fn new(model: Arc<dyn ChatModel>, search_tool: impl Into<String>) -> Self {
        Self {
            model,
            search_tool: search_tool.into(),
            max_questions: 5,
            options: InvokeOptions::default(),
        }
    }

    /// Cap the number of follow-up questions (default 5)
    pub fn with_max_questions(mut self, max_questions: usize) -> Self {
        self.max_questions = max_questions;
        self
    }

    fn questions_asked(&self, history: &[AgentStep]) -> usize {
        history
            .iter()
            .filter(|step| step.action.tool_name() == Some(self.search_tool.as_str()))
            .count()
    }
}

fn extract_after<'t>(text: &'t str, marker: &str) -> Option<&'t str> {
    text.find(marker)
        .map(|pos| text[pos + marker.len()..].trim())
}

#[async_trait]
impl Planner for SelfAskPlanner {
    async fn plan(&self, input: &str, history: &[AgentStep]) -> Result<AgentAction> {
        let capped = self.questions_asked(history) >= self.max_questions;

        let mut prompt = PROMPT_TEMPLATE
            .replace("{input}", input)
            .replace("{scratchpad}", &render_scratchpad(history));
        if capped {
            prompt.push_str(FORCE_FINAL_NOTE);
        }

        let response = self
            .model
            .invoke(&[Message::user(prompt)], &self.options)
            .await?;
        let content = response.content.trim();

        if let Some(answer) = extract_after(content, FINAL_ANSWER_MARKER) {
            return Ok(AgentAction::Finish {
                output: answer.to_string(),
                log: content.to_string(),
            });
        }

        if let Some(question) = extract_after(content, FOLLOW_UP_MARKER) {
            let question = question.lines().next().unwrap_or(question).trim();

            if capped {
                // Out of budget: whatever the model wanted to ask, wrap up.
                return Ok(AgentAction::Finish {
                    output: content.to_string(),
                    log: content.to_string(),
                });
            }

            return Ok(AgentAction::ToolCall {
                tool: self.search_tool.clone(),
                input: json!({ "query": question }),
                log: content.to_string(),
            });
        }

        if content.is_empty() {
            return Err(AgentError::Parse("model returned empty output".into()));
        }

        Err(AgentError::Parse(format!(
            "expected '{}' or '{}', got: {}",
            FOLLOW_UP_MARKER, FINAL_ANSWER_MARKER, content
        )))
    }

    fn name(&self) -> &str {
        "self_ask"
    }
}
