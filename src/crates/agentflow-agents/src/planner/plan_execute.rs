//! Plan-and-execute: upfront decomposition, stepwise execution
//!
//! One model call turns the objective into an ordered sub-task list; each
//! sub-task then runs through a step executor (any [`AgentExecutor`]).
//! Unlike the reactive planners this is a two-level driver, so it is exposed
//! as a runner rather than a per-step `Planner`.

use crate::error::{AgentError, Result};
use crate::executor::AgentExecutor;
use crate::model::{ChatModel, InvokeOptions, Message};
use crate::step::AgentResult;
use regex::Regex;
use std::sync::Arc;

const PLAN_PROMPT: &str = "Break the following objective into a short ordered list of sub-tasks.
Respond with one sub-task per line, numbered like '1. ...'. Keep the list minimal.

Objective: {input}";

const REPLAN_PROMPT: &str = "The plan for this objective partially failed.

Objective: {input}

Completed sub-tasks:
{completed}

Failed sub-task: {failed}
Failure: {failure}

Produce a revised ordered list of the remaining sub-tasks, one per line, numbered.";

/// Outcome of a plan-and-execute run
#[derive(Debug)]
pub struct PlanExecuteOutcome {
    /// The sub-tasks as planned (after any replan)
    pub plan: Vec<String>,

    /// Results per executed sub-task, in order
    pub results: Vec<(String, AgentResult)>,

    /// Output of the final successful sub-task
    pub output: String,

    pub success: bool,
}

/// Upfront planner driving a step executor through sub-tasks
pub struct PlanAndExecute {
    model: Arc<dyn ChatModel>,
    step_executor: Arc<AgentExecutor>,
    replan_on_error: bool,
    options: InvokeOptions,
}

impl PlanAndExecute {
    pub fn new(model: Arc<dyn ChatModel>, step_executor: Arc<AgentExecutor>) -> Self {
        Self {
            model,
            step_executor,
            replan_on_error: false,
            options: InvokeOptions::default(),
        }
    }

    /// Replan once when a sub-task fails (default: fail the run)
    pub fn replan_on_error(mut self) -> Self {
        self.replan_on_error = true;
        self
    }

    async fn decompose(&self, prompt: String) -> Result<Vec<String>> {
        let response = self
            .model
            .invoke(&[Message::user(prompt)], &self.options)
            .await?;

        let plan = parse_numbered_list(&response.content);
        if plan.is_empty() {
            return Err(AgentError::Parse(format!(
                "expected a numbered sub-task list, got: {}",
                response.content.trim()
            )));
        }
        Ok(plan)
    }

    /// Run the objective to completion
    #[tracing::instrument(skip(self, input))]
    pub async fn run(&self, input: &str) -> Result<PlanExecuteOutcome> {
        let mut plan = self
            .decompose(PLAN_PROMPT.replace("{input}", input))
            .await?;
        tracing::debug!(sub_tasks = plan.len(), "objective decomposed");

        let mut results: Vec<(String, AgentResult)> = Vec::new();
        let mut replanned = false;
        let mut index = 0;

        while index < plan.len() {
            let sub_task = plan[index].clone();

            // Give each sub-task the context of what came before it.
            let step_input = if results.is_empty() {
                sub_task.clone()
            } else {
                let context = results
                    .iter()
                    .map(|(task, result)| format!("- {}: {}", task, result.output))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("{}\n\nResults so far:\n{}", sub_task, context)
            };

            let result = self.step_executor.execute(&step_input).await?;

            if !result.success {
                if self.replan_on_error && !replanned {
                    replanned = true;
                    let failure = result
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown failure".to_string());
                    let completed = results
                        .iter()
                        .map(|(task, _)| format!("- {}", task))
                        .collect::<Vec<_>>()
                        .join("\n");

                    let prompt = REPLAN_PROMPT
                        .replace("{input}", input)
                        .replace("{completed}", &completed)
                        .replace("{failed}", &sub_task)
                        .replace("{failure}", &failure);

                    tracing::info!(failed = %sub_task, "replanning after sub-task failure");
                    plan = self.decompose(prompt).await?;
                    index = 0;
                    continue;
                }

                results.push((sub_task, result));
                return Ok(PlanExecuteOutcome {
                    plan,
                    output: String::new(),
                    success: false,
                    results,
                });
            }

            results.push((sub_task, result));
            index += 1;
        }

        let output = results
            .last()
            .map(|(_, result)| result.output.clone())
            .unwrap_or_default();

        Ok(PlanExecuteOutcome {
            plan,
            results,
            output,
            success: true,
        })
    }
}

/// Extract items from a numbered (or dashed) list
pub fn parse_numbered_list(text: &str) -> Vec<String> {
    let item_re = Regex::new(r"^\s*(?:\d+[.)]|-)\s+(.+)$").expect("static regex");

    text.lines()
        .filter_map(|line| {
            item_re
                .captures(line)
                .map(|caps| caps[1].trim().to_string())
        })
        .filter(|item| !item.is_empty())
        .collect()
}
