//! Agent executor: the plan-act loop
//!
//! Drives a [`Planner`] against a [`ToolRegistry`] until the planner
//! finishes, errors, the step budget runs out, or the run is cancelled.
//! Middleware wraps both the model side and the tool side of every step.
//!
//! Failure discipline:
//! - tool errors (including unknown tool names) are recorded on the step and
//!   the loop continues; the planner sees the failure as its next observation
//! - planner parse errors are fed back the same way
//! - other planner failures go through middleware `on_error` for retry, and
//!   end the run when nobody retries
//!
//! Run-terminal conditions come back as an [`AgentResult`] with
//! `success == false` and the partial step log attached; `Err` is reserved
//! for configuration problems and cancellation.

use crate::error::{AgentError, Result};
use crate::middleware::{MiddlewareChain, PlanContext};
use crate::planner::Planner;
use crate::step::{
    AgentAction, AgentResult, AgentState, AgentStatus, AgentStep, StateStore,
};
use crate::tool::ToolRegistry;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tooling::config::RuntimeSettings;
use uuid::Uuid;

/// Callback invoked with every appended step during [`AgentExecutor::stream`]
pub type StepCallback<'a> = &'a (dyn Fn(&AgentStep) + Send + Sync);

/// Builder for [`AgentExecutor`]
///
/// A step budget of zero (or none at all) falls back to the runtime default.
pub struct AgentExecutorBuilder {
    planner: Option<Arc<dyn Planner>>,
    registry: Arc<ToolRegistry>,
    middleware: MiddlewareChain,
    max_steps: usize,
    state_store: Option<Arc<dyn StateStore>>,
}

impl AgentExecutorBuilder {
    pub fn new() -> Self {
        Self {
            planner: None,
            registry: Arc::new(ToolRegistry::new()),
            middleware: MiddlewareChain::new(),
            max_steps: 0,
            state_store: None,
        }
    }

    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn crate::middleware::AgentMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn build(self) -> Result<AgentExecutor> {
        let planner = self
            .planner
            .ok_or_else(|| AgentError::InvalidConfiguration("planner is required".into()))?;

        let max_steps = if self.max_steps == 0 {
            RuntimeSettings::from_env().max_agent_steps
        } else {
            self.max_steps
        };

        Ok(AgentExecutor {
            planner,
            registry: self.registry,
            middleware: self.middleware,
            max_steps,
            state_store: self.state_store,
        })
    }
}

impl Default for AgentExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-worker plan-act loop
///
/// One run is strictly sequential; [`batch`](Self::batch) runs independent
/// executions concurrently.
pub struct AgentExecutor {
    planner: Arc<dyn Planner>,
    registry: Arc<ToolRegistry>,
    middleware: MiddlewareChain,
    max_steps: usize,
    state_store: Option<Arc<dyn StateStore>>,
}

impl AgentExecutor {
    pub fn builder() -> AgentExecutorBuilder {
        AgentExecutorBuilder::new()
    }

    /// Override the step budget directly
    ///
    /// Unlike the builder, an explicit `0` here is honored and
    /// short-circuits every run.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run to completion
    pub async fn execute(&self, input: &str) -> Result<AgentResult> {
        self.run(input, CancellationToken::new(), None).await
    }

    /// Run with an externally controlled cancellation token
    ///
    /// Cancellation is observed at step boundaries.
    pub async fn execute_with_cancellation(
        &self,
        input: &str,
        token: CancellationToken,
    ) -> Result<AgentResult> {
        self.run(input, token, None).await
    }

    /// Run, emitting every completed step through the callback
    pub async fn stream(&self, input: &str, on_step: StepCallback<'_>) -> Result<AgentResult> {
        self.run(input, CancellationToken::new(), Some(on_step)).await
    }

    /// Independent concurrent runs; one failure does not abort the rest
    pub async fn batch(&self, inputs: &[String]) -> Vec<Result<AgentResult>> {
        futures::future::join_all(inputs.iter().map(|input| self.execute(input))).await
    }

    #[tracing::instrument(skip(self, input, token, on_step), fields(planner = self.planner.name(), max_steps = self.max_steps))]
    async fn run(
        &self,
        input: &str,
        token: CancellationToken,
        on_step: Option<StepCallback<'_>>,
    ) -> Result<AgentResult> {
        let run_id = Uuid::new_v4().to_string();
        let mut state = AgentState::new(input);
        let mut total_steps = 0usize;

        if self.max_steps == 0 {
            return Ok(AgentResult::failed(AgentError::MaxSteps(0), Vec::new(), 0));
        }

        for step_index in 0..self.max_steps {
            if token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            total_steps += 1;

            let mut ctx = PlanContext::new(step_index, input, state.steps.len());

            if let Err(error) = self.middleware.before_model(&mut ctx).await {
                return self.finish_failed(state, error, total_steps).await;
            }

            let action = match ctx.cached_action.clone() {
                Some(cached) => cached,
                None => match self.plan_with_recovery(&ctx, input, &mut state).await? {
                    PlanOutcome::Action(action) => action,
                    PlanOutcome::Recovered => continue,
                    PlanOutcome::Fatal(error) => {
                        return self.finish_failed(state, error, total_steps).await;
                    }
                },
            };

            let mut action = action;
            if let Err(error) = self.middleware.after_model(&ctx, &mut action).await {
                return self.finish_failed(state, error, total_steps).await;
            }

            match action {
                AgentAction::Finish { output, .. } => {
                    state.transition(AgentStatus::Completed)?;
                    self.persist(&run_id, &state).await;

                    let result = AgentResult::completed(output, state.steps, total_steps);
                    self.middleware.on_complete(&result).await?;
                    return Ok(result);
                }
                AgentAction::Error { message } => {
                    tracing::warn!(%message, "planner returned terminal error action");
                    return self
                        .finish_failed(state, AgentError::Planner(message), total_steps)
                        .await;
                }
                AgentAction::ToolCall { tool, input: tool_input, log } => {
                    let step = self
                        .invoke_tool(&tool, tool_input, log)
                        .await;

                    state.push_step(step);
                    if let Some(callback) = on_step {
                        callback(state.steps.last().expect("step just pushed"));
                    }
                    self.persist(&run_id, &state).await;
                }
            }
        }

        tracing::debug!(max_steps = self.max_steps, "step budget exhausted");
        self.finish_failed(state, AgentError::MaxSteps(self.max_steps), total_steps)
            .await
    }

    /// Run the planner, recovering parse errors and consulting middleware on
    /// the rest
    async fn plan_with_recovery(
        &self,
        ctx: &PlanContext,
        input: &str,
        state: &mut AgentState,
    ) -> Result<PlanOutcome> {
        loop {
            match self.planner.plan(input, &state.steps).await {
                Ok(action) => return Ok(PlanOutcome::Action(action)),
                Err(AgentError::Parse(message)) => {
                    // Recoverable: surface the format problem to the model as
                    // an observation and move to the next step.
                    tracing::debug!(%message, "recovering from planner parse error");
                    state.push_step(AgentStep {
                        action: AgentAction::Error {
                            message: message.clone(),
                        },
                        observation: format!(
                            "invalid response format ({}); answer using the expected format",
                            message
                        ),
                        error: Some(message),
                    });
                    return Ok(PlanOutcome::Recovered);
                }
                Err(error) => {
                    let (should_retry, transformed) = self.middleware.on_error(ctx, &error).await;
                    if should_retry {
                        continue;
                    }
                    return Ok(PlanOutcome::Fatal(transformed.unwrap_or(error)));
                }
            }
        }
    }

    /// Execute one tool call; failures become step records, not run failures
    async fn invoke_tool(&self, tool: &str, input: Value, log: String) -> AgentStep {
        let action = AgentAction::ToolCall {
            tool: tool.to_string(),
            input: input.clone(),
            log,
        };

        if self.registry.get(tool).is_none() {
            let message = format!("tool not found: {}", tool);
            tracing::warn!(tool, "planner requested unknown tool");
            return AgentStep {
                action,
                observation: message.clone(),
                error: Some(message),
            };
        }

        let mut tool_input = input;
        if let Err(error) = self.middleware.before_tool_call(tool, &mut tool_input).await {
            return AgentStep::failure(action, error.to_string());
        }

        let output = self.registry.execute(tool, tool_input.clone()).await;
        let output = self
            .middleware
            .after_tool_call(tool, &tool_input, output)
            .await;

        match output {
            Ok(value) => {
                let observation = match &value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                AgentStep::success(action, observation)
            }
            Err(error) => AgentStep::failure(action, error.to_string()),
        }
    }

    async fn finish_failed(
        &self,
        mut state: AgentState,
        error: AgentError,
        total_steps: usize,
    ) -> Result<AgentResult> {
        // A completed state cannot fail retroactively; everything else can.
        let _ = state.transition(AgentStatus::Failed);

        let result = AgentResult::failed(error, state.steps, total_steps);
        self.middleware.on_complete(&result).await?;
        Ok(result)
    }

    async fn persist(&self, run_id: &str, state: &AgentState) {
        if let Some(store) = &self.state_store {
            if let Err(error) = store.save_state(run_id, state).await {
                tracing::warn!(%error, "failed to persist agent state");
            }
        }
    }
}

enum PlanOutcome {
    Action(AgentAction),
    /// A parse error was converted into an observation step
    Recovered,
    Fatal(AgentError),
}
