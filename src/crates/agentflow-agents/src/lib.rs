//! LLM agent execution core for agentflow
//!
//! Everything an agent run is made of lives here:
//!
//! - [`ChatModel`] / [`Tool`] - the external interfaces the core consumes
//! - [`Planner`] family - ReAct, tool-calling, self-ask, structured-chat,
//!   plus the [`PlanAndExecute`] driver
//! - [`AgentExecutor`] - the plan-act loop with step budget, streaming,
//!   batching, and cancellation
//! - [`AgentMiddleware`] - retry, rate limiting, moderation, caching,
//!   logging, composed as an onion around model and tool calls
//! - [`ParallelToolExecutor`] - bounded tool fan-out with per-call deadlines
//! - [`MessageBus`] / [`Coordinator`] / specialists - in-process multi-agent
//!   coordination
//! - `into_node` - embedding an agent as a node of an
//!   `agentflow-graph` state graph
//!
//! # Example
//!
//! ```rust,ignore
//! use agentflow_agents::{AgentExecutor, ReActPlanner, ToolRegistry};
//! use std::sync::Arc;
//!
//! # async fn example(model: Arc<dyn agentflow_agents::ChatModel>) -> agentflow_agents::Result<()> {
//! let registry = Arc::new(ToolRegistry::new());
//! let planner = ReActPlanner::new(model, &registry);
//!
//! let executor = AgentExecutor::builder()
//!     .planner(Arc::new(planner))
//!     .registry(registry)
//!     .max_steps(10)
//!     .build()?;
//!
//! let result = executor.execute("What is 6 * 7?").await?;
//! println!("{} (in {} steps)", result.output, result.total_steps);
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod middleware;
pub mod model;
pub mod node;
pub mod parallel;
pub mod planner;
pub mod specialists;
pub mod step;
pub mod tool;

pub use bus::{AgentMessage, BusAgent, BusSender, MessageBus, MessageKind, BROADCAST};
pub use coordinator::{CoordinationStrategy, Coordinator, KeywordStrategy, SubTask};
pub use error::{AgentError, Result};
pub use executor::{AgentExecutor, AgentExecutorBuilder};
pub use middleware::cache::{CacheMiddleware, CacheStats};
pub use middleware::logging::LoggingMiddleware;
pub use middleware::moderation::ModerationMiddleware;
pub use middleware::rate_limit::RateLimitMiddleware;
pub use middleware::retry::RetryMiddleware;
pub use middleware::{AgentMiddleware, MiddlewareChain, PlanContext};
pub use model::{
    ChatModel, InvokeOptions, Message, MessageChunk, MessageRole, MessageStream, ScriptedModel,
    ToolCall,
};
pub use parallel::{ParallelToolExecutor, ToolRunResult};
pub use planner::plan_execute::{PlanAndExecute, PlanExecuteOutcome};
pub use planner::react::ReActPlanner;
pub use planner::self_ask::SelfAskPlanner;
pub use planner::structured_chat::{OutputFormat, StructuredChatPlanner};
pub use planner::tool_calling::ToolCallingPlanner;
pub use planner::Planner;
pub use specialists::{Specialist, SpecialistAgent, SpecialistProfile};
pub use step::{
    AgentAction, AgentResult, AgentState, AgentStatus, AgentStep, CheckpointStateStore,
    InMemoryStateStore, StateStore,
};
pub use tool::{Tool, ToolRegistry, ToolSpec};
