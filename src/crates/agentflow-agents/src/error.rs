//! Error types for the agent crate

use thiserror::Error;

/// Result alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors produced by planners, executors, tools, and the message bus
#[derive(Debug, Error)]
pub enum AgentError {
    /// Builder or option validation failed
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Model output did not match the expected form
    ///
    /// Recoverable: the executor feeds the message back to the planner as an
    /// observation instead of aborting the run.
    #[error("could not parse model output: {0}")]
    Parse(String),

    /// The model call itself failed (transport, auth, rate limit)
    #[error("model call failed: {0}")]
    Model(String),

    /// The planner failed for a reason other than parsing
    #[error("planner failed: {0}")]
    Planner(String),

    /// No tool registered under the requested name
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// A tool rejected its input or failed while executing
    ///
    /// Non-fatal within an agent run: recorded on the step, the loop
    /// continues.
    #[error("tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    /// The step budget was exhausted
    #[error("maximum steps ({0}) reached")]
    MaxSteps(usize),

    /// Every action in a parallel tool batch failed
    #[error("all {0} tool call(s) in the batch failed")]
    AllToolsFailed(usize),

    /// Banned content detected by the moderation middleware
    #[error("content policy violation: {0}")]
    Moderation(String),

    /// Message bus failure (queue closed, registration conflict)
    #[error("message bus error: {0}")]
    Bus(String),

    /// Message routed to an agent nobody registered
    #[error("no agent registered as '{0}'")]
    AgentNotFound(String),

    /// The run was cancelled via its token
    #[error("operation cancelled")]
    Cancelled,

    /// Agent state persistence failed
    #[error("state store error: {0}")]
    State(String),

    /// JSON conversion failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    /// Create a tool error with context
    pub fn tool(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            name: name.into(),
            message: message.into(),
        }
    }
}
