//! Error types for graph construction, compilation, and execution

use agentflow_checkpoint::CheckpointError;
use thiserror::Error;

/// Result alias for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Aggregate of every problem found while validating a graph
///
/// Compilation does not stop at the first defect; all detail messages are
/// collected so a misconfigured graph can be fixed in one pass.
#[derive(Debug, Error)]
#[error("graph validation failed: {}", .errors.join("; "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}

impl ValidationError {
    pub fn new(errors: Vec<String>) -> Self {
        Self { errors }
    }

    /// Whether any detail message mentions the given node name
    pub fn mentions(&self, node: &str) -> bool {
        self.errors.iter().any(|e| e.contains(node))
    }
}

/// Errors produced by the graph core
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node declaration was rejected (reserved name, duplicate, empty)
    #[error("invalid node: {0}")]
    InvalidNode(String),

    /// The graph or executor was misconfigured
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Structural validation failed; every defect is listed
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A node's function returned an error
    #[error("node '{node}' execution failed: {message}")]
    NodeExecution { node: String, message: String },

    /// Execution reached a node with no outgoing route
    #[error("no next node after '{0}'")]
    NoNextNode(String),

    /// A conditional router produced a path missing from its path map
    #[error("unknown route '{route}' from node '{node}'")]
    UnknownRoute { node: String, route: String },

    /// The step budget was exhausted
    #[error("maximum steps ({0}) exceeded")]
    MaxSteps(usize),

    /// Execution paused at a registered interrupt point
    #[error("execution interrupted at node '{0}'")]
    Interrupted(String),

    /// The run was cancelled via its token
    #[error("execution cancelled")]
    Cancelled,

    /// Checkpoint persistence failed
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// State could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    /// Create a node execution error with context
    pub fn node_execution(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            message: message.into(),
        }
    }
}
