//! Declarative state-graph execution for agentflow
//!
//! Workflows are described as a directed graph of async node functions over
//! JSON state, compiled into an optimized execution plan, and driven from
//! `__start__` to `__end__`:
//!
//! - [`StateGraph`] - fluent builder for nodes, edges, and conditional edges
//! - [`CompiledGraph`] - validated, immutable, executable plan with an
//!   adjacency index and optional parallel-group analysis
//! - [`Scheduler`] - sequential or semaphore-bounded parallel node
//!   scheduling with pluggable [`StateMerger`] strategies
//! - execution with events, node history, interrupt points, step budgets,
//!   cancellation, and checkpoint-backed resumption (via
//!   `agentflow-checkpoint`)
//!
//! # Example
//!
//! ```rust,ignore
//! use agentflow_graph::{StateGraph, START, END};
//! use serde_json::{json, Value};
//!
//! # async fn example() -> agentflow_graph::Result<()> {
//! let mut graph = StateGraph::new();
//! graph.add_node("double", |state: Value| async move {
//!     Ok(json!({"n": state["n"].as_i64().unwrap_or(0) * 2}))
//! })?;
//! graph.add_edge(START, "double");
//! graph.add_edge("double", END);
//!
//! let compiled = graph.compile()?;
//! assert_eq!(compiled.invoke(json!({"n": 21})).await?["n"], 42);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod compile;
pub mod error;
pub mod executor;
pub mod graph;
pub mod reducer;
pub mod scheduler;
pub mod visualization;

pub use builder::StateGraph;
pub use compile::{compile, CompileOptions, CompiledGraph, DEFAULT_MAX_STEPS};
pub use error::{GraphError, Result, ValidationError};
pub use executor::{ExecutionEvent, ExecutionResult, NodeRecord};
pub use graph::{
    node_fn, ConditionalEdge, Edge, Graph, NodeFn, NodeId, NodeMetadata, NodeSpec, PathFn, END,
    START,
};
pub use reducer::{
    AppendMerger, CustomMerger, LastValueMerger, MapMerger, StateMerger, SumMerger,
};
pub use scheduler::{ExecutionStrategy, Scheduler};
pub use visualization::{visualize, VisualizationFormat, VisualizationOptions};
