//! High-level graph builder
//!
//! [`StateGraph`] is the fluent front door to the graph core: nodes are added
//! as plain async closures over `serde_json::Value` state, edges and
//! conditional edges wire them together, and `compile` produces the
//! executable [`CompiledGraph`].
//!
//! # Example
//!
//! ```rust,ignore
//! use agentflow_graph::{StateGraph, START, END};
//! use serde_json::{json, Value};
//!
//! let mut graph = StateGraph::new();
//! graph.add_node("greet", |state: Value| async move {
//!     Ok(json!({"greeting": format!("hello, {}", state["name"].as_str().unwrap_or("world"))}))
//! })?;
//! graph.add_edge(START, "greet");
//! graph.add_edge("greet", END);
//!
//! let compiled = graph.compile()?;
//! let result = compiled.invoke(json!({"name": "ada"})).await?;
//! ```

use crate::compile::{compile, CompileOptions, CompiledGraph};
use crate::error::Result;
use crate::graph::{node_fn, Graph, NodeId, NodeMetadata, PathFn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Fluent builder over the raw [`Graph`] description
#[derive(Debug, Default)]
pub struct StateGraph {
    graph: Graph,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node backed by an async closure
    ///
    /// Rejects reserved names ([`START`](crate::graph::START) /
    /// [`END`](crate::graph::END)), duplicates, and empty names.
    pub fn add_node<F, Fut>(&mut self, name: impl Into<NodeId>, func: F) -> Result<&mut Self>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        self.graph
            .add_node(name, node_fn(func), NodeMetadata::default())?;
        Ok(self)
    }

    /// Add a node with descriptive metadata
    pub fn add_node_with_metadata<F, Fut>(
        &mut self,
        name: impl Into<NodeId>,
        func: F,
        metadata: NodeMetadata,
    ) -> Result<&mut Self>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        self.graph.add_node(name, node_fn(func), metadata)?;
        Ok(self)
    }

    /// Add a prebuilt node function (e.g. an agent adapter)
    pub fn add_node_fn(
        &mut self,
        name: impl Into<NodeId>,
        func: crate::graph::NodeFn,
    ) -> Result<&mut Self> {
        self.graph.add_node(name, func, NodeMetadata::default())?;
        Ok(self)
    }

    /// Declare a direct edge
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        self.graph.add_edge(from, to);
        self
    }

    /// Declare a conditional edge with a routing closure
    pub fn add_conditional_edges<F>(
        &mut self,
        source: impl Into<NodeId>,
        path: F,
        path_map: HashMap<String, NodeId>,
    ) -> Result<&mut Self>
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        let path: PathFn = Arc::new(path);
        self.graph.add_conditional_edges(source, path, path_map)?;
        Ok(self)
    }

    /// Set the node where execution begins
    ///
    /// Alternatively, declare an edge from [`START`](crate::graph::START).
    pub fn set_entry_point(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.graph.set_entry_point(node);
        self
    }

    /// Validate and compile with default options
    pub fn compile(self) -> Result<CompiledGraph> {
        compile(self.graph, &CompileOptions::default())
    }

    /// Validate and compile with explicit options
    pub fn compile_with_options(self, options: &CompileOptions) -> Result<CompiledGraph> {
        compile(self.graph, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::graph::{END, START};
    use serde_json::json;

    #[tokio::test]
    async fn test_builder_end_to_end() {
        let mut graph = StateGraph::new();
        graph
            .add_node("upper", |state: Value| async move {
                let text = state["text"].as_str().unwrap_or("").to_uppercase();
                Ok(json!({ "text": text }))
            })
            .unwrap();
        graph.add_edge(START, "upper");
        graph.add_edge("upper", END);

        let compiled = graph.compile().unwrap();
        let result = compiled.invoke(json!({"text": "quiet"})).await.unwrap();
        assert_eq!(result, json!({"text": "QUIET"}));
    }

    #[test]
    fn test_builder_rejects_reserved_names() {
        let mut graph = StateGraph::new();
        let err = graph
            .add_node(START, |state: Value| async move { Ok(state) })
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidNode(_)));
    }

    #[test]
    fn test_compile_with_options_propagates() {
        let mut graph = StateGraph::new();
        graph
            .add_node("only", |state: Value| async move { Ok(state) })
            .unwrap();
        graph
            .add_node("island", |state: Value| async move { Ok(state) })
            .unwrap();
        graph.set_entry_point("only");
        graph.add_edge("only", END);

        let options = CompileOptions {
            eliminate_dead_nodes: true,
            ..Default::default()
        };
        let compiled = graph.compile_with_options(&options).unwrap();
        assert_eq!(compiled.node_count(), 1);
    }
}
