//! Core graph data structures
//!
//! A [`Graph`] is the mutable source description: named nodes, direct edges,
//! and conditional edges, plus an entry point. Two virtual node names are
//! reserved: [`START`] marks where execution begins and [`END`] marks
//! successful termination. Neither may be used as a user node name.
//!
//! Graphs are built (usually through [`StateGraph`](crate::builder::StateGraph)),
//! validated, and compiled into an immutable
//! [`CompiledGraph`](crate::compile::CompiledGraph) for execution.

use crate::error::{GraphError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Node identifier - unique name within a graph
pub type NodeId = String;

/// Virtual entry marker; not a real node
pub const START: &str = "__start__";

/// Virtual termination marker; not a real node
pub const END: &str = "__end__";

/// Async node function: state in, new state out
pub type NodeFn = Arc<
    dyn Fn(Value) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value>> + Send>>
        + Send
        + Sync,
>;

/// Router for conditional edges: inspects state, names a path
pub type PathFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Descriptive metadata attached to a node
#[derive(Debug, Clone, Default)]
pub struct NodeMetadata {
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// A processing unit in the graph
#[derive(Clone)]
pub struct NodeSpec {
    pub name: NodeId,
    pub func: NodeFn,
    pub metadata: NodeMetadata,
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("func", &"<function>")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Unconditional transition between two nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
}

/// Dynamic routing out of a node
///
/// At runtime the `path` function names a branch; `path_map` translates the
/// branch name into the target node (or [`END`]).
#[derive(Clone)]
pub struct ConditionalEdge {
    pub source: NodeId,
    pub path: PathFn,
    pub path_map: HashMap<String, NodeId>,
}

impl std::fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("source", &self.source)
            .field("path", &"<function>")
            .field("path_map", &self.path_map)
            .finish()
    }
}

/// Mutable graph description
#[derive(Debug, Default)]
pub struct Graph {
    pub nodes: HashMap<NodeId, NodeSpec>,
    pub edges: Vec<Edge>,
    pub conditionals: HashMap<NodeId, ConditionalEdge>,
    pub entry: Option<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node
    ///
    /// Rejects empty names, the reserved [`START`]/[`END`] names, and
    /// duplicates. These are caller mistakes and surface immediately rather
    /// than at compile time.
    pub fn add_node(&mut self, name: impl Into<NodeId>, func: NodeFn, metadata: NodeMetadata) -> Result<()> {
        let name = name.into();

        if name.is_empty() {
            return Err(GraphError::InvalidNode("node name must not be empty".into()));
        }
        if name == START || name == END {
            return Err(GraphError::InvalidNode(format!(
                "'{}' is a reserved node name",
                name
            )));
        }
        if self.nodes.contains_key(&name) {
            return Err(GraphError::InvalidNode(format!(
                "node '{}' is already registered",
                name
            )));
        }

        self.nodes.insert(
            name.clone(),
            NodeSpec {
                name,
                func,
                metadata,
            },
        );
        Ok(())
    }

    /// Declare a direct edge
    ///
    /// Endpoints are checked at compile time so edges may be declared before
    /// their nodes.
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
        });
    }

    /// Declare a conditional edge out of `source`
    ///
    /// The path map must be non-empty; its targets are validated at compile
    /// time. A node carries at most one conditional edge.
    pub fn add_conditional_edges(
        &mut self,
        source: impl Into<NodeId>,
        path: PathFn,
        path_map: HashMap<String, NodeId>,
    ) -> Result<()> {
        let source = source.into();

        if path_map.is_empty() {
            return Err(GraphError::Configuration(format!(
                "conditional edge from '{}' has an empty path map",
                source
            )));
        }
        if self.conditionals.contains_key(&source) {
            return Err(GraphError::Configuration(format!(
                "node '{}' already has a conditional edge",
                source
            )));
        }

        self.conditionals.insert(
            source.clone(),
            ConditionalEdge {
                source,
                path,
                path_map,
            },
        );
        Ok(())
    }

    /// Set the node where execution begins
    pub fn set_entry_point(&mut self, node: impl Into<NodeId>) {
        self.entry = Some(node.into());
    }

    /// Resolve the effective entry point
    ///
    /// Either the explicitly set entry, or the target of a declared
    /// `START -> node` edge.
    pub fn resolve_entry(&self) -> Option<NodeId> {
        self.entry.clone().or_else(|| {
            self.edges
                .iter()
                .find(|e| e.from == START)
                .map(|e| e.to.clone())
        })
    }
}

/// Wrap an async closure as a [`NodeFn`]
pub fn node_fn<F, Fut>(f: F) -> NodeFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |state| Box::pin(f(state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn passthrough() -> NodeFn {
        node_fn(|state| async move { Ok(state) })
    }

    #[test]
    fn test_add_node_and_edges() {
        let mut graph = Graph::new();
        graph
            .add_node("step1", passthrough(), NodeMetadata::default())
            .unwrap();
        graph.add_edge(START, "step1");
        graph.add_edge("step1", END);

        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.resolve_entry().as_deref(), Some("step1"));
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut graph = Graph::new();
        assert!(matches!(
            graph.add_node(START, passthrough(), NodeMetadata::default()),
            Err(GraphError::InvalidNode(_))
        ));
        assert!(matches!(
            graph.add_node(END, passthrough(), NodeMetadata::default()),
            Err(GraphError::InvalidNode(_))
        ));
        assert!(matches!(
            graph.add_node("", passthrough(), NodeMetadata::default()),
            Err(GraphError::InvalidNode(_))
        ));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut graph = Graph::new();
        graph
            .add_node("dup", passthrough(), NodeMetadata::default())
            .unwrap();
        assert!(matches!(
            graph.add_node("dup", passthrough(), NodeMetadata::default()),
            Err(GraphError::InvalidNode(_))
        ));
    }

    #[test]
    fn test_empty_path_map_rejected() {
        let mut graph = Graph::new();
        let result = graph.add_conditional_edges(
            "router",
            Arc::new(|_: &Value| "x".to_string()),
            HashMap::new(),
        );
        assert!(matches!(result, Err(GraphError::Configuration(_))));
    }

    #[test]
    fn test_explicit_entry_wins_over_start_edge() {
        let mut graph = Graph::new();
        graph
            .add_node("a", passthrough(), NodeMetadata::default())
            .unwrap();
        graph
            .add_node("b", passthrough(), NodeMetadata::default())
            .unwrap();
        graph.add_edge(START, "a");
        graph.set_entry_point("b");

        assert_eq!(graph.resolve_entry().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_node_fn_wraps_closures() {
        let func = node_fn(|state: Value| async move {
            let n = state["n"].as_i64().unwrap_or(0);
            Ok(json!({"n": n + 1}))
        });

        let out = func(json!({"n": 1})).await.unwrap();
        assert_eq!(out, json!({"n": 2}));
    }
}
