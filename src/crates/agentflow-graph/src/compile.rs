//! Graph validation and compilation
//!
//! Compilation turns a mutable [`Graph`] description into an immutable
//! [`CompiledGraph`] ready for execution. Validation runs in a fixed order
//! and collects every defect before failing:
//!
//! 1. entry point set and present in the node map
//! 2. node map non-empty
//! 3. every direct edge endpoint exists ([`END`] is virtual)
//! 4. every conditional source and target exists ([`END`] is virtual)
//! 5. every declared node reachable from the entry point
//! 6. optional cycle check (off by default; conditional edges legitimately
//!    create cycles)
//!
//! Opt-in optimizations: edge dedup by `(from, to)`, dead-node elimination
//! (which replaces the unreachable-node error), and parallel-group
//! identification.

use crate::error::{GraphError, Result, ValidationError};
use crate::graph::{ConditionalEdge, Graph, NodeId, NodeSpec, END, START};
use agentflow_checkpoint::CheckpointSaver;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Knobs controlling compilation
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Fail compilation when a cycle is found
    pub detect_cycles: bool,

    /// Drop duplicate `(from, to)` edges
    pub dedup_edges: bool,

    /// Drop unreachable nodes instead of failing validation
    pub eliminate_dead_nodes: bool,

    /// Identify sibling nodes that can run in parallel
    pub find_parallel_groups: bool,
}

/// Default step budget for compiled graphs
///
/// Conditional edges permit cycles, so the budget is the safety net; it is
/// never unbounded. Overridable per graph with
/// [`CompiledGraph::with_max_steps`] or globally via
/// `AGENTFLOW_MAX_GRAPH_STEPS`.
pub const DEFAULT_MAX_STEPS: usize = 25;

/// An immutable, validated, executable graph
///
/// Owns its node map and adjacency index exclusively. Runtime configuration
/// (checkpointer, interrupt points, step budget) is attached with the
/// `with_*` builders before execution.
pub struct CompiledGraph {
    pub(crate) entry_point: NodeId,
    pub(crate) nodes: HashMap<NodeId, NodeSpec>,
    pub(crate) adjacency: HashMap<NodeId, Vec<NodeId>>,
    pub(crate) conditionals: HashMap<NodeId, ConditionalEdge>,
    pub(crate) parallel_groups: Vec<Vec<NodeId>>,
    pub(crate) interrupt_nodes: HashSet<NodeId>,
    pub(crate) checkpointer: Option<Arc<dyn CheckpointSaver>>,
    pub(crate) max_steps: usize,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("entry_point", &self.entry_point)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("adjacency", &self.adjacency)
            .field("parallel_groups", &self.parallel_groups)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

impl CompiledGraph {
    /// The node where execution begins
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Number of executable nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Successors of a node (direct targets plus conditional targets)
    pub fn successors(&self, node: &str) -> &[NodeId] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sibling groups eligible for parallel scheduling
    pub fn parallel_groups(&self) -> &[Vec<NodeId>] {
        &self.parallel_groups
    }

    /// Attach a checkpoint backend; state is saved after every node
    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(saver);
        self
    }

    /// Pause execution whenever one of these nodes is about to run
    pub fn with_interrupt_before(mut self, nodes: impl IntoIterator<Item = impl Into<NodeId>>) -> Self {
        self.interrupt_nodes = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Override the step budget (validated at run time; zero is rejected)
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

/// Validate and compile a graph description
pub fn compile(mut graph: Graph, options: &CompileOptions) -> Result<CompiledGraph> {
    let mut errors = Vec::new();

    // 1. Entry point.
    let entry = graph.resolve_entry();
    match &entry {
        None => errors.push("entry point is not set".to_string()),
        Some(e) if !graph.nodes.contains_key(e) => {
            errors.push(format!("entry point '{}' does not exist", e))
        }
        _ => {}
    }

    // 2. Node map.
    if graph.nodes.is_empty() {
        errors.push("graph has no nodes".to_string());
    }

    // 3. Direct edge endpoints.
    for edge in &graph.edges {
        if edge.from != START && !graph.nodes.contains_key(&edge.from) {
            errors.push(format!("edge source '{}' does not exist", edge.from));
        }
        if edge.to != END && !graph.nodes.contains_key(&edge.to) {
            errors.push(format!("edge target '{}' does not exist", edge.to));
        }
    }

    // 4. Conditional endpoints.
    for (source, conditional) in &graph.conditionals {
        if !graph.nodes.contains_key(source) {
            errors.push(format!("conditional source '{}' does not exist", source));
        }
        for target in conditional.path_map.values() {
            if target != END && !graph.nodes.contains_key(target) {
                errors.push(format!(
                    "conditional target '{}' from '{}' does not exist",
                    target, source
                ));
            }
        }
    }

    // Build the union adjacency (direct edges first, conditional targets
    // after) over whatever structure we have; reachability needs it.
    let mut adjacency = build_adjacency(&graph, options.dedup_edges);

    // 5. Reachability.
    let mut nodes = graph.nodes;
    let reachable = match &entry {
        Some(e) if nodes.contains_key(e) => reachable_from(e, &adjacency),
        _ => HashSet::new(),
    };

    let unreachable: Vec<NodeId> = {
        let mut names: Vec<NodeId> = nodes
            .keys()
            .filter(|n| !reachable.contains(*n))
            .cloned()
            .collect();
        names.sort();
        names
    };

    if !unreachable.is_empty() {
        if options.eliminate_dead_nodes {
            for name in &unreachable {
                nodes.remove(name);
                adjacency.remove(name);
                graph.conditionals.remove(name);
            }
            for successors in adjacency.values_mut() {
                successors.retain(|s| s == END || nodes.contains_key(s));
            }
            tracing::debug!(dropped = ?unreachable, "eliminated unreachable nodes");
        } else {
            for name in &unreachable {
                errors.push(format!(
                    "node '{}' is not reachable from entry point",
                    name
                ));
            }
        }
    }

    // 6. Optional cycle check.
    if options.detect_cycles {
        if let Some(cycle_node) = find_cycle(&adjacency, &nodes) {
            errors.push(format!("cycle detected involving node '{}'", cycle_node));
        }
    }

    if !errors.is_empty() {
        return Err(GraphError::Validation(ValidationError::new(errors)));
    }

    let parallel_groups = if options.find_parallel_groups {
        find_parallel_groups(&graph.edges, &nodes)
    } else {
        Vec::new()
    };

    Ok(CompiledGraph {
        entry_point: entry.expect("validated above"),
        nodes,
        adjacency,
        conditionals: graph.conditionals,
        parallel_groups,
        interrupt_nodes: HashSet::new(),
        checkpointer: None,
        max_steps: tooling::config::env_parse("AGENTFLOW_MAX_GRAPH_STEPS")
            .unwrap_or(DEFAULT_MAX_STEPS),
    })
}

fn build_adjacency(graph: &Graph, dedup: bool) -> HashMap<NodeId, Vec<NodeId>> {
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut seen: HashSet<(NodeId, NodeId)> = HashSet::new();

    for edge in &graph.edges {
        if edge.from == START {
            continue;
        }
        if dedup && !seen.insert((edge.from.clone(), edge.to.clone())) {
            continue;
        }
        adjacency
            .entry(edge.from.clone())
            .or_default()
            .push(edge.to.clone());
    }

    for (source, conditional) in &graph.conditionals {
        let successors = adjacency.entry(source.clone()).or_default();
        let mut targets: Vec<&NodeId> = conditional.path_map.values().collect();
        targets.sort();
        for target in targets {
            if !successors.contains(target) {
                successors.push(target.clone());
            }
        }
    }

    adjacency
}

fn reachable_from(entry: &str, adjacency: &HashMap<NodeId, Vec<NodeId>>) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();

    visited.insert(entry.to_string());
    queue.push_back(entry.to_string());

    while let Some(node) = queue.pop_front() {
        for successor in adjacency.get(&node).into_iter().flatten() {
            if successor != END && visited.insert(successor.clone()) {
                queue.push_back(successor.clone());
            }
        }
    }

    visited
}

fn find_cycle(
    adjacency: &HashMap<NodeId, Vec<NodeId>>,
    nodes: &HashMap<NodeId, NodeSpec>,
) -> Option<NodeId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    fn visit(
        node: &str,
        adjacency: &HashMap<NodeId, Vec<NodeId>>,
        colors: &mut HashMap<NodeId, Color>,
    ) -> Option<NodeId> {
        colors.insert(node.to_string(), Color::Gray);

        for successor in adjacency.get(node).into_iter().flatten() {
            if successor == END {
                continue;
            }
            match colors.get(successor.as_str()).copied().unwrap_or(Color::White) {
                Color::Gray => return Some(successor.clone()),
                Color::White => {
                    if let Some(found) = visit(successor, adjacency, colors) {
                        return Some(found);
                    }
                }
                Color::Black => {}
            }
        }

        colors.insert(node.to_string(), Color::Black);
        None
    }

    let mut colors: HashMap<NodeId, Color> = HashMap::new();
    let mut names: Vec<&NodeId> = nodes.keys().collect();
    names.sort();

    for name in names {
        if colors.get(name.as_str()).copied().unwrap_or(Color::White) == Color::White {
            if let Some(found) = visit(name, adjacency, &mut colors) {
                return Some(found);
            }
        }
    }
    None
}

/// Group sibling nodes that share the same predecessor set and have no edges
/// between them
fn find_parallel_groups(
    edges: &[crate::graph::Edge],
    nodes: &HashMap<NodeId, NodeSpec>,
) -> Vec<Vec<NodeId>> {
    let mut predecessors: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
    for edge in edges {
        if edge.to == END || !nodes.contains_key(&edge.to) {
            continue;
        }
        predecessors.entry(&edge.to).or_default().push(&edge.from);
    }
    for preds in predecessors.values_mut() {
        preds.sort();
        preds.dedup();
    }

    let direct: HashSet<(&NodeId, &NodeId)> = edges.iter().map(|e| (&e.from, &e.to)).collect();

    // Bucket by predecessor signature.
    let mut buckets: HashMap<String, Vec<NodeId>> = HashMap::new();
    for (node, preds) in &predecessors {
        if preds.is_empty() {
            continue;
        }
        let signature = preds
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join("|");
        buckets.entry(signature).or_default().push((*node).clone());
    }

    let mut groups: Vec<Vec<NodeId>> = buckets
        .into_values()
        .filter(|group| group.len() >= 2)
        .filter(|group| {
            // No dependency edges inside the group.
            group.iter().all(|a| {
                group
                    .iter()
                    .all(|b| a == b || !direct.contains(&(a, b)))
            })
        })
        .map(|mut group| {
            group.sort();
            group
        })
        .collect();

    groups.sort();
    groups
}
